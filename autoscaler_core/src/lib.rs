pub mod admin;
pub mod config;
pub mod reports;
pub mod supervisor;

pub use admin::{AdminSurface, HealthStatus, ManualScaleOutcome, ServiceHealth, StatusSummary};
pub use config::{
    AlertsConfig, AutoscalerConfig, HookConfig, MetricsConfig, Provider, ReportingConfig,
    ScalingConfig,
};
pub use reports::{parse_schedule, ReportGenerator, ReportScheduler, ScalingReport};
pub use supervisor::{ServicePhase, Supervisor};
