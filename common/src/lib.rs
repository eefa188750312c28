pub mod error;
pub mod event;
pub mod limits;
pub mod metrics;
pub mod persist;
pub mod rules;
pub mod trading;

pub use error::{BackendError, ExecutionError, SourceError};
pub use event::{
    lifecycle_channel, LifecycleEvent, LifecycleReceiver, LifecycleSender, ScalingEvent,
    LIFECYCLE_CHANNEL_CAPACITY,
};
pub use limits::{CooldownGate, CooldownState, GlobalLimits};
pub use metrics::{InstanceCounts, PerformanceMetrics, ResourceMetrics, ServiceMetrics};
pub use persist::{decision_key, event_key, MemoryStateSink, NullStateSink, StateSink};
pub use rules::{
    ActionKind, Comparison, ScalingAction, ScalingCondition, ScalingDecision, ScalingRule, Sizing,
    Urgency,
};
pub use trading::{ComplianceRules, MarketHours, PatternMultipliers, TradingProfile};
