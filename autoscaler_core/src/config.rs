use anyhow::{Context, Result};
use common::{GlobalLimits, ScalingRule, TradingProfile};
use execution_engine::BackendSettings;
use prediction_engine::PredictorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Orchestrator,
    Engine,
    Cloud,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    /// Master kill switch: metrics keep flowing, decisions all come back
    /// maintain.
    pub enabled: bool,
    pub provider: Provider,
    pub rules: Vec<ScalingRule>,
    pub limits: GlobalLimits,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: Provider::Orchestrator,
            rules: Vec::new(),
            limits: GlobalLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub source_url: String,
    pub poll_interval_s: u64,
    pub poll_timeout_s: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            source_url: "http://localhost:9101/metrics".to_string(),
            poll_interval_s: 30,
            poll_timeout_s: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Each URL receives both the pre_scale and post_scale payloads.
    pub urls: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            timeout_ms: 3000,
        }
    }
}

/// Alert sink specifics are opaque to the core; delivery rides the
/// lifecycle bus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
    pub webhook_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Interval-form schedule: "45s", "30m", "6h", "hourly" or "daily".
    pub schedule: String,
    pub retention_days: u32,
    pub cost_per_instance_hour: f64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            schedule: "6h".to_string(),
            retention_days: 30,
            cost_per_instance_hour: 0.12,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalerConfig {
    /// Service ids the control loop monitors.
    pub services: Vec<String>,
    pub scaling: ScalingConfig,
    pub metrics: MetricsConfig,
    pub backend: BackendSettings,
    pub trading: TradingProfile,
    pub predictor: PredictorConfig,
    pub hooks: HookConfig,
    pub alerts: AlertsConfig,
    pub reporting: ReportingConfig,
    pub drain_timeout_s: u64,
}

impl AutoscalerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scaling
            .limits
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid limits: {}", e))?;
        if self.trading.market_hours.start_time().is_none()
            || self.trading.market_hours.end_time().is_none()
        {
            anyhow::bail!(
                "market hours must be HH:MM, got {} / {}",
                self.trading.market_hours.start,
                self.trading.market_hours.end
            );
        }
        if crate::reports::parse_schedule(&self.reporting.schedule).is_none() {
            anyhow::bail!("unparseable reporting schedule {:?}", self.reporting.schedule);
        }
        Ok(())
    }

    pub fn drain_timeout_s(&self) -> u64 {
        if self.drain_timeout_s == 0 {
            30
        } else {
            self.drain_timeout_s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AutoscalerConfig::default().validate().unwrap();
    }

    #[test]
    fn config_round_trips_through_json() {
        let json = r#"{
            "services": ["order-gateway", "risk-engine"],
            "scaling": {
                "enabled": true,
                "provider": "cloud",
                "rules": [{
                    "id": "cpu-up",
                    "name": "cpu pressure",
                    "enabled": true,
                    "priority": 10,
                    "conditions": [{
                        "metric_path": "cpu.usage",
                        "comparison": "greater_than",
                        "threshold": 80.0,
                        "duration_seconds": 60
                    }],
                    "action": {"kind": "up", "sizing": {"delta": 2}},
                    "target_services": ["order-gateway"]
                }],
                "limits": {
                    "min_instances": 2,
                    "max_instances": 40,
                    "scale_up_cooldown_s": 300,
                    "scale_down_cooldown_s": 600
                }
            },
            "trading": {
                "market_hours": {"start": "09:30", "end": "16:00"},
                "compliance": {
                    "min_instances_for_redundancy": 3,
                    "max_scale_down_rate_pct": 25.0,
                    "large_scale_approval_threshold": 30
                }
            },
            "reporting": {"schedule": "30m"}
        }"#;

        let config: AutoscalerConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.scaling.provider, Provider::Cloud);
        assert_eq!(config.scaling.rules.len(), 1);
        assert_eq!(config.scaling.limits.max_instances, 40);
        assert_eq!(config.trading.compliance.min_instances_for_redundancy, 3);
        // omitted sections fall back to defaults
        assert_eq!(config.metrics.poll_interval_s, 30);
        assert_eq!(config.predictor.base_load, 100.0);
    }

    #[test]
    fn bad_limits_are_rejected() {
        let mut config = AutoscalerConfig::default();
        config.scaling.limits.min_instances = 50;
        config.scaling.limits.max_instances = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_market_hours_are_rejected() {
        let mut config = AutoscalerConfig::default();
        config.trading.market_hours.start = "late morning".to_string();
        assert!(config.validate().is_err());
    }
}
