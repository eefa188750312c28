use crate::metrics::ServiceMetrics;
use crate::rules::{ActionKind, ScalingDecision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Record of executing (or failing to execute) a scaling decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub service_id: String,
    pub action: ActionKind,
    pub previous_instances: u32,
    pub new_instances: u32,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub metrics_snapshot: Option<ServiceMetrics>,
    #[serde(default)]
    pub rule_summary: Vec<String>,
}

/// The central lifecycle message type, fanned out to alerting and UI
/// subscribers over a bounded broadcast channel. Lagging subscribers lose
/// the oldest messages; nothing load-bearing rides this bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LifecycleEvent {
    DecisionMade(ScalingDecision),
    DecisionError {
        service_id: String,
        message: String,
    },
    MetricsError {
        service_id: String,
        message: String,
    },
    ScalingStarted {
        service_id: String,
        target_instances: u32,
        timestamp: DateTime<Utc>,
    },
    ScalingCompleted(Box<ScalingEvent>),
    ScalingFailed(Box<ScalingEvent>),
    HookFailed {
        service_id: String,
        phase: String,
        message: String,
    },
}

pub type LifecycleSender = broadcast::Sender<LifecycleEvent>;
pub type LifecycleReceiver = broadcast::Receiver<LifecycleEvent>;

pub const LIFECYCLE_CHANNEL_CAPACITY: usize = 256;

pub fn lifecycle_channel() -> (LifecycleSender, LifecycleReceiver) {
    broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY)
}
