use crate::rules::ActionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Fleet-wide instance bounds and post-scale cooldown windows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalLimits {
    pub min_instances: u32,
    pub max_instances: u32,
    pub scale_up_cooldown_s: u64,
    pub scale_down_cooldown_s: u64,
}

impl Default for GlobalLimits {
    fn default() -> Self {
        Self {
            min_instances: 1,
            max_instances: 20,
            scale_up_cooldown_s: 300,
            scale_down_cooldown_s: 600,
        }
    }
}

impl GlobalLimits {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_instances > self.max_instances {
            return Err(format!(
                "min_instances {} exceeds max_instances {}",
                self.min_instances, self.max_instances
            ));
        }
        Ok(())
    }
}

/// Per-service cooldown stamps. Stamped only on successful non-maintain
/// executions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CooldownState {
    pub last_scale_up: Option<DateTime<Utc>>,
    pub last_scale_down: Option<DateTime<Utc>>,
}

/// Shared cooldown handle. The decision engine reads it before every
/// decision and the execution coordinator stamps it after every successful
/// scale, which keeps the two components free of references to each other.
#[derive(Clone)]
pub struct CooldownGate {
    limits: GlobalLimits,
    states: Arc<RwLock<HashMap<String, CooldownState>>>,
}

impl CooldownGate {
    pub fn new(limits: GlobalLimits) -> Self {
        Self {
            limits,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A service is in cooldown when EITHER direction's window is still
    /// open. The either-direction check matches the shipped behavior and is
    /// awaiting product confirmation before any per-direction split.
    pub async fn in_cooldown(&self, service_id: &str, now: DateTime<Utc>) -> bool {
        let states = self.states.read().await;
        let Some(state) = states.get(service_id) else {
            return false;
        };
        let up_open = state
            .last_scale_up
            .is_some_and(|at| (now - at).num_seconds() < self.limits.scale_up_cooldown_s as i64);
        let down_open = state
            .last_scale_down
            .is_some_and(|at| (now - at).num_seconds() < self.limits.scale_down_cooldown_s as i64);
        up_open || down_open
    }

    pub async fn stamp(&self, service_id: &str, direction: ActionKind, now: DateTime<Utc>) {
        let mut states = self.states.write().await;
        let state = states.entry(service_id.to_string()).or_default();
        match direction {
            ActionKind::Up => state.last_scale_up = Some(now),
            ActionKind::Down => state.last_scale_down = Some(now),
            ActionKind::Maintain => {}
        }
    }

    pub async fn state(&self, service_id: &str) -> CooldownState {
        self.states
            .read()
            .await
            .get(service_id)
            .copied()
            .unwrap_or_default()
    }
}
