use crate::event::ScalingEvent;
use crate::rules::ScalingDecision;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Write-through persistence for decisions and events. The core never reads
/// these back at decision time; retention is the sink's concern (decisions
/// seven days, events thirty).
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn record_decision(&self, decision: &ScalingDecision) -> anyhow::Result<()>;
    async fn record_event(&self, event: &ScalingEvent) -> anyhow::Result<()>;
}

pub fn decision_key(decision: &ScalingDecision) -> String {
    format!(
        "decision:{}:{}",
        decision.service_id,
        decision.timestamp.to_rfc3339()
    )
}

pub fn event_key(event: &ScalingEvent) -> String {
    format!("event:{}", event.event_id)
}

/// Default sink when no external persistence is wired in.
pub struct NullStateSink;

#[async_trait]
impl StateSink for NullStateSink {
    async fn record_decision(&self, decision: &ScalingDecision) -> anyhow::Result<()> {
        debug!(key = %decision_key(decision), "decision not persisted (null sink)");
        Ok(())
    }

    async fn record_event(&self, event: &ScalingEvent) -> anyhow::Result<()> {
        debug!(key = %event_key(event), "event not persisted (null sink)");
        Ok(())
    }
}

/// In-memory sink used by tests and the simulation provider.
#[derive(Default, Clone)]
pub struct MemoryStateSink {
    decisions: Arc<RwLock<Vec<(String, ScalingDecision)>>>,
    events: Arc<RwLock<Vec<(String, ScalingEvent)>>>,
}

impl MemoryStateSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn decisions(&self) -> Vec<(String, ScalingDecision)> {
        self.decisions.read().await.clone()
    }

    pub async fn events(&self) -> Vec<(String, ScalingEvent)> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl StateSink for MemoryStateSink {
    async fn record_decision(&self, decision: &ScalingDecision) -> anyhow::Result<()> {
        self.decisions
            .write()
            .await
            .push((decision_key(decision), decision.clone()));
        Ok(())
    }

    async fn record_event(&self, event: &ScalingEvent) -> anyhow::Result<()> {
        self.events
            .write()
            .await
            .push((event_key(event), event.clone()));
        Ok(())
    }
}
