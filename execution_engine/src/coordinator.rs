use crate::backend::ScalingBackend;
use crate::hooks::{HookPhase, HookSink};
use chrono::Utc;
use common::{
    ActionKind, CooldownGate, ExecutionError, GlobalLimits, LifecycleEvent, LifecycleSender,
    ScalingDecision, ScalingEvent, ServiceMetrics, StateSink, Urgency,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

const EVENT_RING_CAPACITY: usize = 50;
const EMERGENCY_WAIT_POLL: Duration = Duration::from_millis(100);

/// Process-wide set of services with a scaling in flight. Insert-if-absent
/// is the only operation the hot path cares about.
#[derive(Clone, Default)]
pub struct ActiveScalings {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveScalings {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn try_begin(&self, service_id: &str) -> bool {
        self.inner.lock().await.insert(service_id.to_string())
    }

    pub async fn end(&self, service_id: &str) {
        self.inner.lock().await.remove(service_id);
    }

    pub async fn contains(&self, service_id: &str) -> bool {
        self.inner.lock().await.contains(service_id)
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Serializes scalings per service and turns decisions into executed
/// `ScalingEvent`s: pre-hooks, backend call, post-hooks, cooldown stamp,
/// lifecycle fan-out, ring append, write-through persistence.
pub struct ExecutionCoordinator {
    backend: Arc<dyn ScalingBackend>,
    hooks: Arc<dyn HookSink>,
    cooldowns: CooldownGate,
    limits: GlobalLimits,
    redundancy_floor: u32,
    active: ActiveScalings,
    events_tx: LifecycleSender,
    sink: Arc<dyn StateSink>,
    history: RwLock<HashMap<String, VecDeque<ScalingEvent>>>,
    emergency_wait: Duration,
}

impl ExecutionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn ScalingBackend>,
        hooks: Arc<dyn HookSink>,
        cooldowns: CooldownGate,
        limits: GlobalLimits,
        redundancy_floor: u32,
        active: ActiveScalings,
        events_tx: LifecycleSender,
        sink: Arc<dyn StateSink>,
    ) -> Self {
        Self {
            backend,
            hooks,
            cooldowns,
            limits,
            redundancy_floor,
            active,
            events_tx,
            sink,
            history: RwLock::new(HashMap::new()),
            emergency_wait: Duration::from_secs(300),
        }
    }

    /// Execute a non-maintain decision. Refuses re-entry: a second call for
    /// the same service while one is in flight fails immediately and is not
    /// queued. Backend failures are folded into a failed event, not an
    /// error.
    pub async fn execute(
        &self,
        decision: &ScalingDecision,
        snapshot: Option<ServiceMetrics>,
    ) -> Result<ScalingEvent, ExecutionError> {
        if !self.active.try_begin(&decision.service_id).await {
            warn!(service_id = %decision.service_id, "refusing re-entrant scaling");
            return Err(ExecutionError::ScalingInProgress(
                decision.service_id.clone(),
            ));
        }
        let event = self.run_locked(decision, snapshot).await;
        self.active.end(&decision.service_id).await;
        Ok(event)
    }

    /// Synthesize and run a critical scale-down. Bypasses the cooldown gate
    /// by construction (the gate lives in the decision path) but still
    /// honors the global window and the compliance redundancy floor, and
    /// waits out any in-flight execution for the service rather than
    /// preempting it.
    pub async fn emergency_scale_down(
        &self,
        service_id: &str,
        target: u32,
    ) -> Result<ScalingEvent, ExecutionError> {
        let current = self
            .backend
            .current_instances(service_id)
            .await
            .map_err(ExecutionError::Backend)?;

        let lower = self
            .limits
            .min_instances
            .max(self.redundancy_floor)
            .min(self.limits.max_instances);
        let clamped = target.clamp(lower, self.limits.max_instances);
        let mut reasoning = vec![format!(
            "emergency scale-down requested to {} instances",
            target
        )];
        if clamped != target {
            reasoning.push(format!(
                "emergency target adjusted to {} by the global window and redundancy floor",
                clamped
            ));
        }

        let decision = ScalingDecision {
            timestamp: Utc::now(),
            service_id: service_id.to_string(),
            current_instances: current,
            recommended_instances: clamped,
            action: ActionKind::from_counts(current, clamped),
            urgency: Urgency::Critical,
            confidence: 1.0,
            reasoning,
            triggered_rule_ids: vec!["emergency".to_string()],
            metrics_used: HashMap::new(),
        };

        info!(service_id, target = clamped, "running emergency scale-down");
        self.begin_waiting(service_id).await?;
        let event = self.run_locked(&decision, None).await;
        self.active.end(service_id).await;
        Ok(event)
    }

    /// Restore the instance count recorded before the most recent
    /// successful event. Returns `None` without error when the service has
    /// no successful history to roll back to.
    pub async fn rollback_last(
        &self,
        service_id: &str,
    ) -> Result<Option<ScalingEvent>, ExecutionError> {
        let restore = {
            let history = self.history.read().await;
            history.get(service_id).and_then(|ring| {
                ring.iter()
                    .rev()
                    .find(|e| e.success)
                    .map(|e| (e.event_id.clone(), e.previous_instances))
            })
        };
        let Some((rolled_back_id, previous)) = restore else {
            return Ok(None);
        };

        let current = self
            .backend
            .current_instances(service_id)
            .await
            .map_err(ExecutionError::Backend)?;

        let decision = ScalingDecision {
            timestamp: Utc::now(),
            service_id: service_id.to_string(),
            current_instances: current,
            recommended_instances: previous,
            action: ActionKind::from_counts(current, previous),
            urgency: Urgency::High,
            confidence: 1.0,
            reasoning: vec![format!("rollback of event {}", rolled_back_id)],
            triggered_rule_ids: vec!["rollback".to_string()],
            metrics_used: HashMap::new(),
        };

        self.execute(&decision, None).await.map(Some)
    }

    /// Newest-first execution history, capped by the ring.
    pub async fn events(&self, service_id: &str, limit: usize) -> Vec<ScalingEvent> {
        self.history
            .read()
            .await
            .get(service_id)
            .map(|ring| ring.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub async fn all_events(&self) -> Vec<ScalingEvent> {
        self.history
            .read()
            .await
            .values()
            .flat_map(|ring| ring.iter().cloned())
            .collect()
    }

    pub async fn active_count(&self) -> usize {
        self.active.count().await
    }

    pub async fn is_active(&self, service_id: &str) -> bool {
        self.active.contains(service_id).await
    }

    pub async fn current_instances(&self, service_id: &str) -> Result<u32, ExecutionError> {
        self.backend
            .current_instances(service_id)
            .await
            .map_err(ExecutionError::Backend)
    }

    /// Capability probe used at startup and before manual scalings.
    pub async fn validate_service(
        &self,
        service_id: &str,
    ) -> Result<crate::backend::BackendDescription, ExecutionError> {
        self.backend
            .describe(service_id)
            .await
            .map_err(ExecutionError::Backend)
    }

    async fn begin_waiting(&self, service_id: &str) -> Result<(), ExecutionError> {
        let deadline = Instant::now() + self.emergency_wait;
        while !self.active.try_begin(service_id).await {
            if Instant::now() >= deadline {
                return Err(ExecutionError::ScalingInProgress(service_id.to_string()));
            }
            tokio::time::sleep(EMERGENCY_WAIT_POLL).await;
        }
        Ok(())
    }

    /// The execution body. The caller owns the active-set slot.
    async fn run_locked(
        &self,
        decision: &ScalingDecision,
        snapshot: Option<ServiceMetrics>,
    ) -> ScalingEvent {
        let service_id = decision.service_id.clone();
        let started = Instant::now();

        let _ = self.events_tx.send(LifecycleEvent::ScalingStarted {
            service_id: service_id.clone(),
            target_instances: decision.recommended_instances,
            timestamp: Utc::now(),
        });

        self.run_hook(HookPhase::PreScale, &service_id).await;

        let outcome = if decision.action == ActionKind::Maintain {
            // no mutation; record the live count for a faithful no-op event
            self.backend
                .current_instances(&service_id)
                .await
                .map(|current| (current, current, Vec::new()))
        } else {
            self.backend
                .scale(&service_id, decision.recommended_instances)
                .await
                .map(|r| (r.previous_instances, r.new_instances, r.warnings))
        };

        self.run_hook(HookPhase::PostScale, &service_id).await;

        let event = match outcome {
            Ok((previous, new, warnings)) => ScalingEvent {
                event_id: Uuid::new_v4().to_string(),
                timestamp: Utc::now(),
                service_id: service_id.clone(),
                action: decision.action,
                previous_instances: previous,
                new_instances: new,
                success: true,
                duration_ms: started.elapsed().as_millis() as u64,
                error: None,
                warnings,
                metrics_snapshot: snapshot,
                rule_summary: decision.reasoning.clone(),
            },
            Err(e) => {
                warn!(service_id = %service_id, "backend scaling failed: {}", e);
                ScalingEvent {
                    event_id: Uuid::new_v4().to_string(),
                    timestamp: Utc::now(),
                    service_id: service_id.clone(),
                    action: decision.action,
                    previous_instances: decision.current_instances,
                    new_instances: decision.current_instances,
                    success: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: Some(e.to_string()),
                    warnings: Vec::new(),
                    metrics_snapshot: snapshot,
                    rule_summary: decision.reasoning.clone(),
                }
            }
        };

        // cooldowns are earned, not attempted: only a successful mutation
        // stamps one
        if event.success && decision.action != ActionKind::Maintain {
            self.cooldowns
                .stamp(&service_id, decision.action, event.timestamp)
                .await;
        }

        {
            let mut history = self.history.write().await;
            let ring = history.entry(service_id.clone()).or_default();
            if ring.len() == EVENT_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }

        if let Err(e) = self.sink.record_event(&event).await {
            warn!(service_id = %service_id, "failed to persist event: {}", e);
        }

        let lifecycle = if event.success {
            info!(
                service_id = %service_id,
                previous = event.previous_instances,
                new = event.new_instances,
                "scaling completed"
            );
            LifecycleEvent::ScalingCompleted(Box::new(event.clone()))
        } else {
            LifecycleEvent::ScalingFailed(Box::new(event.clone()))
        };
        let _ = self.events_tx.send(lifecycle);

        event
    }

    async fn run_hook(&self, phase: HookPhase, service_id: &str) {
        if let Err(e) = self.hooks.invoke(phase, service_id, Utc::now()).await {
            warn!(service_id, %phase, "scaling hook failed: {}", e);
            let _ = self.events_tx.send(LifecycleEvent::HookFailed {
                service_id: service_id.to_string(),
                phase: phase.to_string(),
                message: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn active_set_is_insert_if_absent() {
        let active = ActiveScalings::new();
        assert!(active.try_begin("svc-a").await);
        assert!(!active.try_begin("svc-a").await);
        assert!(active.try_begin("svc-b").await);

        active.end("svc-a").await;
        assert!(active.try_begin("svc-a").await);
        assert_eq!(active.count().await, 2);
    }
}
