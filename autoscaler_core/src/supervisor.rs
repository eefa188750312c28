use crate::config::AutoscalerConfig;
use chrono::Utc;
use common::{ActionKind, ExecutionError, LifecycleEvent, LifecycleSender, SourceError};
use execution_engine::ExecutionCoordinator;
use futures_util::future::join_all;
use metrics_service::{MetricSource, MetricStore};
use scaling_engine::DecisionEngine;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// Where a service's worker currently sits in its scaling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServicePhase {
    Idle,
    Deciding,
    Executing,
    CoolingDown,
}

/// Owns timing for the whole system: one cooperative worker per monitored
/// service, each polling its source, feeding the store, and driving
/// decision and execution. Workers that panic are restarted with fresh
/// transient state; their history rings survive in the engine.
pub struct Supervisor {
    config: AutoscalerConfig,
    store: MetricStore,
    source: Arc<dyn MetricSource>,
    engine: Arc<DecisionEngine>,
    coordinator: Arc<ExecutionCoordinator>,
    events_tx: LifecycleSender,
    phases: Arc<RwLock<HashMap<String, ServicePhase>>>,
    source_failures: Arc<RwLock<HashMap<String, u64>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new(
        config: AutoscalerConfig,
        store: MetricStore,
        source: Arc<dyn MetricSource>,
        engine: Arc<DecisionEngine>,
        coordinator: Arc<ExecutionCoordinator>,
        events_tx: LifecycleSender,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            store,
            source,
            engine,
            coordinator,
            events_tx,
            phases: Arc::new(RwLock::new(HashMap::new())),
            source_failures: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
        }
    }

    pub fn phases(&self) -> Arc<RwLock<HashMap<String, ServicePhase>>> {
        self.phases.clone()
    }

    pub fn source_failures(&self) -> Arc<RwLock<HashMap<String, u64>>> {
        self.source_failures.clone()
    }

    /// Run every service worker until shutdown.
    pub async fn run(&self) {
        info!(
            services = self.config.services.len(),
            "starting autoscaler control loop"
        );
        self.validate_services().await;

        if self.config.services.is_empty() {
            warn!("no services configured; control loop is idle");
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
            return;
        }

        let mut supervisions = Vec::new();
        for service_id in &self.config.services {
            supervisions.push(self.supervise_worker(service_id.clone()));
        }
        join_all(supervisions).await;
        info!("control loop stopped");
    }

    /// Capability probe at startup; a backend that cannot describe a
    /// service is worth a warning, not a refusal to start.
    async fn validate_services(&self) {
        for service_id in &self.config.services {
            match self.coordinator.validate_service(service_id).await {
                Ok(description) => {
                    if let Some(max) = description.max_supported_instances {
                        if max < self.config.scaling.limits.max_instances {
                            warn!(
                                service_id = %service_id,
                                backend_max = max,
                                configured_max = self.config.scaling.limits.max_instances,
                                "backend supports fewer instances than the configured limit"
                            );
                        }
                    }
                    debug!(service_id = %service_id, provider = %description.provider, "service validated");
                }
                Err(e) => warn!(service_id = %service_id, "capability validation failed: {}", e),
            }
        }
    }

    async fn supervise_worker(&self, service_id: String) {
        loop {
            let worker = Worker {
                service_id: service_id.clone(),
                poll_interval: Duration::from_secs(self.config.metrics.poll_interval_s.max(1)),
                poll_timeout: Duration::from_secs(self.config.metrics.poll_timeout_s.max(1)),
                source: self.source.clone(),
                store: self.store.clone(),
                engine: self.engine.clone(),
                coordinator: self.coordinator.clone(),
                events_tx: self.events_tx.clone(),
                phases: self.phases.clone(),
                source_failures: self.source_failures.clone(),
                shutdown_rx: self.shutdown_tx.subscribe(),
            };

            match tokio::spawn(worker.run()).await {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    error!(service_id = %service_id, "service worker panicked; restarting with fresh state");
                    self.engine.reset_transient(&service_id).await;
                    self.phases
                        .write()
                        .await
                        .insert(service_id.clone(), ServicePhase::Idle);
                }
                Err(_) => break,
            }
        }
    }

    /// Stop accepting decisions, then wait out in-flight executions up to
    /// the drain deadline.
    pub async fn shutdown(&self) {
        info!("shutting down control loop");
        let _ = self.shutdown_tx.send(true);

        let deadline = Instant::now() + Duration::from_secs(self.config.drain_timeout_s());
        while self.coordinator.active_count().await > 0 {
            if Instant::now() >= deadline {
                warn!(
                    remaining = self.coordinator.active_count().await,
                    "drain deadline reached with executions still in flight"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

struct Worker {
    service_id: String,
    poll_interval: Duration,
    poll_timeout: Duration,
    source: Arc<dyn MetricSource>,
    store: MetricStore,
    engine: Arc<DecisionEngine>,
    coordinator: Arc<ExecutionCoordinator>,
    events_tx: LifecycleSender,
    phases: Arc<RwLock<HashMap<String, ServicePhase>>>,
    source_failures: Arc<RwLock<HashMap<String, u64>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }
            self.tick().await;
        }
        self.set_phase(ServicePhase::Idle).await;
        debug!(service_id = %self.service_id, "worker stopped");
    }

    async fn tick(&self) {
        let now = Utc::now();
        self.set_phase(ServicePhase::Deciding).await;

        let fetched = match tokio::time::timeout(
            self.poll_timeout,
            self.source.fetch(&self.service_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(self.poll_timeout.as_millis() as u64)),
        };

        match fetched {
            Ok(metrics) => {
                self.store.put(metrics.clone()).await;
                let decision = self.engine.decide(&metrics, now).await;

                if decision.action == ActionKind::Maintain {
                    self.set_phase(ServicePhase::Idle).await;
                    return;
                }

                self.set_phase(ServicePhase::Executing).await;
                match self.coordinator.execute(&decision, Some(metrics)).await {
                    Ok(event) if event.success => {
                        self.set_phase(ServicePhase::CoolingDown).await;
                    }
                    Ok(_) => {
                        // failure already surfaced as a failed event; the
                        // next tick may try again, cooldown unstamped
                        self.set_phase(ServicePhase::Idle).await;
                    }
                    Err(ExecutionError::ScalingInProgress(_)) => {
                        warn!(service_id = %self.service_id, "skipped: scaling already in progress");
                        self.set_phase(ServicePhase::Idle).await;
                    }
                    Err(e) => {
                        warn!(service_id = %self.service_id, "execution error: {}", e);
                        self.set_phase(ServicePhase::Idle).await;
                    }
                }
            }
            Err(e) => {
                self.note_source_failure(&e).await;
                // no fresh telemetry: hold position and say why
                let current = self
                    .store
                    .get(&self.service_id)
                    .await
                    .map(|m| m.instances.current)
                    .unwrap_or(0);
                self.engine
                    .record_maintain(&self.service_id, current, "metrics stale", now)
                    .await;
                self.set_phase(ServicePhase::Idle).await;
            }
        }
    }

    async fn note_source_failure(&self, error: &SourceError) {
        *self
            .source_failures
            .write()
            .await
            .entry(self.service_id.clone())
            .or_insert(0) += 1;

        // malformed payloads get a louder signal than transient blips
        match error {
            SourceError::Malformed(_) => {
                error!(service_id = %self.service_id, "metrics poll failed: {}", error);
            }
            _ => warn!(service_id = %self.service_id, "metrics poll failed: {}", error),
        }
        let _ = self.events_tx.send(LifecycleEvent::MetricsError {
            service_id: self.service_id.clone(),
            message: error.to_string(),
        });
    }

    async fn set_phase(&self, phase: ServicePhase) {
        self.phases
            .write()
            .await
            .insert(self.service_id.clone(), phase);
    }
}
