use crate::reports::{ReportGenerator, ScalingReport};
use crate::supervisor::ServicePhase;
use chrono::{DateTime, Utc};
use common::{
    ActionKind, ExecutionError, GlobalLimits, ScalingDecision, ScalingEvent, ServiceMetrics,
};
use execution_engine::ExecutionCoordinator;
use metrics_service::MetricStore;
use prediction_engine::{LoadPrediction, Predictor};
use scaling_engine::DecisionEngine;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service_id: String,
    pub phase: ServicePhase,
    pub snapshot_age_s: Option<i64>,
    pub source_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub scaling_enabled: bool,
    pub store_ready: bool,
    pub active_scalings: usize,
    pub services: Vec<ServiceHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub services: HashMap<String, ServiceMetrics>,
    pub limits: GlobalLimits,
}

/// Result of a manual scale request: the validated decision, and the
/// execution event when the decision was not maintain.
#[derive(Debug, Clone, Serialize)]
pub struct ManualScaleOutcome {
    pub decision: ScalingDecision,
    pub event: Option<ScalingEvent>,
}

/// Typed facade for the external HTTP collaborator. The core never formats
/// HTTP responses; this is the whole surface it offers.
pub struct AdminSurface {
    services: Vec<String>,
    store: MetricStore,
    engine: Arc<DecisionEngine>,
    coordinator: Arc<ExecutionCoordinator>,
    predictor: Predictor,
    reports: Arc<ReportGenerator>,
    phases: Arc<RwLock<HashMap<String, ServicePhase>>>,
    source_failures: Arc<RwLock<HashMap<String, u64>>>,
}

impl AdminSurface {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        services: Vec<String>,
        store: MetricStore,
        engine: Arc<DecisionEngine>,
        coordinator: Arc<ExecutionCoordinator>,
        predictor: Predictor,
        reports: Arc<ReportGenerator>,
        phases: Arc<RwLock<HashMap<String, ServicePhase>>>,
        source_failures: Arc<RwLock<HashMap<String, u64>>>,
    ) -> Self {
        Self {
            services,
            store,
            engine,
            coordinator,
            predictor,
            reports,
            phases,
            source_failures,
        }
    }

    pub async fn health(&self) -> HealthStatus {
        let now = Utc::now();
        let ages = self.store.ages(now).await;
        let phases = self.phases.read().await;
        let failures = self.source_failures.read().await;

        let services = self
            .services
            .iter()
            .map(|id| ServiceHealth {
                service_id: id.clone(),
                phase: phases.get(id).copied().unwrap_or(ServicePhase::Idle),
                snapshot_age_s: ages.get(id).copied(),
                source_failures: failures.get(id).copied().unwrap_or(0),
            })
            .collect();

        HealthStatus {
            scaling_enabled: self.engine.is_enabled().await,
            store_ready: !self.store.is_empty().await,
            active_scalings: self.coordinator.active_count().await,
            services,
        }
    }

    pub async fn status(&self) -> StatusSummary {
        StatusSummary {
            services: self.store.snapshot().await,
            limits: *self.engine.limits(),
        }
    }

    pub async fn service_metrics(&self, service_id: &str) -> Option<ServiceMetrics> {
        self.store.get(service_id).await
    }

    /// Newest decisions first, capped by the ring.
    pub async fn decisions(&self, service_id: &str, limit: usize) -> Vec<ScalingDecision> {
        self.engine.history(service_id, limit).await
    }

    /// Newest execution events first, capped by the ring.
    pub async fn events(&self, service_id: &str, limit: usize) -> Vec<ScalingEvent> {
        self.coordinator.events(service_id, limit).await
    }

    /// Operator-initiated scale. The target goes through the same
    /// validation pipeline as automated decisions; a decision that comes
    /// back maintain (cooldown, clamp) is returned without executing.
    pub async fn scale(
        &self,
        service_id: &str,
        target: u32,
    ) -> Result<ManualScaleOutcome, ExecutionError> {
        let current = match self.store.get(service_id).await {
            Some(metrics) => metrics.instances.current,
            None => self.coordinator.current_instances(service_id).await?,
        };

        let decision = self
            .engine
            .manual_decision(service_id, current, target, Utc::now())
            .await;

        if decision.action == ActionKind::Maintain {
            return Ok(ManualScaleOutcome {
                decision,
                event: None,
            });
        }

        let snapshot = self.store.get(service_id).await;
        let event = self.coordinator.execute(&decision, snapshot).await?;
        Ok(ManualScaleOutcome {
            decision,
            event: Some(event),
        })
    }

    pub async fn emergency_scale_down(
        &self,
        service_id: &str,
        target: u32,
    ) -> Result<ScalingEvent, ExecutionError> {
        self.coordinator
            .emergency_scale_down(service_id, target)
            .await
    }

    pub async fn rollback(&self, service_id: &str) -> Result<Option<ScalingEvent>, ExecutionError> {
        self.coordinator.rollback_last(service_id).await
    }

    pub async fn predictions(&self, service_id: &str, horizon_minutes: u32) -> LoadPrediction {
        let history = self.engine.history_chronological(service_id).await;
        self.predictor
            .predict(service_id, &history, horizon_minutes, Utc::now())
    }

    pub async fn generate_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ScalingReport {
        self.reports.generate(start, end).await
    }
}
