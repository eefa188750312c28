use autoscaler_core::{
    parse_schedule, AdminSurface, AutoscalerConfig, Provider, ReportGenerator, ReportScheduler,
    Supervisor,
};
use common::{
    lifecycle_channel, CooldownGate, LifecycleEvent, NullStateSink, StateSink,
};
use execution_engine::{
    ActiveScalings, CloudBackend, ContainerEngineBackend, ExecutionCoordinator, HookSink,
    HttpHookSink, NullHookSink, OrchestratorBackend, ScalingBackend,
};
use metrics_service::{HttpMetricSource, MetricStore};
use prediction_engine::Predictor;
use scaling_engine::{DecisionEngine, TradingPolicy};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();
    tracing::info!("Autoscaler kernel starting...");

    let config_path = std::env::var("AUTOSCALER_CONFIG")
        .unwrap_or_else(|_| "config/autoscaler.json".to_string());
    let config = match AutoscalerConfig::from_file(Path::new(&config_path)) {
        Ok(config) => {
            tracing::info!(path = %config_path, services = config.services.len(), "configuration loaded");
            config
        }
        Err(e) => {
            tracing::warn!(path = %config_path, "could not load configuration ({}); using defaults", e);
            AutoscalerConfig::default()
        }
    };

    let (events_tx, _events_rx) = lifecycle_channel();
    let store = MetricStore::new();
    let source = Arc::new(HttpMetricSource::new(
        config.metrics.source_url.clone(),
        Duration::from_secs(config.metrics.poll_timeout_s),
    ));

    let backend: Arc<dyn ScalingBackend> = match config.scaling.provider {
        Provider::Orchestrator => Arc::new(OrchestratorBackend::new(config.backend.clone())),
        Provider::Engine => Arc::new(ContainerEngineBackend::new(config.backend.clone())),
        Provider::Cloud => Arc::new(CloudBackend::new(config.backend.clone())),
    };
    let hooks: Arc<dyn HookSink> = if config.hooks.urls.is_empty() {
        Arc::new(NullHookSink)
    } else {
        Arc::new(HttpHookSink::new(
            config.hooks.urls.clone(),
            Duration::from_millis(config.hooks.timeout_ms),
        ))
    };

    let gate = CooldownGate::new(config.scaling.limits);
    let sink: Arc<dyn StateSink> = Arc::new(NullStateSink);

    let engine = Arc::new(DecisionEngine::new(
        config.scaling.rules.clone(),
        TradingPolicy::new(config.trading.clone()),
        config.scaling.limits,
        gate.clone(),
        events_tx.clone(),
        sink.clone(),
    ));
    engine.set_enabled(config.scaling.enabled).await;

    let coordinator = Arc::new(ExecutionCoordinator::new(
        backend,
        hooks,
        gate,
        config.scaling.limits,
        config.trading.compliance.min_instances_for_redundancy,
        ActiveScalings::new(),
        events_tx.clone(),
        sink,
    ));

    let supervisor = Arc::new(Supervisor::new(
        config.clone(),
        store.clone(),
        source,
        engine.clone(),
        coordinator.clone(),
        events_tx.clone(),
    ));

    let reports = Arc::new(ReportGenerator::new(
        coordinator.clone(),
        config.reporting.cost_per_instance_hour,
    ));
    // the admin surface is what an external HTTP layer mounts; the kernel
    // itself only uses it for the periodic health line below
    let admin = Arc::new(AdminSurface::new(
        config.services.clone(),
        store.clone(),
        engine.clone(),
        coordinator.clone(),
        Predictor::new(config.predictor),
        reports.clone(),
        supervisor.phases(),
        supervisor.source_failures(),
    ));

    let (scheduler_shutdown_tx, scheduler_shutdown_rx) = watch::channel(false);
    let report_interval =
        parse_schedule(&config.reporting.schedule).unwrap_or_else(|| chrono::Duration::hours(6));
    let scheduler = ReportScheduler::new(reports, report_interval, scheduler_shutdown_rx)
        .on_report(Box::new(|report| {
            tracing::info!(
                window_start = %report.window_start,
                events = report.total_events,
                success_rate = report.success_rate,
                advisory_cost = report.advisory_cost,
                "scaling report"
            );
        }));
    let scheduler_handle = task::spawn(scheduler.run());

    if config.alerts.enabled {
        spawn_alert_forwarder(&events_tx);
    }

    {
        let admin = admin.clone();
        task::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let health = admin.health().await;
                tracing::info!(
                    enabled = health.scaling_enabled,
                    active_scalings = health.active_scalings,
                    services = health.services.len(),
                    "health"
                );
            }
        });
    }

    let run_handle = {
        let supervisor = supervisor.clone();
        task::spawn(async move { supervisor.run().await })
    };

    tokio::select! {
        _ = run_handle => tracing::warn!("control loop exited"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            supervisor.shutdown().await;
        }
    }

    let _ = scheduler_shutdown_tx.send(true);
    let _ = scheduler_handle.await;
    tracing::info!("Autoscaler kernel stopped.");
    Ok(())
}

/// Route failure events to the operator log. Real alert delivery (webhook,
/// chat, email) subscribes to the same bus outside the core; a lagging
/// subscriber here just loses the oldest messages.
fn spawn_alert_forwarder(events_tx: &common::LifecycleSender) {
    let mut rx = events_tx.subscribe();
    task::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(LifecycleEvent::ScalingFailed(event)) => tracing::warn!(
                    service_id = %event.service_id,
                    error = event.error.as_deref().unwrap_or("unknown"),
                    "ALERT scaling failed"
                ),
                Ok(LifecycleEvent::MetricsError {
                    service_id,
                    message,
                }) => {
                    tracing::warn!(service_id = %service_id, "ALERT metrics error: {}", message)
                }
                Ok(LifecycleEvent::HookFailed {
                    service_id, phase, ..
                }) => {
                    tracing::warn!(service_id = %service_id, phase = %phase, "ALERT hook failed")
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("alert stream lagged by {} events", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
