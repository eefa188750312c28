use async_trait::async_trait;
use chrono::Utc;
use common::{InstanceCounts, ServiceMetrics, SourceError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// One pull of service telemetry from an external probe. Adapters never
/// retry; the control loop owns retry cadence.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch(&self, service_id: &str) -> Result<ServiceMetrics, SourceError>;
}

/// Pulls a JSON snapshot from `{base_url}/{service_id}` with a per-call
/// deadline. Unknown fields in the payload are tolerated; missing required
/// fields or failed validation surface as a malformed poll.
pub struct HttpMetricSource {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpMetricSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }

    async fn fetch_inner(&self, service_id: &str) -> Result<ServiceMetrics, SourceError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), service_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::Unreachable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let mut metrics: ServiceMetrics = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        if metrics.service_id.is_empty() {
            metrics.service_id = service_id.to_string();
        } else if metrics.service_id != service_id {
            return Err(SourceError::Malformed(format!(
                "payload is for {}, requested {}",
                metrics.service_id, service_id
            )));
        }
        metrics.validate().map_err(SourceError::Malformed)?;
        Ok(metrics)
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    async fn fetch(&self, service_id: &str) -> Result<ServiceMetrics, SourceError> {
        match tokio::time::timeout(self.timeout, self.fetch_inner(service_id)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

/// Single-host probe backed by sysinfo, for services co-located with the
/// scaler. Instance counts are fixed at one; latency and error rate are
/// synthetic until a real probe is wired in.
pub struct LocalProbeSource {
    system: Mutex<sysinfo::System>,
}

impl Default for LocalProbeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalProbeSource {
    pub fn new() -> Self {
        let mut system = sysinfo::System::new_all();
        system.refresh_all();
        Self {
            system: Mutex::new(system),
        }
    }
}

#[async_trait]
impl MetricSource for LocalProbeSource {
    async fn fetch(&self, service_id: &str) -> Result<ServiceMetrics, SourceError> {
        let mut sys = self.system.lock().await;
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu_usage = f64::from(sys.global_cpu_info().cpu_usage()).clamp(0.0, 100.0);
        let total_memory = sys.total_memory() as f64;
        let used_memory = sys.used_memory() as f64;
        let memory_usage = if total_memory > 0.0 {
            (used_memory / total_memory) * 100.0
        } else {
            0.0
        };
        drop(sys);

        let mut metrics = ServiceMetrics::new(service_id, Utc::now());
        metrics.resources.cpu_usage = cpu_usage;
        metrics.resources.memory_usage = memory_usage;
        metrics.performance.response_time_ms = 5.0 + rand::random::<f64>() * 10.0;
        metrics.performance.error_rate = rand::random::<f64>() * 0.01;
        metrics.instances = InstanceCounts {
            current: 1,
            healthy: 1,
            unhealthy: 0,
        };
        Ok(metrics)
    }
}

/// Settable source used by tests and the simulation provider. Failures can
/// be injected per service and take precedence over stored snapshots.
#[derive(Default)]
pub struct InMemorySource {
    snapshots: RwLock<HashMap<String, ServiceMetrics>>,
    failures: RwLock<HashMap<String, SourceError>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_metrics(&self, metrics: ServiceMetrics) {
        self.snapshots
            .write()
            .await
            .insert(metrics.service_id.clone(), metrics);
    }

    pub async fn fail_with(&self, service_id: &str, error: SourceError) {
        self.failures
            .write()
            .await
            .insert(service_id.to_string(), error);
    }

    pub async fn clear_failure(&self, service_id: &str) {
        self.failures.write().await.remove(service_id);
    }
}

#[async_trait]
impl MetricSource for InMemorySource {
    async fn fetch(&self, service_id: &str) -> Result<ServiceMetrics, SourceError> {
        if let Some(error) = self.failures.read().await.get(service_id) {
            debug!(service_id, "returning injected source failure");
            return Err(error.clone());
        }
        self.snapshots
            .read()
            .await
            .get(service_id)
            .cloned()
            .ok_or_else(|| SourceError::Unreachable(format!("no snapshot for {}", service_id)))
    }
}
