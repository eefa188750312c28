use async_trait::async_trait;
use common::BackendError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Outcome of one backend scale call. A timed-out wait is reported as
/// partial success with the last observed count and a warning, never as an
/// error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingResult {
    pub previous_instances: u32,
    pub new_instances: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDescription {
    pub provider: String,
    pub service_id: String,
    pub current_instances: u32,
    pub max_supported_instances: Option<u32>,
    pub supports_graceful_shutdown: bool,
}

/// The one mutation seam toward the outside world. `scale` blocks until the
/// backend reports the requested replica count ready, bounded by the hard
/// timeout in `BackendSettings`; retries belong to the next metrics tick,
/// never to the driver.
#[async_trait]
pub trait ScalingBackend: Send + Sync {
    async fn current_instances(&self, service_id: &str) -> Result<u32, BackendError>;
    async fn scale(&self, service_id: &str, target: u32) -> Result<ScalingResult, BackendError>;
    async fn describe(&self, service_id: &str) -> Result<BackendDescription, BackendError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub scale_timeout_s: u64,
    pub ready_poll_interval_ms: u64,
    pub request_timeout_s: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            auth_token: None,
            scale_timeout_s: 300,
            ready_poll_interval_ms: 2000,
            request_timeout_s: 10,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ReplicaCounts {
    desired: u32,
    ready: u32,
}

/// The wire plumbing the three HTTP drivers share: how to read replica
/// counts and how to request a new count.
#[async_trait]
trait ReplicaApi: Send + Sync {
    fn provider(&self) -> &'static str;
    fn settings(&self) -> &BackendSettings;
    async fn fetch_counts(&self, service_id: &str) -> Result<ReplicaCounts, BackendError>;
    async fn set_replicas(&self, service_id: &str, target: u32) -> Result<(), BackendError>;
}

fn net_error(e: &reqwest::Error, settings: &BackendSettings) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(settings.request_timeout_s)
    } else {
        BackendError::Unreachable(e.to_string())
    }
}

fn status_error(service_id: &str, status: reqwest::StatusCode) -> BackendError {
    if status == reqwest::StatusCode::NOT_FOUND {
        BackendError::ServiceNotFound(service_id.to_string())
    } else if status.is_client_error() {
        BackendError::Rejected(format!("status {}", status))
    } else {
        BackendError::Internal(format!("status {}", status))
    }
}

fn client_for(settings: &BackendSettings) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.request_timeout_s))
        .build()
        .unwrap_or_default()
}

fn authorize(
    request: reqwest::RequestBuilder,
    settings: &BackendSettings,
) -> reqwest::RequestBuilder {
    match &settings.auth_token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Block until the backend reports `target` ready replicas, or report
/// partial success once the hard deadline passes.
async fn scale_and_wait<A: ReplicaApi + ?Sized>(
    api: &A,
    service_id: &str,
    target: u32,
) -> Result<ScalingResult, BackendError> {
    let started = Instant::now();
    let before = api.fetch_counts(service_id).await?;
    api.set_replicas(service_id, target).await?;

    let deadline = Duration::from_secs(api.settings().scale_timeout_s);
    let poll = Duration::from_millis(api.settings().ready_poll_interval_ms.max(1));
    let mut last_ready = before.ready;

    loop {
        if started.elapsed() >= deadline {
            let warning = format!(
                "timed out after {}s waiting for {} ready instances of {}; last observed {}",
                api.settings().scale_timeout_s,
                target,
                service_id,
                last_ready
            );
            warn!(provider = api.provider(), service_id, "{}", warning);
            return Ok(ScalingResult {
                previous_instances: before.desired,
                new_instances: last_ready,
                duration_ms: started.elapsed().as_millis() as u64,
                warnings: vec![warning],
            });
        }

        tokio::time::sleep(poll).await;
        match api.fetch_counts(service_id).await {
            Ok(counts) => {
                last_ready = counts.ready;
                if counts.ready == target {
                    debug!(provider = api.provider(), service_id, target, "replicas ready");
                    return Ok(ScalingResult {
                        previous_instances: before.desired,
                        new_instances: target,
                        duration_ms: started.elapsed().as_millis() as u64,
                        warnings: Vec::new(),
                    });
                }
            }
            // readiness polls may hit transient errors; keep waiting until
            // the deadline decides
            Err(e) => warn!(
                provider = api.provider(),
                service_id,
                "readiness poll failed: {}",
                e
            ),
        }
    }
}

macro_rules! delegate_scaling_backend {
    ($driver:ty) => {
        #[async_trait]
        impl ScalingBackend for $driver {
            async fn current_instances(&self, service_id: &str) -> Result<u32, BackendError> {
                Ok(self.fetch_counts(service_id).await?.desired)
            }

            async fn scale(
                &self,
                service_id: &str,
                target: u32,
            ) -> Result<ScalingResult, BackendError> {
                scale_and_wait(self, service_id, target).await
            }

            async fn describe(&self, service_id: &str) -> Result<BackendDescription, BackendError> {
                let counts = self.fetch_counts(service_id).await?;
                Ok(BackendDescription {
                    provider: self.provider().to_string(),
                    service_id: service_id.to_string(),
                    current_instances: counts.desired,
                    max_supported_instances: None,
                    supports_graceful_shutdown: true,
                })
            }
        }
    };
}

/// Cluster-orchestrator driver speaking the scale subresource API.
pub struct OrchestratorBackend {
    client: reqwest::Client,
    settings: BackendSettings,
}

#[derive(Debug, Deserialize)]
struct OrchestratorScaleStatus {
    replicas: u32,
    #[serde(default)]
    ready_replicas: u32,
}

impl OrchestratorBackend {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            client: client_for(&settings),
            settings,
        }
    }

    fn scale_url(&self, service_id: &str) -> String {
        format!(
            "{}/apis/v1/services/{}/scale",
            self.settings.base_url.trim_end_matches('/'),
            service_id
        )
    }
}

#[async_trait]
impl ReplicaApi for OrchestratorBackend {
    fn provider(&self) -> &'static str {
        "orchestrator"
    }

    fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    async fn fetch_counts(&self, service_id: &str) -> Result<ReplicaCounts, BackendError> {
        let response = authorize(self.client.get(self.scale_url(service_id)), &self.settings)
            .send()
            .await
            .map_err(|e| net_error(&e, &self.settings))?;
        if !response.status().is_success() {
            return Err(status_error(service_id, response.status()));
        }
        let status: OrchestratorScaleStatus = response
            .json()
            .await
            .map_err(|e| BackendError::Internal(e.to_string()))?;
        Ok(ReplicaCounts {
            desired: status.replicas,
            ready: status.ready_replicas,
        })
    }

    async fn set_replicas(&self, service_id: &str, target: u32) -> Result<(), BackendError> {
        let response = authorize(self.client.put(self.scale_url(service_id)), &self.settings)
            .json(&serde_json::json!({ "replicas": target }))
            .send()
            .await
            .map_err(|e| net_error(&e, &self.settings))?;
        if !response.status().is_success() {
            return Err(status_error(service_id, response.status()));
        }
        Ok(())
    }
}

delegate_scaling_backend!(OrchestratorBackend);

/// Container-engine driver for hosts running services as labelled container
/// groups.
pub struct ContainerEngineBackend {
    client: reqwest::Client,
    settings: BackendSettings,
}

#[derive(Debug, Deserialize)]
struct EngineServiceState {
    replicas: u32,
    #[serde(default)]
    running: u32,
}

impl ContainerEngineBackend {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            client: client_for(&settings),
            settings,
        }
    }

    fn service_url(&self, service_id: &str) -> String {
        format!(
            "{}/v1/services/{}",
            self.settings.base_url.trim_end_matches('/'),
            service_id
        )
    }
}

#[async_trait]
impl ReplicaApi for ContainerEngineBackend {
    fn provider(&self) -> &'static str {
        "engine"
    }

    fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    async fn fetch_counts(&self, service_id: &str) -> Result<ReplicaCounts, BackendError> {
        let response = authorize(self.client.get(self.service_url(service_id)), &self.settings)
            .send()
            .await
            .map_err(|e| net_error(&e, &self.settings))?;
        if !response.status().is_success() {
            return Err(status_error(service_id, response.status()));
        }
        let state: EngineServiceState = response
            .json()
            .await
            .map_err(|e| BackendError::Internal(e.to_string()))?;
        Ok(ReplicaCounts {
            desired: state.replicas,
            ready: state.running,
        })
    }

    async fn set_replicas(&self, service_id: &str, target: u32) -> Result<(), BackendError> {
        let url = format!("{}/update", self.service_url(service_id));
        let response = authorize(self.client.post(url), &self.settings)
            .json(&serde_json::json!({ "replicas": target }))
            .send()
            .await
            .map_err(|e| net_error(&e, &self.settings))?;
        if !response.status().is_success() {
            return Err(status_error(service_id, response.status()));
        }
        Ok(())
    }
}

delegate_scaling_backend!(ContainerEngineBackend);

/// Cloud-provider driver working with managed instance fleets.
pub struct CloudBackend {
    client: reqwest::Client,
    settings: BackendSettings,
}

#[derive(Debug, Deserialize)]
struct FleetState {
    desired_capacity: u32,
    #[serde(default)]
    in_service: u32,
    #[serde(default)]
    max_size: Option<u32>,
}

impl CloudBackend {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            client: client_for(&settings),
            settings,
        }
    }

    fn fleet_url(&self, service_id: &str) -> String {
        format!(
            "{}/fleets/{}",
            self.settings.base_url.trim_end_matches('/'),
            service_id
        )
    }

    async fn fetch_state(&self, service_id: &str) -> Result<FleetState, BackendError> {
        let response = authorize(self.client.get(self.fleet_url(service_id)), &self.settings)
            .send()
            .await
            .map_err(|e| net_error(&e, &self.settings))?;
        if !response.status().is_success() {
            return Err(status_error(service_id, response.status()));
        }
        response
            .json()
            .await
            .map_err(|e| BackendError::Internal(e.to_string()))
    }
}

#[async_trait]
impl ReplicaApi for CloudBackend {
    fn provider(&self) -> &'static str {
        "cloud"
    }

    fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    async fn fetch_counts(&self, service_id: &str) -> Result<ReplicaCounts, BackendError> {
        let state = self.fetch_state(service_id).await?;
        Ok(ReplicaCounts {
            desired: state.desired_capacity,
            ready: state.in_service,
        })
    }

    async fn set_replicas(&self, service_id: &str, target: u32) -> Result<(), BackendError> {
        let url = format!("{}/capacity", self.fleet_url(service_id));
        let response = authorize(self.client.put(url), &self.settings)
            .json(&serde_json::json!({ "desired_capacity": target }))
            .send()
            .await
            .map_err(|e| net_error(&e, &self.settings))?;
        if !response.status().is_success() {
            return Err(status_error(service_id, response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl ScalingBackend for CloudBackend {
    async fn current_instances(&self, service_id: &str) -> Result<u32, BackendError> {
        Ok(self.fetch_counts(service_id).await?.desired)
    }

    async fn scale(&self, service_id: &str, target: u32) -> Result<ScalingResult, BackendError> {
        scale_and_wait(self, service_id, target).await
    }

    async fn describe(&self, service_id: &str) -> Result<BackendDescription, BackendError> {
        let state = self.fetch_state(service_id).await?;
        Ok(BackendDescription {
            provider: "cloud".to_string(),
            service_id: service_id.to_string(),
            current_instances: state.desired_capacity,
            max_supported_instances: state.max_size,
            supports_graceful_shutdown: false,
        })
    }
}

/// Simulated fleet used by tests and the simulation provider. Scales are
/// instant unless a delay is configured, and failures can be injected per
/// service.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    fleet: Arc<RwLock<HashMap<String, u32>>>,
    failures: Arc<RwLock<HashMap<String, BackendError>>>,
    scale_delay: Duration,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scale_delay(mut self, delay: Duration) -> Self {
        self.scale_delay = delay;
        self
    }

    pub async fn register_service(&self, service_id: &str, instances: u32) {
        self.fleet
            .write()
            .await
            .insert(service_id.to_string(), instances);
    }

    pub async fn fail_with(&self, service_id: &str, error: BackendError) {
        self.failures
            .write()
            .await
            .insert(service_id.to_string(), error);
    }

    pub async fn clear_failure(&self, service_id: &str) {
        self.failures.write().await.remove(service_id);
    }

    async fn check_failure(&self, service_id: &str) -> Result<(), BackendError> {
        if let Some(error) = self.failures.read().await.get(service_id) {
            return Err(error.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ScalingBackend for InMemoryBackend {
    async fn current_instances(&self, service_id: &str) -> Result<u32, BackendError> {
        self.check_failure(service_id).await?;
        self.fleet
            .read()
            .await
            .get(service_id)
            .copied()
            .ok_or_else(|| BackendError::ServiceNotFound(service_id.to_string()))
    }

    async fn scale(&self, service_id: &str, target: u32) -> Result<ScalingResult, BackendError> {
        let started = Instant::now();
        self.check_failure(service_id).await?;
        let previous = self.current_instances(service_id).await?;

        if !self.scale_delay.is_zero() {
            tokio::time::sleep(self.scale_delay).await;
        }
        self.fleet
            .write()
            .await
            .insert(service_id.to_string(), target);

        Ok(ScalingResult {
            previous_instances: previous,
            new_instances: target,
            duration_ms: started.elapsed().as_millis() as u64,
            warnings: Vec::new(),
        })
    }

    async fn describe(&self, service_id: &str) -> Result<BackendDescription, BackendError> {
        let current = self.current_instances(service_id).await?;
        Ok(BackendDescription {
            provider: "in-memory".to_string(),
            service_id: service_id.to_string(),
            current_instances: current,
            max_supported_instances: None,
            supports_graceful_shutdown: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_scale_round_trip() {
        let backend = InMemoryBackend::new();
        backend.register_service("svc-a", 4).await;

        let result = backend.scale("svc-a", 6).await.unwrap();
        assert_eq!(result.previous_instances, 4);
        assert_eq!(result.new_instances, 6);
        assert_eq!(backend.current_instances("svc-a").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn unknown_service_is_reported() {
        let backend = InMemoryBackend::new();
        assert!(matches!(
            backend.current_instances("ghost").await,
            Err(BackendError::ServiceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn injected_failures_surface() {
        let backend = InMemoryBackend::new();
        backend.register_service("svc-a", 4).await;
        backend
            .fail_with("svc-a", BackendError::Rejected("quota exceeded".to_string()))
            .await;
        assert!(matches!(
            backend.scale("svc-a", 6).await,
            Err(BackendError::Rejected(_))
        ));

        backend.clear_failure("svc-a").await;
        assert!(backend.scale("svc-a", 6).await.is_ok());
    }

    #[tokio::test]
    async fn http_driver_maps_connection_failures() {
        let backend = OrchestratorBackend::new(BackendSettings {
            base_url: "http://127.0.0.1:59998".to_string(),
            request_timeout_s: 1,
            ..BackendSettings::default()
        });
        assert!(matches!(
            backend.current_instances("svc-a").await,
            Err(BackendError::Unreachable(_) | BackendError::Timeout(_))
        ));
    }
}
