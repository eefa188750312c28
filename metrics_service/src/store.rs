use chrono::{DateTime, Utc};
use common::ServiceMetrics;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Latest-snapshot store, one entry per service. Writes replace the
/// snapshot atomically and publish the service id on a change channel;
/// reads clone under a shared lock so they never block writers for long
/// and a full snapshot is never torn across services.
#[derive(Clone)]
pub struct MetricStore {
    inner: Arc<RwLock<HashMap<String, ServiceMetrics>>>,
    changes: broadcast::Sender<String>,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    pub async fn put(&self, metrics: ServiceMetrics) {
        let service_id = metrics.service_id.clone();
        self.inner.write().await.insert(service_id.clone(), metrics);
        // nobody listening is fine
        let _ = self.changes.send(service_id);
    }

    pub async fn get(&self, service_id: &str) -> Option<ServiceMetrics> {
        self.inner.read().await.get(service_id).cloned()
    }

    /// Consistent view of every service at one instant.
    pub async fn snapshot(&self) -> HashMap<String, ServiceMetrics> {
        self.inner.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Age of each service's snapshot in seconds, for staleness reporting.
    pub async fn ages(&self, now: DateTime<Utc>) -> HashMap<String, i64> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(id, m)| (id.clone(), (now - m.captured_at).num_seconds()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn metrics(service_id: &str, cpu: f64) -> ServiceMetrics {
        let mut m = ServiceMetrics::new(service_id, Utc::now());
        m.resources.cpu_usage = cpu;
        m
    }

    #[tokio::test]
    async fn put_replaces_and_notifies() {
        let store = MetricStore::new();
        let mut rx = store.subscribe();

        store.put(metrics("svc-a", 10.0)).await;
        store.put(metrics("svc-a", 90.0)).await;

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("svc-a").await.unwrap().resources.cpu_usage, 90.0);
        assert_eq!(rx.recv().await.unwrap(), "svc-a");
        assert_eq!(rx.recv().await.unwrap(), "svc-a");
    }

    #[tokio::test]
    async fn snapshot_covers_all_services() {
        let store = MetricStore::new();
        store.put(metrics("svc-a", 10.0)).await;
        store.put(metrics("svc-b", 20.0)).await;

        let all = store.snapshot().await;
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("svc-a") && all.contains_key("svc-b"));
    }

    #[tokio::test]
    async fn ages_report_staleness() {
        let store = MetricStore::new();
        let mut m = metrics("svc-a", 10.0);
        m.captured_at = Utc::now() - Duration::seconds(120);
        store.put(m).await;

        let ages = store.ages(Utc::now()).await;
        assert!(*ages.get("svc-a").unwrap() >= 120);
    }
}
