use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    PreScale,
    PostScale,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::PreScale => write!(f, "pre_scale"),
            HookPhase::PostScale => write!(f, "post_scale"),
        }
    }
}

#[derive(Debug, Serialize)]
struct HookPayload<'a> {
    phase: HookPhase,
    service_id: &'a str,
    timestamp: DateTime<Utc>,
}

/// Pluggable notification seam around backend calls. Failures are the
/// caller's to log and surface; they must never abort a scaling.
#[async_trait]
pub trait HookSink: Send + Sync {
    async fn invoke(
        &self,
        phase: HookPhase,
        service_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;
}

/// POSTs the hook payload to each configured URL with a short deadline and
/// no retries.
pub struct HttpHookSink {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl HttpHookSink {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, urls }
    }
}

#[async_trait]
impl HookSink for HttpHookSink {
    async fn invoke(
        &self,
        phase: HookPhase,
        service_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let payload = HookPayload {
            phase,
            service_id,
            timestamp,
        };
        for url in &self.urls {
            debug!(%phase, service_id, url, "invoking scaling hook");
            self.client
                .post(url)
                .json(&payload)
                .send()
                .await?
                .error_for_status()?;
        }
        Ok(())
    }
}

/// Default sink when no hooks are configured.
pub struct NullHookSink;

#[async_trait]
impl HookSink for NullHookSink {
    async fn invoke(&self, _: HookPhase, _: &str, _: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}
