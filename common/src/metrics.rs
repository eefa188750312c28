use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Latest telemetry snapshot for one monitored service. Snapshots replace
/// each other on every poll; nothing here accumulates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub service_id: String,
    pub captured_at: DateTime<Utc>,
    pub resources: ResourceMetrics,
    pub performance: PerformanceMetrics,
    pub instances: InstanceCounts,
    #[serde(default)]
    pub custom: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub network_in: f64,
    pub network_out: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub response_time_ms: f64,
    pub throughput_rps: f64,
    pub error_rate: f64,
    pub queue_length: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InstanceCounts {
    pub current: u32,
    pub healthy: u32,
    pub unhealthy: u32,
}

impl ServiceMetrics {
    pub fn new(service_id: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            service_id: service_id.into(),
            captured_at,
            resources: ResourceMetrics::default(),
            performance: PerformanceMetrics::default(),
            instances: InstanceCounts::default(),
            custom: HashMap::new(),
        }
    }

    /// Resolve a dotted metric path against this snapshot. Unknown paths
    /// resolve to 0.0 so a misconfigured rule can never take a poll down.
    pub fn value_at(&self, path: &str) -> f64 {
        match path {
            "cpu.usage" => self.resources.cpu_usage,
            "memory.usage" => self.resources.memory_usage,
            "network.in" => self.resources.network_in,
            "network.out" => self.resources.network_out,
            "performance.responseTime" => self.performance.response_time_ms,
            "performance.throughput" => self.performance.throughput_rps,
            "performance.errorRate" => self.performance.error_rate,
            "performance.queueLength" => self.performance.queue_length,
            "instances.current" => f64::from(self.instances.current),
            "instances.healthy" => f64::from(self.instances.healthy),
            "instances.unhealthy" => f64::from(self.instances.unhealthy),
            other => {
                let name = other.strip_prefix("custom.").unwrap_or(other);
                self.custom.get(name).copied().unwrap_or(0.0)
            }
        }
    }

    /// Structural validation applied by source adapters before a snapshot is
    /// accepted. Percentages must sit in [0, 100] and instance counts must
    /// be coherent.
    pub fn validate(&self) -> Result<(), String> {
        if self.service_id.is_empty() {
            return Err("service_id is empty".to_string());
        }
        for (name, value) in [
            ("cpu_usage", self.resources.cpu_usage),
            ("memory_usage", self.resources.memory_usage),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(format!("{} out of range: {}", name, value));
            }
        }
        for (name, value) in [
            ("network_in", self.resources.network_in),
            ("network_out", self.resources.network_out),
            ("response_time_ms", self.performance.response_time_ms),
            ("throughput_rps", self.performance.throughput_rps),
            ("error_rate", self.performance.error_rate),
            ("queue_length", self.performance.queue_length),
        ] {
            if value < 0.0 || !value.is_finite() {
                return Err(format!("{} is negative or not finite: {}", name, value));
            }
        }
        let counts = self.instances;
        if u64::from(counts.healthy) + u64::from(counts.unhealthy) > u64::from(counts.current) {
            return Err(format!(
                "instance counts incoherent: healthy {} + unhealthy {} > current {}",
                counts.healthy, counts.unhealthy, counts.current
            ));
        }
        Ok(())
    }
}
