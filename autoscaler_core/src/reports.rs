use chrono::{DateTime, Duration, Utc};
use common::ActionKind;
use execution_engine::ExecutionCoordinator;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Parse an interval-form schedule string: `"45s"`, `"30m"`, `"6h"`,
/// `"hourly"`, or `"daily"`.
pub fn parse_schedule(schedule: &str) -> Option<Duration> {
    match schedule.trim() {
        "hourly" => return Some(Duration::hours(1)),
        "daily" => return Some(Duration::days(1)),
        _ => {}
    }
    let schedule = schedule.trim();
    let (digits, unit) = schedule.split_at(schedule.len().checked_sub(1)?);
    let quantity: i64 = digits.parse().ok()?;
    if quantity <= 0 {
        return None;
    }
    match unit {
        "s" => Some(Duration::seconds(quantity)),
        "m" => Some(Duration::minutes(quantity)),
        "h" => Some(Duration::hours(quantity)),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceReportEntry {
    pub service_id: String,
    pub events: usize,
    pub successful: usize,
    pub failed: usize,
    pub scale_ups: usize,
    pub scale_downs: usize,
    pub last_instances: Option<u32>,
}

/// Execution summary over a half-open time window, with an advisory cost
/// figure. Pricing beyond this figure is out of scope.
#[derive(Debug, Clone, Serialize)]
pub struct ScalingReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub total_events: usize,
    pub successful_events: usize,
    pub failed_events: usize,
    pub success_rate: f64,
    pub scale_ups: usize,
    pub scale_downs: usize,
    pub advisory_cost: f64,
    pub services: Vec<ServiceReportEntry>,
}

pub struct ReportGenerator {
    coordinator: Arc<ExecutionCoordinator>,
    cost_per_instance_hour: f64,
}

impl ReportGenerator {
    pub fn new(coordinator: Arc<ExecutionCoordinator>, cost_per_instance_hour: f64) -> Self {
        Self {
            coordinator,
            cost_per_instance_hour,
        }
    }

    /// Aggregate the event rings over `[start, end)`.
    pub async fn generate(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ScalingReport {
        let events: Vec<_> = self
            .coordinator
            .all_events()
            .await
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp < end)
            .collect();

        let mut per_service: BTreeMap<String, ServiceReportEntry> = BTreeMap::new();
        for event in &events {
            let entry = per_service
                .entry(event.service_id.clone())
                .or_insert_with(|| ServiceReportEntry {
                    service_id: event.service_id.clone(),
                    events: 0,
                    successful: 0,
                    failed: 0,
                    scale_ups: 0,
                    scale_downs: 0,
                    last_instances: None,
                });
            entry.events += 1;
            if event.success {
                entry.successful += 1;
                entry.last_instances = Some(event.new_instances);
            } else {
                entry.failed += 1;
            }
            match event.action {
                ActionKind::Up => entry.scale_ups += 1,
                ActionKind::Down => entry.scale_downs += 1,
                ActionKind::Maintain => {}
            }
        }

        let successful_events = events.iter().filter(|e| e.success).count();
        let window_hours = ((end - start).num_seconds().max(0) as f64) / 3600.0;
        let advisory_cost = per_service
            .values()
            .filter_map(|s| s.last_instances)
            .map(|instances| f64::from(instances) * window_hours * self.cost_per_instance_hour)
            .sum();

        ScalingReport {
            window_start: start,
            window_end: end,
            generated_at: Utc::now(),
            total_events: events.len(),
            successful_events,
            failed_events: events.len() - successful_events,
            success_rate: if events.is_empty() {
                1.0
            } else {
                successful_events as f64 / events.len() as f64
            },
            scale_ups: events
                .iter()
                .filter(|e| e.action == ActionKind::Up)
                .count(),
            scale_downs: events
                .iter()
                .filter(|e| e.action == ActionKind::Down)
                .count(),
            advisory_cost,
            services: per_service.into_values().collect(),
        }
    }
}

type ReportCallback = Box<dyn Fn(&ScalingReport) + Send + Sync>;

/// Periodic report task: every schedule interval, generate a report over
/// the window since the previous run and fan it out to callbacks.
pub struct ReportScheduler {
    generator: Arc<ReportGenerator>,
    interval: Duration,
    callbacks: Vec<ReportCallback>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ReportScheduler {
    pub fn new(
        generator: Arc<ReportGenerator>,
        interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            generator,
            interval,
            callbacks: Vec::new(),
            shutdown_rx,
        }
    }

    pub fn on_report(mut self, callback: ReportCallback) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub async fn run(mut self) {
        let Ok(tick) = self.interval.to_std() else {
            warn!("report schedule interval out of range; reporting disabled");
            return;
        };
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick of a tokio interval fires immediately
        ticker.tick().await;
        let mut window_start = Utc::now();

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
            let window_end = Utc::now();
            let report = self.generator.generate(window_start, window_end).await;
            info!(
                events = report.total_events,
                success_rate = report.success_rate,
                "scaling report generated"
            );
            for callback in &self.callbacks {
                callback(&report);
            }
            window_start = window_end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedules_parse() {
        assert_eq!(parse_schedule("45s"), Some(Duration::seconds(45)));
        assert_eq!(parse_schedule("30m"), Some(Duration::minutes(30)));
        assert_eq!(parse_schedule("6h"), Some(Duration::hours(6)));
        assert_eq!(parse_schedule("hourly"), Some(Duration::hours(1)));
        assert_eq!(parse_schedule("daily"), Some(Duration::days(1)));
    }

    #[test]
    fn bad_schedules_are_rejected() {
        assert!(parse_schedule("").is_none());
        assert!(parse_schedule("0h").is_none());
        assert!(parse_schedule("-5m").is_none());
        assert!(parse_schedule("5x").is_none());
        assert!(parse_schedule("every tuesday").is_none());
    }
}
