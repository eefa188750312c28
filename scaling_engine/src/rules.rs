use crate::condition::ConditionTracker;
use chrono::{DateTime, Utc};
use common::{ScalingRule, ServiceMetrics};
use serde::Serialize;

/// Per-condition detail carried on a verdict, mostly for reasoning strings
/// and the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ConditionOutcome {
    pub metric_path: String,
    pub observed: f64,
    pub threshold: f64,
    pub satisfied: bool,
    pub elapsed_s: f64,
    pub magnitude: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleVerdict {
    pub rule_id: String,
    pub triggered: bool,
    pub confidence: f64,
    pub conditions: Vec<ConditionOutcome>,
}

/// Evaluates one rule against one snapshot. AND semantics: every condition
/// must have earned its duration for the rule to trigger.
#[derive(Debug, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        tracker: &mut ConditionTracker,
        rule: &ScalingRule,
        metrics: &ServiceMetrics,
        now: DateTime<Utc>,
    ) -> RuleVerdict {
        let mut conditions = Vec::with_capacity(rule.conditions.len());
        let mut all_satisfied = !rule.conditions.is_empty();
        let mut magnitude_sum = 0.0;

        for condition in &rule.conditions {
            let observed = metrics.value_at(&condition.metric_path);
            let progress = tracker.evaluate(&metrics.service_id, condition, observed, now);

            // satisfied conditions contribute how far past the threshold the
            // observation sits, normalized; unsatisfied contribute nothing
            let magnitude = if progress.satisfied {
                ((observed - condition.threshold).abs() / condition.threshold.max(1.0)).min(1.0)
            } else {
                0.0
            };
            magnitude_sum += magnitude;
            all_satisfied &= progress.satisfied;

            conditions.push(ConditionOutcome {
                metric_path: condition.metric_path.clone(),
                observed,
                threshold: condition.threshold,
                satisfied: progress.satisfied,
                elapsed_s: progress.elapsed_s,
                magnitude,
            });
        }

        let confidence = if conditions.is_empty() {
            0.0
        } else {
            (magnitude_sum / conditions.len() as f64).clamp(0.0, 1.0)
        };

        RuleVerdict {
            rule_id: rule.id.clone(),
            triggered: all_satisfied,
            confidence,
            conditions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{ActionKind, Comparison, ScalingAction, ScalingCondition, Sizing};
    use std::collections::HashSet;

    fn rule(conditions: Vec<ScalingCondition>) -> ScalingRule {
        ScalingRule {
            id: "r1".to_string(),
            name: "cpu pressure".to_string(),
            enabled: true,
            priority: 10,
            conditions,
            action: ScalingAction {
                kind: ActionKind::Up,
                sizing: Sizing::Delta(2),
                target_services: HashSet::new(),
                graceful_shutdown: false,
            },
            target_services: ["svc-a".to_string()].into_iter().collect(),
        }
    }

    fn condition(path: &str, threshold: f64, duration: u64) -> ScalingCondition {
        ScalingCondition {
            metric_path: path.to_string(),
            comparison: Comparison::GreaterThan,
            threshold,
            duration_seconds: duration,
        }
    }

    fn snapshot(cpu: f64, queue: f64) -> ServiceMetrics {
        let mut m = ServiceMetrics::new("svc-a", Utc::now());
        m.resources.cpu_usage = cpu;
        m.performance.queue_length = queue;
        m
    }

    #[test]
    fn confidence_is_normalized_distance_from_threshold() {
        let evaluator = RuleEvaluator::new();
        let mut tracker = ConditionTracker::new();
        let r = rule(vec![condition("cpu.usage", 80.0, 0)]);
        let t0 = Utc::now();

        // first pass arms the duration clock
        let v = evaluator.evaluate(&mut tracker, &r, &snapshot(85.0, 0.0), t0);
        assert!(!v.triggered);

        let v = evaluator.evaluate(
            &mut tracker,
            &r,
            &snapshot(85.0, 0.0),
            t0 + Duration::seconds(1),
        );
        assert!(v.triggered);
        assert!((v.confidence - 0.0625).abs() < 1e-9);
    }

    #[test]
    fn and_semantics_require_every_condition() {
        let evaluator = RuleEvaluator::new();
        let mut tracker = ConditionTracker::new();
        let r = rule(vec![
            condition("cpu.usage", 80.0, 0),
            condition("performance.queueLength", 100.0, 0),
        ]);
        let t0 = Utc::now();

        evaluator.evaluate(&mut tracker, &r, &snapshot(85.0, 150.0), t0);
        // cpu holds, queue drops below threshold
        let v = evaluator.evaluate(
            &mut tracker,
            &r,
            &snapshot(85.0, 50.0),
            t0 + Duration::seconds(1),
        );
        assert!(!v.triggered);

        // unsatisfied conditions drag the mean down to half of cpu's magnitude
        let satisfied_magnitude: f64 = v.conditions[0].magnitude;
        assert!((v.confidence - satisfied_magnitude / 2.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_metric_path_reads_zero() {
        let evaluator = RuleEvaluator::new();
        let mut tracker = ConditionTracker::new();
        let r = rule(vec![condition("disk.iops", 100.0, 0)]);
        let v = evaluator.evaluate(&mut tracker, &r, &snapshot(85.0, 0.0), Utc::now());
        assert!(!v.triggered);
        assert_eq!(v.conditions[0].observed, 0.0);
    }

    #[test]
    fn empty_rule_never_triggers() {
        let evaluator = RuleEvaluator::new();
        let mut tracker = ConditionTracker::new();
        let v = evaluator.evaluate(&mut tracker, &rule(vec![]), &snapshot(85.0, 0.0), Utc::now());
        assert!(!v.triggered);
        assert_eq!(v.confidence, 0.0);
    }

    #[test]
    fn confidence_caps_at_one() {
        let evaluator = RuleEvaluator::new();
        let mut tracker = ConditionTracker::new();
        // threshold below 1 normalizes against 1.0
        let r = rule(vec![condition("performance.errorRate", 0.05, 0)]);
        let mut m = snapshot(0.0, 0.0);
        m.performance.error_rate = 5.0;
        let t0 = Utc::now();
        evaluator.evaluate(&mut tracker, &r, &m, t0);
        let v = evaluator.evaluate(&mut tracker, &r, &m, t0 + Duration::seconds(1));
        assert!(v.triggered);
        assert_eq!(v.confidence, 1.0);
    }
}
