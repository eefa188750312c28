use chrono::{DateTime, Duration, Utc};
use common::{
    lifecycle_channel, ActionKind, Comparison, ComplianceRules, CooldownGate, GlobalLimits,
    MarketHours, NullStateSink, PatternMultipliers, ScalingAction, ScalingCondition, ScalingRule,
    ServiceMetrics, Sizing, TradingProfile, Urgency,
};
use scaling_engine::{DecisionEngine, TradingPolicy};
use std::collections::HashSet;
use std::sync::Arc;

// multipliers of 1.0 keep the calendar pass inert so these scenarios are
// independent of the wall-clock the suite happens to run at
fn neutral_profile() -> TradingProfile {
    TradingProfile {
        market_hours: MarketHours::default(),
        patterns: PatternMultipliers {
            opening_bell: 1.0,
            closing_bell: 1.0,
            lunch: 1.0,
            month_end: 1.0,
            quarter_end: 1.0,
        },
        compliance: ComplianceRules {
            min_instances_for_redundancy: 2,
            max_scale_down_rate_pct: 50.0,
            large_scale_approval_threshold: 100,
        },
    }
}

fn limits() -> GlobalLimits {
    GlobalLimits {
        min_instances: 2,
        max_instances: 20,
        scale_up_cooldown_s: 300,
        scale_down_cooldown_s: 300,
    }
}

fn cpu_rule(id: &str, priority: i32, sizing: Sizing, kind: ActionKind) -> ScalingRule {
    ScalingRule {
        id: id.to_string(),
        name: format!("{} rule", id),
        enabled: true,
        priority,
        conditions: vec![ScalingCondition {
            metric_path: "cpu.usage".to_string(),
            comparison: Comparison::GreaterThan,
            threshold: 80.0,
            duration_seconds: 60,
        }],
        action: ScalingAction {
            kind,
            sizing,
            target_services: HashSet::new(),
            graceful_shutdown: false,
        },
        target_services: ["svc-a".to_string()].into_iter().collect(),
    }
}

fn engine_with(rules: Vec<ScalingRule>, gate: CooldownGate) -> DecisionEngine {
    let (events, _rx) = lifecycle_channel();
    DecisionEngine::new(
        rules,
        TradingPolicy::new(neutral_profile()),
        limits(),
        gate,
        events,
        Arc::new(NullStateSink),
    )
}

fn snapshot(cpu: f64, current: u32, at: DateTime<Utc>) -> ServiceMetrics {
    let mut m = ServiceMetrics::new("svc-a", at);
    m.resources.cpu_usage = cpu;
    m.instances.current = current;
    m.instances.healthy = current;
    m
}

#[tokio::test]
async fn sustained_cpu_breach_triggers_scale_up() {
    let gate = CooldownGate::new(limits());
    let engine = engine_with(
        vec![cpu_rule("cpu-up", 10, Sizing::Delta(2), ActionKind::Up)],
        gate,
    );
    let t0 = Utc::now();

    // the duration has not been earned yet at t=0 and t=30
    let d = engine.decide(&snapshot(85.0, 4, t0), t0).await;
    assert_eq!(d.action, ActionKind::Maintain);
    assert!(d.reasoning.iter().any(|r| r.contains("no scaling rules")));

    let t30 = t0 + Duration::seconds(30);
    let d = engine.decide(&snapshot(85.0, 4, t30), t30).await;
    assert_eq!(d.action, ActionKind::Maintain);

    // at t=60 the breach has been sustained for the full minute
    let t60 = t0 + Duration::seconds(60);
    let d = engine.decide(&snapshot(85.0, 4, t60), t60).await;
    assert_eq!(d.action, ActionKind::Up);
    assert_eq!(d.recommended_instances, 6);
    assert!((d.confidence - 0.0625).abs() < 1e-9);
    assert_eq!(d.urgency, Urgency::Low);
    assert_eq!(d.triggered_rule_ids, vec!["cpu-up".to_string()]);
    assert_eq!(d.metrics_used.get("cpu.usage"), Some(&85.0));
}

#[tokio::test]
async fn cooldown_suppresses_the_second_scale_up() {
    let gate = CooldownGate::new(limits());
    let engine = engine_with(
        vec![cpu_rule("cpu-up", 10, Sizing::Delta(2), ActionKind::Up)],
        gate.clone(),
    );
    let t0 = Utc::now();

    for offset in [0, 30, 60] {
        let t = t0 + Duration::seconds(offset);
        engine.decide(&snapshot(85.0, 4, t), t).await;
    }
    // the executor stamps the cooldown once the scale-up lands
    gate.stamp("svc-a", ActionKind::Up, t0 + Duration::seconds(60))
        .await;

    let t90 = t0 + Duration::seconds(90);
    let d = engine.decide(&snapshot(95.0, 6, t90), t90).await;
    assert_eq!(d.action, ActionKind::Maintain);
    assert!(d
        .reasoning
        .iter()
        .any(|r| r.contains("service in cooldown period")));
}

#[tokio::test]
async fn highest_priority_rule_wins() {
    let gate = CooldownGate::new(limits());
    let engine = engine_with(
        vec![
            cpu_rule("small-step", 5, Sizing::Delta(1), ActionKind::Up),
            cpu_rule("big-step", 10, Sizing::Delta(4), ActionKind::Up),
        ],
        gate,
    );
    let t0 = Utc::now();
    let t61 = t0 + Duration::seconds(61);
    engine.decide(&snapshot(90.0, 4, t0), t0).await;
    let d = engine.decide(&snapshot(90.0, 4, t61), t61).await;

    assert_eq!(d.action, ActionKind::Up);
    // both rules trigger, but the priority-10 sizing is used
    assert_eq!(d.recommended_instances, 8);
    assert_eq!(d.triggered_rule_ids.len(), 2);
}

#[tokio::test]
async fn priority_ties_break_by_first_appearance() {
    let gate = CooldownGate::new(limits());
    let engine = engine_with(
        vec![
            cpu_rule("first", 10, Sizing::Delta(1), ActionKind::Up),
            cpu_rule("second", 10, Sizing::Delta(4), ActionKind::Up),
        ],
        gate,
    );
    let t0 = Utc::now();
    let t61 = t0 + Duration::seconds(61);
    engine.decide(&snapshot(90.0, 4, t0), t0).await;
    let d = engine.decide(&snapshot(90.0, 4, t61), t61).await;
    assert_eq!(d.recommended_instances, 5);
}

#[tokio::test]
async fn recommendations_stay_inside_the_global_window() {
    let gate = CooldownGate::new(limits());
    let engine = engine_with(
        vec![cpu_rule(
            "explode",
            10,
            Sizing::Absolute(500),
            ActionKind::Up,
        )],
        gate,
    );
    let t0 = Utc::now();
    let t61 = t0 + Duration::seconds(61);
    engine.decide(&snapshot(90.0, 4, t0), t0).await;
    let d = engine.decide(&snapshot(90.0, 4, t61), t61).await;

    assert_eq!(d.recommended_instances, 20);
    assert_eq!(d.action, ActionKind::Up);
}

#[tokio::test]
async fn action_is_consistent_with_counts() {
    let gate = CooldownGate::new(limits());
    let engine = engine_with(
        vec![cpu_rule(
            "noop",
            10,
            Sizing::Absolute(4),
            ActionKind::Up,
        )],
        gate,
    );
    let t0 = Utc::now();
    let t61 = t0 + Duration::seconds(61);
    engine.decide(&snapshot(90.0, 4, t0), t0).await;
    // recommended == current, so the declared UP is recomputed to MAINTAIN
    let d = engine.decide(&snapshot(90.0, 4, t61), t61).await;
    assert_eq!(d.action, ActionKind::Maintain);
    assert_eq!(d.recommended_instances, d.current_instances);
}

#[tokio::test]
async fn kill_switch_forces_maintain() {
    let gate = CooldownGate::new(limits());
    let engine = engine_with(
        vec![cpu_rule("cpu-up", 10, Sizing::Delta(2), ActionKind::Up)],
        gate,
    );
    engine.set_enabled(false).await;

    let t0 = Utc::now();
    let d = engine.decide(&snapshot(99.0, 4, t0), t0).await;
    assert_eq!(d.action, ActionKind::Maintain);
    assert!(d.reasoning.iter().any(|r| r.contains("disabled")));
}

#[tokio::test]
async fn malformed_rule_is_disabled_for_the_process() {
    let gate = CooldownGate::new(limits());
    let mut empty = cpu_rule("empty", 50, Sizing::Delta(2), ActionKind::Up);
    empty.conditions.clear();
    let engine = engine_with(
        vec![empty, cpu_rule("cpu-up", 10, Sizing::Delta(2), ActionKind::Up)],
        gate,
    );
    assert!(engine.disabled_rule_ids().await.contains("empty"));

    let t0 = Utc::now();
    let t61 = t0 + Duration::seconds(61);
    engine.decide(&snapshot(90.0, 4, t0), t0).await;
    let d = engine.decide(&snapshot(90.0, 4, t61), t61).await;
    // the healthy rule still runs
    assert_eq!(d.action, ActionKind::Up);
    assert_eq!(d.triggered_rule_ids, vec!["cpu-up".to_string()]);
}

#[tokio::test]
async fn history_ring_returns_newest_first() {
    let gate = CooldownGate::new(limits());
    let engine = engine_with(
        vec![cpu_rule("cpu-up", 10, Sizing::Delta(2), ActionKind::Up)],
        gate,
    );
    let t0 = Utc::now();
    for offset in [0, 30, 60] {
        let t = t0 + Duration::seconds(offset);
        engine.decide(&snapshot(85.0, 4, t), t).await;
    }

    let history = engine.history("svc-a", 10).await;
    assert_eq!(history.len(), 3);
    assert!(history[0].timestamp > history[2].timestamp);
    assert_eq!(history[0].action, ActionKind::Up);

    let limited = engine.history("svc-a", 2).await;
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn manual_decision_runs_the_full_validation_path() {
    let gate = CooldownGate::new(limits());
    let engine = engine_with(Vec::new(), gate.clone());
    let t0 = Utc::now();

    // manual scale beyond the window is clamped like any other decision
    let d = engine.manual_decision("svc-a", 4, 500, t0).await;
    assert_eq!(d.recommended_instances, 20);
    assert_eq!(d.action, ActionKind::Up);
    assert_eq!(d.triggered_rule_ids, vec!["manual".to_string()]);

    // and the cooldown gate applies to operators too
    gate.stamp("svc-a", ActionKind::Up, t0).await;
    let d = engine
        .manual_decision("svc-a", 4, 8, t0 + Duration::seconds(10))
        .await;
    assert_eq!(d.action, ActionKind::Maintain);
}
