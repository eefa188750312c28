use crate::condition::ConditionTracker;
use crate::limits::clamp_to_limits;
use crate::rules::{RuleEvaluator, RuleVerdict};
use crate::trading::TradingPolicy;
use chrono::{DateTime, Local, Utc};
use common::{
    ActionKind, CooldownGate, GlobalLimits, LifecycleEvent, LifecycleSender, ScalingDecision,
    ScalingRule, ServiceMetrics, StateSink, Urgency,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

const DECISION_RING_CAPACITY: usize = 100;

/// Per-service transient state. Each service gets its own lock so the hot
/// path never serializes across services.
#[derive(Default)]
struct ServiceScratch {
    tracker: ConditionTracker,
    history: VecDeque<ScalingDecision>,
}

/// Orchestrates condition tracking, rule evaluation, the trading-domain
/// pass, and the limit clamp into one `ScalingDecision` per snapshot.
pub struct DecisionEngine {
    rules: RwLock<Vec<ScalingRule>>,
    disabled_rules: RwLock<HashSet<String>>,
    evaluator: RuleEvaluator,
    policy: TradingPolicy,
    limits: GlobalLimits,
    cooldowns: CooldownGate,
    enabled: RwLock<bool>,
    scratch: RwLock<HashMap<String, Arc<Mutex<ServiceScratch>>>>,
    events: LifecycleSender,
    sink: Arc<dyn StateSink>,
}

impl DecisionEngine {
    pub fn new(
        rules: Vec<ScalingRule>,
        policy: TradingPolicy,
        limits: GlobalLimits,
        cooldowns: CooldownGate,
        events: LifecycleSender,
        sink: Arc<dyn StateSink>,
    ) -> Self {
        let mut disabled = HashSet::new();
        for rule in &rules {
            // a structurally malformed rule stays disabled for the rest of
            // the process lifetime; the others keep running
            if rule.conditions.is_empty() {
                error!(rule_id = %rule.id, "rule has no conditions; disabling it permanently");
                disabled.insert(rule.id.clone());
            }
        }

        Self {
            rules: RwLock::new(rules),
            disabled_rules: RwLock::new(disabled),
            evaluator: RuleEvaluator::new(),
            policy,
            limits,
            cooldowns,
            enabled: RwLock::new(true),
            scratch: RwLock::new(HashMap::new()),
            events,
            sink,
        }
    }

    pub async fn set_enabled(&self, enabled: bool) {
        info!(enabled, "scaling kill switch updated");
        *self.enabled.write().await = enabled;
    }

    pub async fn is_enabled(&self) -> bool {
        *self.enabled.read().await
    }

    pub fn limits(&self) -> &GlobalLimits {
        &self.limits
    }

    pub async fn rules(&self) -> Vec<ScalingRule> {
        self.rules.read().await.clone()
    }

    pub async fn disabled_rule_ids(&self) -> HashSet<String> {
        self.disabled_rules.read().await.clone()
    }

    /// Evaluate every applicable rule against the snapshot and produce the
    /// decision for this tick.
    pub async fn decide(&self, metrics: &ServiceMetrics, now: DateTime<Utc>) -> ScalingDecision {
        let service_id = metrics.service_id.clone();
        let current = metrics.instances.current;

        if !self.is_enabled().await {
            return self
                .commit(ScalingDecision::maintain(
                    service_id,
                    current,
                    "scaling is disabled",
                    now,
                ))
                .await;
        }

        if self.cooldowns.in_cooldown(&service_id, now).await {
            debug!(service_id = %service_id, "decision short-circuited by cooldown");
            return self
                .commit(ScalingDecision::maintain(
                    service_id,
                    current,
                    "service in cooldown period",
                    now,
                ))
                .await;
        }

        let mut metrics_used = HashMap::new();
        let mut triggered: Vec<(ScalingRule, RuleVerdict)> = Vec::new();
        {
            let rules = self.rules.read().await;
            let disabled = self.disabled_rules.read().await;
            let scratch = self.scratch_for(&service_id).await;
            let mut scratch = scratch.lock().await;

            for rule in rules.iter() {
                if !rule.enabled || disabled.contains(&rule.id) || !rule.targets(&service_id) {
                    continue;
                }
                let verdict = self
                    .evaluator
                    .evaluate(&mut scratch.tracker, rule, metrics, now);
                for outcome in &verdict.conditions {
                    metrics_used.insert(outcome.metric_path.clone(), outcome.observed);
                }
                if verdict.triggered {
                    triggered.push((rule.clone(), verdict));
                }
            }
        }

        if triggered.is_empty() {
            let mut decision = ScalingDecision::maintain(
                service_id,
                current,
                "no scaling rules triggered",
                now,
            );
            decision.metrics_used = metrics_used;
            return self.commit(decision).await;
        }

        // highest priority wins; strictly-greater keeps the first
        // appearance on ties
        let mut best = 0;
        for (i, candidate) in triggered.iter().enumerate().skip(1) {
            if candidate.0.priority > triggered[best].0.priority {
                best = i;
            }
        }
        let triggered_rule_ids: Vec<String> =
            triggered.iter().map(|(r, _)| r.id.clone()).collect();
        let (rule, verdict) = &triggered[best];

        let mut decision = ScalingDecision {
            timestamp: now,
            service_id,
            current_instances: current,
            recommended_instances: rule.action.recommended_for(current),
            action: rule.action.kind,
            urgency: Urgency::from_confidence(verdict.confidence),
            confidence: verdict.confidence,
            reasoning: vec![format!(
                "rule '{}' triggered with confidence {:.2}",
                rule.name, verdict.confidence
            )],
            triggered_rule_ids,
            metrics_used,
        };

        self.policy
            .apply(&mut decision, now.with_timezone(&Local).naive_local());
        clamp_to_limits(&mut decision, &self.limits);

        self.commit(decision).await
    }

    /// Record a maintain decision produced outside rule evaluation, e.g. the
    /// stale-metrics fallback in the control loop.
    pub async fn record_maintain(
        &self,
        service_id: &str,
        current: u32,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ScalingDecision {
        self.commit(ScalingDecision::maintain(service_id, current, reason, now))
            .await
    }

    /// Operator-initiated decision. Runs the same validation pipeline as the
    /// automated path: cooldown gate, domain policy, limit clamp.
    pub async fn manual_decision(
        &self,
        service_id: &str,
        current: u32,
        target: u32,
        now: DateTime<Utc>,
    ) -> ScalingDecision {
        if !self.is_enabled().await {
            return self
                .commit(ScalingDecision::maintain(
                    service_id,
                    current,
                    "scaling is disabled",
                    now,
                ))
                .await;
        }
        if self.cooldowns.in_cooldown(service_id, now).await {
            return self
                .commit(ScalingDecision::maintain(
                    service_id,
                    current,
                    "service in cooldown period",
                    now,
                ))
                .await;
        }

        let mut decision = ScalingDecision {
            timestamp: now,
            service_id: service_id.to_string(),
            current_instances: current,
            recommended_instances: target,
            action: ActionKind::from_counts(current, target),
            urgency: Urgency::High,
            confidence: 1.0,
            reasoning: vec![format!("manual scale request to {} instances", target)],
            triggered_rule_ids: vec!["manual".to_string()],
            metrics_used: HashMap::new(),
        };
        self.policy
            .apply(&mut decision, now.with_timezone(&Local).naive_local());
        clamp_to_limits(&mut decision, &self.limits);
        self.commit(decision).await
    }

    /// Newest-first decision history for one service, capped by the ring.
    pub async fn history(&self, service_id: &str, limit: usize) -> Vec<ScalingDecision> {
        let Some(scratch) = self.scratch.read().await.get(service_id).cloned() else {
            return Vec::new();
        };
        let scratch = scratch.lock().await;
        scratch
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Oldest-first history, the shape the predictor consumes.
    pub async fn history_chronological(&self, service_id: &str) -> Vec<ScalingDecision> {
        let Some(scratch) = self.scratch.read().await.get(service_id).cloned() else {
            return Vec::new();
        };
        let scratch = scratch.lock().await;
        scratch.history.iter().cloned().collect()
    }

    /// Clear sustained-condition state after a worker restart; the history
    /// ring survives.
    pub async fn reset_transient(&self, service_id: &str) {
        if let Some(scratch) = self.scratch.read().await.get(service_id).cloned() {
            scratch.lock().await.tracker.reset_service(service_id);
        }
    }

    async fn scratch_for(&self, service_id: &str) -> Arc<Mutex<ServiceScratch>> {
        if let Some(existing) = self.scratch.read().await.get(service_id) {
            return existing.clone();
        }
        self.scratch
            .write()
            .await
            .entry(service_id.to_string())
            .or_default()
            .clone()
    }

    async fn commit(&self, decision: ScalingDecision) -> ScalingDecision {
        let scratch = self.scratch_for(&decision.service_id).await;
        {
            let mut scratch = scratch.lock().await;
            if scratch.history.len() == DECISION_RING_CAPACITY {
                scratch.history.pop_front();
            }
            scratch.history.push_back(decision.clone());
        }

        if let Err(e) = self.sink.record_decision(&decision).await {
            warn!(service_id = %decision.service_id, "failed to persist decision: {}", e);
        }
        let _ = self
            .events
            .send(LifecycleEvent::DecisionMade(decision.clone()));
        decision
    }
}
