use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Declarative scaling trigger: all conditions must hold (AND semantics)
/// before the action fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub priority: i32,
    pub conditions: Vec<ScalingCondition>,
    pub action: ScalingAction,
    pub target_services: HashSet<String>,
}

impl ScalingRule {
    /// Whether this rule can apply to the given service at all.
    pub fn targets(&self, service_id: &str) -> bool {
        self.target_services.contains(service_id)
            && (self.action.target_services.is_empty()
                || self.action.target_services.contains(service_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingCondition {
    pub metric_path: String,
    pub comparison: Comparison,
    pub threshold: f64,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    GreaterThan,
    LessThan,
    Equal,
    NotEqual,
}

impl Comparison {
    pub fn matches(self, observed: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => observed > threshold,
            Comparison::LessThan => observed < threshold,
            Comparison::Equal => (observed - threshold).abs() < f64::EPSILON,
            Comparison::NotEqual => (observed - threshold).abs() >= f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Up,
    Down,
    Maintain,
}

impl ActionKind {
    /// Recompute the action from the relation between a recommendation and
    /// the current count.
    pub fn from_counts(current: u32, recommended: u32) -> Self {
        match recommended.cmp(&current) {
            std::cmp::Ordering::Greater => ActionKind::Up,
            std::cmp::Ordering::Less => ActionKind::Down,
            std::cmp::Ordering::Equal => ActionKind::Maintain,
        }
    }
}

/// Exactly one sizing mode per action. Percent is interpreted as
/// `ceil(|current * pct / 100|)`, an absolute target derived from the
/// current count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sizing {
    Absolute(u32),
    Delta(i32),
    Percent(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingAction {
    pub kind: ActionKind,
    pub sizing: Sizing,
    #[serde(default)]
    pub target_services: HashSet<String>,
    #[serde(default)]
    pub graceful_shutdown: bool,
}

impl ScalingAction {
    pub fn recommended_for(&self, current: u32) -> u32 {
        match self.sizing {
            Sizing::Absolute(target) => target,
            Sizing::Delta(delta) => {
                let raw = i64::from(current) + i64::from(delta);
                u32::try_from(raw.max(0)).unwrap_or(u32::MAX)
            }
            Sizing::Percent(pct) => (f64::from(current) * pct / 100.0).abs().ceil() as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            Urgency::Critical
        } else if confidence >= 0.7 {
            Urgency::High
        } else if confidence >= 0.5 {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }
}

/// The outcome of one evaluation pass for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub timestamp: DateTime<Utc>,
    pub service_id: String,
    pub current_instances: u32,
    pub recommended_instances: u32,
    pub action: ActionKind,
    pub urgency: Urgency,
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub triggered_rule_ids: Vec<String>,
    pub metrics_used: HashMap<String, f64>,
}

impl ScalingDecision {
    pub fn maintain(
        service_id: impl Into<String>,
        current: u32,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            service_id: service_id.into(),
            current_instances: current,
            recommended_instances: current,
            action: ActionKind::Maintain,
            urgency: Urgency::Low,
            confidence: 0.0,
            reasoning: vec![reason.into()],
            triggered_rule_ids: Vec::new(),
            metrics_used: HashMap::new(),
        }
    }
}
