pub mod condition;
pub mod engine;
pub mod limits;
pub mod rules;
pub mod trading;

pub use condition::{ConditionProgress, ConditionTracker};
pub use engine::DecisionEngine;
pub use limits::clamp_to_limits;
pub use rules::{ConditionOutcome, RuleEvaluator, RuleVerdict};
pub use trading::TradingPolicy;
