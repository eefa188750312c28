use common::{ActionKind, GlobalLimits, ScalingDecision};

/// Post-decision clamp: bound the recommendation to the global window, then
/// recompute the action from where the recommendation actually landed.
pub fn clamp_to_limits(decision: &mut ScalingDecision, limits: &GlobalLimits) {
    let clamped = decision
        .recommended_instances
        .clamp(limits.min_instances, limits.max_instances);
    if clamped != decision.recommended_instances {
        decision.reasoning.push(format!(
            "recommendation clamped from {} into the global window [{}, {}]",
            decision.recommended_instances, limits.min_instances, limits.max_instances
        ));
        decision.recommended_instances = clamped;
    }
    decision.action =
        ActionKind::from_counts(decision.current_instances, decision.recommended_instances);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn limits() -> GlobalLimits {
        GlobalLimits {
            min_instances: 2,
            max_instances: 20,
            ..GlobalLimits::default()
        }
    }

    fn draft(current: u32, recommended: u32) -> ScalingDecision {
        let mut d = ScalingDecision::maintain("svc-a", current, "draft", Utc::now());
        d.recommended_instances = recommended;
        d
    }

    #[test]
    fn clamps_both_ends() {
        let mut d = draft(4, 40);
        clamp_to_limits(&mut d, &limits());
        assert_eq!(d.recommended_instances, 20);
        assert_eq!(d.action, ActionKind::Up);

        let mut d = draft(4, 0);
        clamp_to_limits(&mut d, &limits());
        assert_eq!(d.recommended_instances, 2);
        assert_eq!(d.action, ActionKind::Down);
    }

    #[test]
    fn action_recomputed_from_final_counts() {
        // a raise to the floor can turn a scale-down into maintain
        let mut d = draft(2, 1);
        clamp_to_limits(&mut d, &limits());
        assert_eq!(d.recommended_instances, 2);
        assert_eq!(d.action, ActionKind::Maintain);
    }
}
