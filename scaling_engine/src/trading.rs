use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use common::{ActionKind, ScalingDecision, TradingProfile};
use tracing::debug;

/// Applies the trading-domain pass to a draft decision, in fixed order:
/// redundancy floor, scale-down rate cap, approval annotation, then the
/// first matching calendar pattern. The final action is recomputed later by
/// the limit clamp, never here.
pub struct TradingPolicy {
    profile: TradingProfile,
}

impl TradingPolicy {
    pub fn new(profile: TradingProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &TradingProfile {
        &self.profile
    }

    pub fn apply(&self, decision: &mut ScalingDecision, now_local: NaiveDateTime) {
        let compliance = &self.profile.compliance;

        let floor = compliance.min_instances_for_redundancy;
        if decision.recommended_instances < floor {
            decision.recommended_instances = floor;
            decision.reasoning.push(format!(
                "raised to compliance redundancy floor of {} instances",
                floor
            ));
        }

        if decision.action == ActionKind::Down {
            let max_step = (f64::from(decision.current_instances)
                * compliance.max_scale_down_rate_pct
                / 100.0)
                .floor() as u32;
            let step = decision
                .current_instances
                .saturating_sub(decision.recommended_instances);
            if step > max_step {
                decision.recommended_instances = decision.current_instances - max_step;
                decision.reasoning.push(format!(
                    "scale-down step capped at {}% of current ({} instances)",
                    compliance.max_scale_down_rate_pct, max_step
                ));
            }
        }

        if decision.recommended_instances >= compliance.large_scale_approval_threshold {
            decision.reasoning.push(format!(
                "target of {} instances meets the large-scale threshold and requires manual approval",
                decision.recommended_instances
            ));
        }

        if self.in_market_hours(now_local.time()) {
            if let Some((name, multiplier)) = self.active_pattern(now_local) {
                let adjusted =
                    (f64::from(decision.recommended_instances) * multiplier).ceil() as u32;
                debug!(
                    service_id = %decision.service_id,
                    pattern = name,
                    multiplier,
                    "trading pattern adjustment"
                );
                decision.recommended_instances = adjusted;
                decision.reasoning.push(format!(
                    "{} pattern multiplier {:.2} applied",
                    name, multiplier
                ));
            }
        }
    }

    fn in_market_hours(&self, time: NaiveTime) -> bool {
        match (
            self.profile.market_hours.start_time(),
            self.profile.market_hours.end_time(),
        ) {
            (Some(start), Some(end)) => time >= start && time < end,
            _ => false,
        }
    }

    /// Strict, non-overlapping precedence: the first matching pattern wins
    /// and later ones are never consulted.
    fn active_pattern(&self, now: NaiveDateTime) -> Option<(&'static str, f64)> {
        let patterns = &self.profile.patterns;
        let month_end = now.day() >= 25;
        let quarter_month = matches!(now.month(), 3 | 6 | 9 | 12);

        if quarter_month && month_end {
            return Some(("quarter-end", patterns.quarter_end));
        }
        if month_end {
            return Some(("month-end", patterns.month_end));
        }

        let minutes = now.hour() * 60 + now.minute();
        if (9 * 60..9 * 60 + 30).contains(&minutes) {
            return Some(("opening-bell", patterns.opening_bell));
        }
        if (15 * 60 + 30..16 * 60).contains(&minutes) {
            return Some(("closing-bell", patterns.closing_bell));
        }
        if (12 * 60..13 * 60).contains(&minutes) {
            return Some(("lunch", patterns.lunch));
        }
        None
    }
}
