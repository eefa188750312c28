use chrono::{DateTime, Utc};
use common::ScalingCondition;
use std::collections::HashMap;

/// How far along one condition is toward its sustained-duration
/// requirement.
#[derive(Debug, Clone, Copy)]
pub struct ConditionProgress {
    pub satisfied: bool,
    pub elapsed_s: f64,
}

#[derive(Debug, Clone, Copy)]
struct ConditionState {
    threshold_met: bool,
    since: DateTime<Utc>,
}

/// Tracks, per (service, metric path), whether a threshold has been
/// continuously met and since when. A single blip on the wrong side of the
/// threshold resets the clock; there is no hysteresis beyond the duration
/// requirement itself.
#[derive(Debug, Default)]
pub struct ConditionTracker {
    states: HashMap<(String, String), ConditionState>,
}

impl ConditionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &mut self,
        service_id: &str,
        condition: &ScalingCondition,
        observed: f64,
        now: DateTime<Utc>,
    ) -> ConditionProgress {
        let key = (service_id.to_string(), condition.metric_path.clone());
        let met = condition.comparison.matches(observed, condition.threshold);

        if !met {
            self.states.insert(
                key,
                ConditionState {
                    threshold_met: false,
                    since: now,
                },
            );
            return ConditionProgress {
                satisfied: false,
                elapsed_s: 0.0,
            };
        }

        match self.states.get(&key) {
            Some(state) if state.threshold_met => {
                let elapsed_s = (now - state.since).num_milliseconds() as f64 / 1000.0;
                ConditionProgress {
                    satisfied: elapsed_s >= condition.duration_seconds as f64,
                    elapsed_s,
                }
            }
            _ => {
                // first breach arms the clock; the duration is not yet earned
                self.states.insert(
                    key,
                    ConditionState {
                        threshold_met: true,
                        since: now,
                    },
                );
                ConditionProgress {
                    satisfied: false,
                    elapsed_s: 0.0,
                }
            }
        }
    }

    /// Drop all transient state for one service, e.g. after its worker
    /// restarts.
    pub fn reset_service(&mut self, service_id: &str) {
        self.states.retain(|(sid, _), _| sid != service_id);
    }
}
