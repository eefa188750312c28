use chrono::{DateTime, Datelike, Local, Timelike, Utc, Weekday};
use common::ScalingDecision;
use serde::{Deserialize, Serialize};
use tracing::debug;

const FORECAST_POINTS: u32 = 10;
const TREND_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Direction plus a positive rate magnitude; the forecast signs the rate by
/// direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrendEstimate {
    pub direction: TrendDirection,
    pub rate: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionPoint {
    pub timestamp: DateTime<Utc>,
    pub predicted_load: f64,
    pub recommended_instances: u32,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadPrediction {
    pub service_id: String,
    pub generated_at: DateTime<Utc>,
    pub horizon_minutes: u32,
    pub trend: TrendEstimate,
    pub points: Vec<PredictionPoint>,
}

/// The load model constants, surfaced as tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub base_load: f64,
    pub load_per_instance: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            base_load: 100.0,
            load_per_instance: 25.0,
        }
    }
}

/// Extrapolates recent decision history and a weekly seasonal curve into a
/// forward instance recommendation curve of exactly ten points.
pub struct Predictor {
    config: PredictorConfig,
}

impl Default for Predictor {
    fn default() -> Self {
        Self::new(PredictorConfig::default())
    }
}

impl Predictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self { config }
    }

    /// `history` is chronological (oldest first), as the decision ring
    /// stores it.
    pub fn predict(
        &self,
        service_id: &str,
        history: &[ScalingDecision],
        horizon_minutes: u32,
        now: DateTime<Utc>,
    ) -> LoadPrediction {
        let trend = estimate_trend(history);
        debug!(
            service_id,
            direction = ?trend.direction,
            rate = trend.rate,
            "trend estimated"
        );

        let signed_rate = match trend.direction {
            TrendDirection::Increasing => trend.rate,
            TrendDirection::Decreasing => -trend.rate,
            TrendDirection::Stable => 0.0,
        };

        let spacing_minutes = f64::from(horizon_minutes) / f64::from(FORECAST_POINTS);
        let mut points = Vec::with_capacity(FORECAST_POINTS as usize);
        for i in 0..FORECAST_POINTS {
            let offset_minutes = spacing_minutes * f64::from(i + 1);
            let timestamp = now + chrono::Duration::seconds((offset_minutes * 60.0) as i64);
            let seasonal = seasonal_multiplier(timestamp);
            let predicted_load = self.config.base_load
                * seasonal
                * (1.0 + signed_rate * f64::from(i) / f64::from(FORECAST_POINTS));
            let recommended_instances =
                ((predicted_load / self.config.load_per_instance).ceil() as u32).max(1);
            let confidence = (1.0 - 0.05 * f64::from(i)).max(0.5);

            points.push(PredictionPoint {
                timestamp,
                predicted_load,
                recommended_instances,
                confidence,
            });
        }

        LoadPrediction {
            service_id: service_id.to_string(),
            generated_at: now,
            horizon_minutes,
            trend,
            points,
        }
    }
}

/// Half-over-half comparison of the recommended counts in the last ten
/// decisions.
fn estimate_trend(history: &[ScalingDecision]) -> TrendEstimate {
    let confidence = if history.len() >= 5 { 0.8 } else { 0.4 };
    if history.len() < 2 {
        return TrendEstimate {
            direction: TrendDirection::Stable,
            rate: 0.0,
            confidence,
        };
    }

    let window_start = history.len().saturating_sub(TREND_WINDOW);
    let window = &history[window_start..];
    let mid = window.len() / 2;
    let older = mean_recommended(&window[..mid]);
    let newer = mean_recommended(&window[mid..]);

    if older <= 0.0 {
        return TrendEstimate {
            direction: TrendDirection::Stable,
            rate: 0.0,
            confidence,
        };
    }

    if newer > older * 1.1 {
        TrendEstimate {
            direction: TrendDirection::Increasing,
            rate: (newer - older) / older,
            confidence,
        }
    } else if newer < older * 0.9 {
        TrendEstimate {
            direction: TrendDirection::Decreasing,
            rate: (older - newer) / older,
            confidence,
        }
    } else {
        TrendEstimate {
            direction: TrendDirection::Stable,
            rate: 0.0,
            confidence,
        }
    }
}

fn mean_recommended(decisions: &[ScalingDecision]) -> f64 {
    if decisions.is_empty() {
        return 0.0;
    }
    decisions
        .iter()
        .map(|d| f64::from(d.recommended_instances))
        .sum::<f64>()
        / decisions.len() as f64
}

/// Weekly seasonality: weekday business hours run hot, weekends run cold.
fn seasonal_multiplier(at: DateTime<Utc>) -> f64 {
    let local = at.with_timezone(&Local);
    let weekend = matches!(local.weekday(), Weekday::Sat | Weekday::Sun);
    if weekend {
        0.6
    } else if (9..17).contains(&local.hour()) {
        1.5
    } else {
        0.8
    }
}
