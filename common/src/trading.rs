use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Domain configuration for trading workloads: exchange hours, calendar
/// load patterns, and compliance bounds.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TradingProfile {
    #[serde(default)]
    pub market_hours: MarketHours,
    #[serde(default)]
    pub patterns: PatternMultipliers,
    #[serde(default)]
    pub compliance: ComplianceRules,
}

/// Regular session bounds in exchange-local wall-clock time, "HH:MM".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketHours {
    pub start: String,
    pub end: String,
}

impl Default for MarketHours {
    fn default() -> Self {
        Self {
            start: "09:00".to_string(),
            end: "16:00".to_string(),
        }
    }
}

impl MarketHours {
    pub fn start_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.start, "%H:%M").ok()
    }

    pub fn end_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.end, "%H:%M").ok()
    }
}

/// Instance-count multipliers for the named intraday and calendar patterns.
/// Precedence when several windows overlap: quarter_end, month_end,
/// opening_bell, closing_bell, lunch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternMultipliers {
    pub opening_bell: f64,
    pub closing_bell: f64,
    pub lunch: f64,
    pub month_end: f64,
    pub quarter_end: f64,
}

impl Default for PatternMultipliers {
    fn default() -> Self {
        Self {
            opening_bell: 1.5,
            closing_bell: 1.4,
            lunch: 0.8,
            month_end: 1.3,
            quarter_end: 1.6,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceRules {
    pub min_instances_for_redundancy: u32,
    pub max_scale_down_rate_pct: f64,
    pub large_scale_approval_threshold: u32,
}

impl Default for ComplianceRules {
    fn default() -> Self {
        Self {
            min_instances_for_redundancy: 2,
            max_scale_down_rate_pct: 50.0,
            large_scale_approval_threshold: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_hours_parse() {
        let hours = MarketHours::default();
        assert_eq!(
            hours.start_time(),
            NaiveTime::from_hms_opt(9, 0, 0),
        );
        assert_eq!(
            hours.end_time(),
            NaiveTime::from_hms_opt(16, 0, 0),
        );
        let bad = MarketHours {
            start: "9am".to_string(),
            end: "close".to_string(),
        };
        assert!(bad.start_time().is_none());
        assert!(bad.end_time().is_none());
    }
}
