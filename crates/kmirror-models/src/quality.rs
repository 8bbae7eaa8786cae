use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::interval::Interval;

/// A missing stretch between two persisted candles.
///
/// Never persisted; computed on demand from the open_time sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gap {
    pub symbol: String,
    pub interval: Interval,
    /// open_time of the last candle before the hole.
    pub gap_start: i64,
    /// open_time of the first candle after the hole.
    pub gap_end: i64,
    pub missing_candles: i64,
    pub is_weekend: bool,
}

impl Gap {
    /// Friday-through-Monday holes are market closures, not data defects.
    /// Classified from the UTC weekday of both edges.
    pub fn classify_weekend(gap_start: i64, gap_end: i64) -> bool {
        let (Some(start), Some(end)) = (
            Utc.timestamp_millis_opt(gap_start).single(),
            Utc.timestamp_millis_opt(gap_end).single(),
        ) else {
            return false;
        };
        start.weekday().num_days_from_monday() >= 4 && end.weekday().num_days_from_monday() <= 1
    }

    pub fn severity(&self) -> Severity {
        gap_severity(self.missing_candles)
    }
}

/// Severity ladder for timestamp gaps.
pub fn gap_severity(missing_candles: i64) -> Severity {
    if missing_candles > 50 {
        Severity::Critical
    } else if missing_candles > 10 {
        Severity::High
    } else {
        Severity::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    MissingData,
    StaleData,
    PriceGap,
    Outlier,
}

/// One detected quality defect, possibly already repaired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub kind: AnomalyKind,
    pub symbol: String,
    pub interval: Interval,
    pub severity: Severity,
    pub description: String,
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    pub auto_repaired: bool,
}

impl AnomalyReport {
    pub fn new(
        kind: AnomalyKind,
        symbol: &str,
        interval: Interval,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            symbol: symbol.to_string(),
            interval,
            severity,
            description: description.into(),
            timestamp: None,
            details: serde_json::Value::Null,
            auto_repaired: false,
        }
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Outcome of one four-layer quality sweep over a (symbol, interval) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheckResult {
    pub symbol: String,
    pub interval: Interval,
    pub check_time: DateTime<Utc>,
    pub is_healthy: bool,
    pub completeness_pct: f64,
    pub freshness_ok: bool,
    pub continuity_issues: usize,
    pub outlier_count: usize,
    pub anomalies: Vec<AnomalyReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-01-03 is a Friday, 2025-01-06 a Monday.
    const FRI_MS: i64 = 1_735_862_400_000;
    const MON_MS: i64 = 1_736_121_600_000;
    const WED_MS: i64 = 1_735_689_600_000; // 2025-01-01, a Wednesday

    #[test]
    fn weekend_gap_classification() {
        assert!(Gap::classify_weekend(FRI_MS, MON_MS));
        // Saturday start also counts
        assert!(Gap::classify_weekend(FRI_MS + 86_400_000, MON_MS));
        // Midweek hole is a data defect
        assert!(!Gap::classify_weekend(WED_MS, WED_MS + 3_600_000));
        // Friday to Wednesday spans more than the closure window
        assert!(!Gap::classify_weekend(FRI_MS, MON_MS + 2 * 86_400_000));
    }

    #[test]
    fn severity_ladder() {
        assert_eq!(gap_severity(2), Severity::Medium);
        assert_eq!(gap_severity(11), Severity::High);
        assert_eq!(gap_severity(51), Severity::Critical);
    }

    #[test]
    fn severity_orders() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
    }

    #[test]
    fn anomaly_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AnomalyKind::MissingData).unwrap(),
            "\"missing_data\""
        );
        assert_eq!(
            serde_json::to_string(&AnomalyKind::PriceGap).unwrap(),
            "\"price_gap\""
        );
    }
}
