use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interval::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    #[default]
    Pending,
    Loading,
    Completed,
    Failed,
}

/// Progress of one historical ingestion task, retained for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadingProgress {
    pub symbol: String,
    pub interval: Interval,
    pub status: LoadStatus,
    pub total_candles: usize,
    pub loaded_candles: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl LoadingProgress {
    pub fn new(symbol: &str, interval: Interval, total_candles: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval,
            status: LoadStatus::Pending,
            total_candles,
            loaded_candles: 0,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_candles == 0 {
            return 0.0;
        }
        (self.loaded_candles as f64 / self.total_candles as f64) * 100.0
    }
}

/// Per-symbol service state. A "primary" symbol participates in background
/// refresh; others are only served on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolState {
    pub symbol: String,
    pub loaded_intervals: BTreeSet<Interval>,
    pub last_update: Option<DateTime<Utc>>,
    pub is_primary: bool,
}

impl SymbolState {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            loaded_intervals: BTreeSet::new(),
            last_update: None,
            is_primary: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percent() {
        let mut progress = LoadingProgress::new("BTCUSDT", Interval::Min15, 200);
        assert_eq!(progress.progress_percent(), 0.0);
        progress.loaded_candles = 50;
        assert_eq!(progress.progress_percent(), 25.0);
    }

    #[test]
    fn zero_target_does_not_divide_by_zero() {
        let progress = LoadingProgress::new("BTCUSDT", Interval::Min15, 0);
        assert_eq!(progress.progress_percent(), 0.0);
    }

    #[test]
    fn load_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&LoadStatus::Completed).unwrap(),
            "\"completed\""
        );
    }
}
