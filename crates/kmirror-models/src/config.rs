use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::interval::Interval;
use crate::market::MarketType;

/// Top-level configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MirrorConfig {
    pub store: StoreConfig,
    pub retention: RetentionConfig,
    pub adapter: AdapterConfig,
    pub service: ServiceConfig,
    pub monitor: MonitorConfig,
    pub repair: RepairConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the sqlite database file.
    pub db_path: String,
    /// Maximum rows the ingest queue will hold before `queue` rejects.
    pub queue_capacity: usize,
    /// Rows buffered before the writer flushes a batch.
    pub batch_size: usize,
    /// Milliseconds after the first buffered row before a forced flush.
    pub batch_flush_ms: u64,
    /// Seconds the writer gets to drain on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "data/kline_audit.db".to_string(),
            queue_capacity: 10_000,
            batch_size: 100,
            batch_flush_ms: 1_000,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Earliest date any candle may carry, `YYYY-MM-DD` (UTC midnight).
    pub global_min_date: String,
    /// Maximum span in days per (symbol, interval) pair.
    pub max_retention_days: i64,
    /// Days between retention sweeps.
    pub retention_check_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            global_min_date: "2025-01-01".to_string(),
            max_retention_days: 730,
            retention_check_days: 30,
        }
    }
}

impl RetentionConfig {
    /// `global_min_date` as epoch milliseconds at UTC midnight. Falls back
    /// to 2025-01-01 when the configured string is unparseable.
    pub fn global_min_ts(&self) -> i64 {
        let date = NaiveDate::parse_from_str(&self.global_min_date, "%Y-%m-%d")
            .unwrap_or_else(|_| NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        date.and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(1_735_689_600_000)
    }

    pub fn max_retention_ms(&self) -> i64 {
        self.max_retention_days * crate::interval::MS_PER_DAY
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub base_url: String,
    /// Per-request timeout for kline endpoints, seconds.
    pub kline_timeout_secs: u64,
    /// Per-request timeout for instrument discovery, seconds.
    pub instruments_timeout_secs: u64,
    /// Minimum delay between venue requests, milliseconds.
    pub rate_limit_ms: u64,
    /// Bound on transient-failure retries per request.
    pub retry_max_attempts: u32,
    pub retry_initial_secs: f64,
    pub retry_multiplier: f64,
    pub retry_cap_secs: f64,
    /// Instrument cache TTL, seconds.
    pub instruments_ttl_secs: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.bybit.com".to_string(),
            kline_timeout_secs: 2,
            instruments_timeout_secs: 5,
            rate_limit_ms: 100,
            retry_max_attempts: 3,
            retry_initial_secs: 1.0,
            retry_multiplier: 1.8,
            retry_cap_secs: 20.0,
            instruments_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Symbols initialized as primary when the daemon starts.
    pub symbols: Vec<String>,
    /// Primary interval used for the startup symbols.
    pub primary_interval: Interval,
    /// Candles kept in RAM per (symbol, interval) key.
    pub ram_limit: usize,
    /// Market the service reads and persists by default.
    pub market_type: MarketType,
    /// Background updater period, seconds.
    pub update_interval_secs: u64,
    /// Minimum spacing between periodic gap-repair passes, hours.
    pub repair_interval_hours: i64,
    /// Intervals always prepared when a symbol is initialized.
    pub required_intervals: Vec<Interval>,
    /// Target for intervals absent from `max_candles_to_load`.
    pub default_target_candles: usize,
    /// Neighboring timeframes pre-warmed per primary interval.
    pub adjacency: BTreeMap<Interval, Vec<Interval>>,
    /// Historical load target per interval.
    pub max_candles_to_load: BTreeMap<Interval, usize>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            primary_interval: Interval::Min15,
            ram_limit: 500,
            market_type: MarketType::Linear,
            update_interval_secs: 60,
            repair_interval_hours: 6,
            required_intervals: vec![Interval::Min1, Interval::Min60],
            default_target_candles: 5_000,
            adjacency: default_adjacency(),
            max_candles_to_load: default_load_targets(),
        }
    }
}

impl ServiceConfig {
    pub fn target_candles(&self, interval: Interval) -> usize {
        self.max_candles_to_load
            .get(&interval)
            .copied()
            .unwrap_or(self.default_target_candles)
    }
}

/// Each timeframe maps to its immediate neighbors so that selecting e.g.
/// a 15-minute primary also warms 5m and 30m for resampling and MTF use.
fn default_adjacency() -> BTreeMap<Interval, Vec<Interval>> {
    use Interval::*;
    BTreeMap::from([
        (Min1, vec![Min1, Min3, Min5]),
        (Min3, vec![Min1, Min3, Min5]),
        (Min5, vec![Min3, Min5, Min15]),
        (Min15, vec![Min5, Min15, Min30]),
        (Min30, vec![Min15, Min30, Min60]),
        (Min60, vec![Min30, Min60, Min120]),
        (Min120, vec![Min60, Min120, Min240]),
        (Min240, vec![Min120, Min240, Day]),
        (Day, vec![Min240, Day, Week]),
        (Week, vec![Day, Week]),
    ])
}

/// Roughly 12 months of bars per timeframe, capped for the sub-5-minute
/// ones where a year would be hundreds of thousands of rows.
fn default_load_targets() -> BTreeMap<Interval, usize> {
    use Interval::*;
    BTreeMap::from([
        (Min1, 10_000),
        (Min3, 10_000),
        (Min5, 10_000),
        (Min15, 35_040),
        (Min30, 17_520),
        (Min60, 8_760),
        (Min120, 4_380),
        (Min240, 2_190),
        (Day, 365),
        (Week, 104),
    ])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between quality sweeps over the active set.
    pub monitor_period_secs: u64,
    /// Percentage below which missing_data anomalies are emitted.
    pub completeness_threshold: f64,
    /// Data is stale when older than this many interval spans.
    pub freshness_multiplier: f64,
    /// Z-score threshold for the continuity layer.
    pub z_threshold: f64,
    /// Absolute price-gap percentage that is always critical.
    pub critical_gap_pct: f64,
    /// Absolute price-gap percentage escalating severity to high.
    pub high_gap_pct: f64,
    /// Expected outlier fraction for the isolation layer.
    pub outlier_contamination: f64,
    /// Skip the outlier layer below this many candles.
    pub outlier_min_candles: usize,
    /// Trees in the isolation forest.
    pub outlier_trees: usize,
    /// Seed for the isolation forest's RNG.
    pub outlier_seed: u64,
    /// Candles examined by the continuity and outlier layers.
    pub continuity_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitor_period_secs: 60,
            completeness_threshold: 95.0,
            freshness_multiplier: 2.0,
            z_threshold: 3.0,
            critical_gap_pct: 1.5,
            high_gap_pct: 0.8,
            outlier_contamination: 0.02,
            outlier_min_candles: 50,
            outlier_trees: 100,
            outlier_seed: 42,
            continuity_window: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Gaps handled per repair pass.
    pub max_gaps: usize,
    /// Milliseconds between venue calls inside a repair pass.
    pub rate_limit_delay_ms: u64,
    /// Candles of context fetched on each side of a defect.
    pub context_candles: i64,
    /// Leave Friday→Monday gaps alone (market closed).
    pub skip_weekends: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_gaps: 50,
            rate_limit_delay_ms: 200,
            context_candles: 3,
            skip_weekends: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_config() {
        let config: MirrorConfig = toml::from_str("").unwrap();
        assert_eq!(config.store.queue_capacity, 10_000);
        assert_eq!(config.store.batch_size, 100);
        assert_eq!(config.retention.max_retention_days, 730);
        assert_eq!(config.service.ram_limit, 500);
        assert_eq!(config.monitor.completeness_threshold, 95.0);
        assert!(config.repair.skip_weekends);
    }

    #[test]
    fn deserialize_partial_overrides() {
        let toml_str = r#"
[store]
db_path = "test/data.db"
batch_size = 25

[service]
ram_limit = 100
market_type = "spot"

[repair]
skip_weekends = false
"#;
        let config: MirrorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.db_path, "test/data.db");
        assert_eq!(config.store.batch_size, 25);
        // untouched fields keep their defaults
        assert_eq!(config.store.batch_flush_ms, 1_000);
        assert_eq!(config.service.ram_limit, 100);
        assert_eq!(config.service.market_type, MarketType::Spot);
        assert!(!config.repair.skip_weekends);
    }

    #[test]
    fn global_min_ts_is_2025() {
        let retention = RetentionConfig::default();
        assert_eq!(retention.global_min_ts(), 1_735_689_600_000);
    }

    #[test]
    fn bad_min_date_falls_back() {
        let retention = RetentionConfig {
            global_min_date: "not-a-date".to_string(),
            ..Default::default()
        };
        assert_eq!(retention.global_min_ts(), 1_735_689_600_000);
    }

    #[test]
    fn adjacency_covers_all_supported_intervals_except_sub_required() {
        let config = ServiceConfig::default();
        let neighbors = config.adjacency.get(&Interval::Min15).unwrap();
        assert_eq!(
            neighbors,
            &vec![Interval::Min5, Interval::Min15, Interval::Min30]
        );
    }

    #[test]
    fn load_target_falls_back_to_default() {
        let config = ServiceConfig::default();
        assert_eq!(config.target_candles(Interval::Min15), 35_040);
        assert_eq!(config.target_candles(Interval::Min360), 5_000);
    }

    #[test]
    fn roundtrip_config() {
        let config = MirrorConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: MirrorConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.store.db_path, config.store.db_path);
        assert_eq!(parsed.service.adjacency, config.service.adjacency);
    }
}
