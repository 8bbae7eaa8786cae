//! Gap detection and repair against a file-backed store and a scripted
//! venue: weekday holes close, weekend holes are left alone, and the
//! quality monitor's dispatch path re-fetches bad candles.
//!
//! Run with:
//! ```bash
//! cargo test -p kmirror-service --test repair_flow
//! ```

use std::sync::Arc;
use std::time::Duration;

use kmirror_models::{Interval, MarketType, MonitorConfig, RepairConfig, Severity, StoreConfig};
use kmirror_service::test_support::{series_ending_at, series_with_hole, MockSource};
use kmirror_service::{DataQualityMonitor, GapRepairEngine};
use kmirror_store::KlineStore;

// 2025-01-08 00:00 UTC, a Wednesday.
const WED_MS: i64 = 1_736_294_400_000;
// 2025-01-03 00:00 UTC (Friday) and 2025-01-06 00:00 UTC (Monday).
const FRI_MS: i64 = 1_735_862_400_000;
const MON_MS: i64 = 1_736_121_600_000;

struct Harness {
    store: Arc<KlineStore>,
    source: Arc<MockSource>,
    repair: Arc<GapRepairEngine>,
    monitor: Arc<DataQualityMonitor>,
    _dir: tempfile::TempDir,
}

fn build(repair_config: RepairConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store_config = StoreConfig {
        db_path: dir.path().join("repair.db").to_str().unwrap().to_string(),
        ..StoreConfig::default()
    };
    let store = Arc::new(KlineStore::open(store_config).unwrap());
    let source = Arc::new(MockSource::new());
    let repair = Arc::new(GapRepairEngine::new(
        store.clone(),
        source.clone(),
        repair_config,
        MarketType::Linear,
    ));
    let monitor = Arc::new(DataQualityMonitor::new(
        store.clone(),
        source.clone(),
        repair.clone(),
        MonitorConfig::default(),
        MarketType::Linear,
    ));
    Harness {
        store,
        source,
        repair,
        monitor,
        _dir: dir,
    }
}

async fn drain(store: &KlineStore) {
    for _ in 0..50 {
        if store.stats().pending_rows == 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("store did not drain in time");
}

#[tokio::test]
async fn weekday_hole_is_found_and_repaired() {
    let harness = build(RepairConfig::default());
    let interval = Interval::Min5;
    let span = interval.ms();

    // 200 five-minute candles ending Wednesday midnight with a 60-minute
    // hole in the middle (12 candles missing).
    let full = series_ending_at(interval, WED_MS, 200);
    let hole_start = WED_MS - 100 * span;
    let hole_end = hole_start + 13 * span;
    let holey = series_with_hole(interval, WED_MS, 200, hole_start, hole_end);
    assert_eq!(full.len() - holey.len(), 12);

    harness
        .store
        .queue("XRPUSDT", interval, MarketType::Linear, &holey)
        .unwrap();
    drain(&harness.store).await;

    // The venue still has the complete series.
    harness.source.set_series("XRPUSDT", interval, full);

    let gaps = harness
        .repair
        .find_timestamp_gaps("XRPUSDT", interval, 50, true)
        .unwrap();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].missing_candles, 12);
    assert!(!gaps[0].is_weekend);
    assert_eq!(gaps[0].severity(), Severity::High);

    let run = harness
        .repair
        .repair_all_gaps("XRPUSDT", interval, 50)
        .await
        .unwrap();
    assert_eq!(run.gaps_found, 1);
    assert_eq!(run.gaps_repaired, 1);
    assert_eq!(run.candles_written, 12);

    drain(&harness.store).await;
    let coverage = harness
        .store
        .get_coverage("XRPUSDT", interval, MarketType::Linear)
        .unwrap()
        .unwrap();
    assert_eq!(coverage.count, 200, "the hole must be fully closed");

    let remaining = harness
        .repair
        .find_timestamp_gaps("XRPUSDT", interval, 50, true)
        .unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn two_candle_gap_repairs_exactly_two() {
    let harness = build(RepairConfig::default());
    let interval = Interval::Min1;
    let span = interval.ms();

    let full = series_ending_at(interval, WED_MS, 60);
    let hole_start = WED_MS - 30 * span;
    let hole_end = hole_start + 3 * span;
    let holey = series_with_hole(interval, WED_MS, 60, hole_start, hole_end);
    assert_eq!(full.len() - holey.len(), 2);

    harness
        .store
        .queue("ADAUSDT", interval, MarketType::Linear, &holey)
        .unwrap();
    drain(&harness.store).await;
    harness.source.set_series("ADAUSDT", interval, full);

    let run = harness
        .repair
        .repair_all_gaps("ADAUSDT", interval, 50)
        .await
        .unwrap();
    assert_eq!(run.candles_written, 2);
}

#[tokio::test]
async fn weekend_gap_is_suppressed_unless_disabled() {
    let harness = build(RepairConfig::default());
    let interval = Interval::Min60;

    // Hourly candles Wed Jan 1 .. Fri Jan 3 00:00, resuming Mon Jan 6.
    let before: Vec<_> = series_ending_at(interval, FRI_MS, 49);
    let after: Vec<_> = series_ending_at(interval, MON_MS + 10 * interval.ms(), 11);
    let mut seeded = before;
    seeded.extend(after);

    harness
        .store
        .queue("BTCUSDT", interval, MarketType::Linear, &seeded)
        .unwrap();
    drain(&harness.store).await;

    let suppressed = harness
        .repair
        .find_timestamp_gaps("BTCUSDT", interval, 50, true)
        .unwrap();
    assert!(suppressed.is_empty(), "weekend gap must be filtered");

    let visible = harness
        .repair
        .find_timestamp_gaps("BTCUSDT", interval, 50, false)
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert!(visible[0].is_weekend);
    assert_eq!(visible[0].gap_start, FRI_MS);
    assert_eq!(visible[0].gap_end, MON_MS);
}

#[tokio::test]
async fn repair_summary_reflects_completeness() {
    let harness = build(RepairConfig::default());
    let interval = Interval::Min5;
    let span = interval.ms();

    let hole_start = WED_MS - 50 * span;
    let holey = series_with_hole(interval, WED_MS, 100, hole_start, hole_start + 11 * span);
    harness
        .store
        .queue("DOTUSDT", interval, MarketType::Linear, &holey)
        .unwrap();
    drain(&harness.store).await;

    let summary = harness.repair.repair_summary("DOTUSDT", interval).unwrap();
    assert_eq!(summary.total_candles, 90);
    assert_eq!(summary.expected_candles, 100);
    assert!((summary.completeness_pct - 90.0).abs() < 0.01);
    assert_eq!(summary.data_gaps, 1);
    assert!(summary.needs_repair);
}

#[tokio::test]
async fn quality_sweep_detects_price_gap_and_dispatches_repair() {
    let harness = build(RepairConfig::default());
    let interval = Interval::Min1;

    // A smooth series with one 4% discontinuity.
    let mut series = series_ending_at(interval, WED_MS, 200);
    let prev_close = series[149].close;
    series[150].open = prev_close * 1.04;
    let bad_time = series[150].open_time;

    harness
        .store
        .queue("DOGEUSDT", interval, MarketType::Linear, &series)
        .unwrap();
    drain(&harness.store).await;

    // The venue serves a corrected series.
    let mut corrected = series.clone();
    corrected[150].open = prev_close;
    harness.source.set_series("DOGEUSDT", interval, corrected);

    let (issues, anomalies) = harness
        .monitor
        .check_continuity("DOGEUSDT", interval)
        .unwrap();
    assert_eq!(issues, 1);
    assert_eq!(anomalies[0].timestamp, Some(bad_time));
    assert_eq!(anomalies[0].severity, Severity::Critical);

    let mut result = harness.monitor.run_all_checks("DOGEUSDT", interval).unwrap();
    assert!(!result.is_healthy);
    let repaired = harness.monitor.auto_repair(&mut result).await;
    assert!(repaired >= 1);

    drain(&harness.store).await;
    let (issues_after, _) = harness
        .monitor
        .check_continuity("DOGEUSDT", interval)
        .unwrap();
    assert_eq!(issues_after, 0, "the bad candle must be overwritten");
}

#[tokio::test]
async fn completeness_check_emits_missing_data_anomalies() {
    let harness = build(RepairConfig::default());
    let interval = Interval::Min5;
    let span = interval.ms();

    // 60 of 100 candles present: completeness 60% < 95%.
    let hole_start = WED_MS - 70 * span;
    let holey = series_with_hole(interval, WED_MS, 100, hole_start, hole_start + 41 * span);
    harness
        .store
        .queue("LTCUSDT", interval, MarketType::Linear, &holey)
        .unwrap();
    drain(&harness.store).await;

    let (pct, anomalies) = harness
        .monitor
        .check_completeness("LTCUSDT", interval)
        .unwrap();
    assert!((pct - 60.0).abs() < 0.5);
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].severity, Severity::High);
    assert!(anomalies[0].details.get("gap_start").is_some());
}
