//! End-to-end service tests against a file-backed store and a scripted
//! venue: freshness fall-through, force-fresh bypass, the RAM bound, and
//! symbol initialization with background loads.
//!
//! Run with:
//! ```bash
//! cargo test -p kmirror-service --test service_flow
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use kmirror_models::{
    Interval, LoadStatus, MarketType, MirrorConfig, RetentionConfig, ServiceConfig, StoreConfig,
};
use kmirror_service::test_support::{series_ending_at, MockSource};
use kmirror_service::{DataQualityMonitor, GapRepairEngine, SmartKlineService};
use kmirror_store::KlineStore;

struct Harness {
    store: Arc<KlineStore>,
    source: Arc<MockSource>,
    service: Arc<SmartKlineService>,
    _dir: tempfile::TempDir,
}

fn build(service_config: ServiceConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store_config = StoreConfig {
        db_path: dir.path().join("test.db").to_str().unwrap().to_string(),
        ..StoreConfig::default()
    };
    let defaults = MirrorConfig::default();

    let store = Arc::new(KlineStore::open(store_config).unwrap());
    let source = Arc::new(MockSource::new());
    let repair = Arc::new(GapRepairEngine::new(
        store.clone(),
        source.clone(),
        defaults.repair.clone(),
        MarketType::Linear,
    ));
    let quality = Arc::new(DataQualityMonitor::new(
        store.clone(),
        source.clone(),
        repair.clone(),
        defaults.monitor.clone(),
        MarketType::Linear,
    ));
    let service = SmartKlineService::new(
        store.clone(),
        source.clone(),
        repair,
        quality,
        service_config,
        RetentionConfig::default(),
    );

    Harness {
        store,
        source,
        service,
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

/// Open time of the current (still-forming) candle for an interval.
fn aligned_now(interval: Interval) -> i64 {
    let now = Utc::now().timestamp_millis();
    now - now.rem_euclid(interval.ms())
}

#[tokio::test]
async fn stale_store_falls_through_to_venue() {
    let harness = build(ServiceConfig::default());

    // Store holds enough rows, but the newest is 10 hours old.
    let stale_end = Utc::now().timestamp_millis() - 10 * 3_600_000;
    let stale = series_ending_at(Interval::Min60, stale_end, 80);
    harness
        .store
        .queue("ETHUSDT", Interval::Min60, MarketType::Linear, &stale)
        .unwrap();
    drain(&harness.store).await;

    // The venue has a current series.
    let fresh = series_ending_at(Interval::Min60, aligned_now(Interval::Min60), 80);
    harness.source.set_series("ETHUSDT", Interval::Min60, fresh);

    let candles = harness.service.get_candles("ETHUSDT", "60", 50, false).await;
    assert_eq!(candles.len(), 50);
    let newest = candles.last().unwrap().open_time;
    let threshold = Utc::now().timestamp_millis() - Interval::Min60.ms();
    assert!(newest >= threshold, "returned data must satisfy freshness");
    assert!(harness.source.call_count() > 0, "venue must have been hit");

    // The fresh rows were persisted.
    drain(&harness.store).await;
    let stored_newest = harness
        .store
        .newest_open_time("ETHUSDT", Interval::Min60, MarketType::Linear)
        .unwrap()
        .unwrap();
    assert!(stored_newest > stale_end);
}

#[tokio::test]
async fn fresh_store_serves_without_venue() {
    let harness = build(ServiceConfig::default());

    let fresh = series_ending_at(Interval::Min60, aligned_now(Interval::Min60), 80);
    harness
        .store
        .queue("BTCUSDT", Interval::Min60, MarketType::Linear, &fresh)
        .unwrap();
    drain(&harness.store).await;

    let candles = harness.service.get_candles("BTCUSDT", "1h", 50, false).await;
    assert_eq!(candles.len(), 50);
    assert_eq!(
        harness.source.call_count(),
        0,
        "a fresh store hit must not touch the venue"
    );

    // Second read comes from RAM, still without the venue.
    let again = harness.service.get_candles("BTCUSDT", "60", 50, false).await;
    assert_eq!(again.len(), 50);
    assert_eq!(harness.source.call_count(), 0);
}

#[tokio::test]
async fn force_fresh_bypasses_both_cache_tiers() {
    let harness = build(ServiceConfig::default());

    let fresh = series_ending_at(Interval::Min15, aligned_now(Interval::Min15), 60);
    harness
        .store
        .queue("SOLUSDT", Interval::Min15, MarketType::Linear, &fresh)
        .unwrap();
    drain(&harness.store).await;

    // Venue serves a series with a recognizable close.
    let mut venue_series = series_ending_at(Interval::Min15, aligned_now(Interval::Min15), 60);
    for candle in &mut venue_series {
        candle.close = 12_345.0;
    }
    harness
        .source
        .set_series("SOLUSDT", Interval::Min15, venue_series);

    let candles = harness.service.get_candles("SOLUSDT", "15", 30, true).await;
    assert_eq!(candles.len(), 30);
    assert!(candles.iter().all(|c| c.close == 12_345.0));
    assert!(harness.source.call_count() > 0);
}

#[tokio::test]
async fn ram_working_set_stays_bounded() {
    let config = ServiceConfig {
        ram_limit: 50,
        ..ServiceConfig::default()
    };
    let harness = build(config);

    let fresh = series_ending_at(Interval::Min1, aligned_now(Interval::Min1), 400);
    harness.source.set_series("BTCUSDT", Interval::Min1, fresh);

    let candles = harness.service.get_candles("BTCUSDT", "1", 200, false).await;
    assert_eq!(candles.len(), 200);

    let status = harness.service.get_status();
    assert!(status.ram_total_candles <= 50, "RAM must keep at most W candles per key");
    assert_eq!(status.ram_keys, vec!["BTCUSDT:1"]);
}

#[tokio::test]
async fn unknown_interval_returns_empty() {
    let harness = build(ServiceConfig::default());
    let candles = harness.service.get_candles("BTCUSDT", "7", 50, false).await;
    assert!(candles.is_empty());
}

#[tokio::test]
async fn historical_read_prefers_store() {
    let harness = build(ServiceConfig::default());

    let end = aligned_now(Interval::Min15);
    let series = series_ending_at(Interval::Min15, end, 300);
    harness
        .store
        .queue("BTCUSDT", Interval::Min15, MarketType::Linear, &series)
        .unwrap();
    drain(&harness.store).await;

    let cut = series[200].open_time;
    let candles = harness
        .service
        .get_historical_candles("BTCUSDT", "15", cut, 100)
        .await;
    assert!(candles.len() >= 100);
    assert_eq!(harness.source.call_count(), 0);
    assert!(candles.windows(2).all(|w| w[1].open_time > w[0].open_time));
}

#[tokio::test]
async fn initialize_symbol_loads_history_and_reports_status() {
    // Small targets so the scripted venue can satisfy them.
    let mut targets = BTreeMap::new();
    for interval in Interval::SUPPORTED {
        targets.insert(interval, 40usize);
    }
    let config = ServiceConfig {
        max_candles_to_load: targets,
        default_target_candles: 40,
        ..ServiceConfig::default()
    };
    let harness = build(config);

    // Venue coverage for every interval the initialization prepares:
    // primary 15 plus adjacency {5, 30}, required {1, 60}, and D.
    for interval in [
        Interval::Min1,
        Interval::Min5,
        Interval::Min15,
        Interval::Min30,
        Interval::Min60,
        Interval::Day,
    ] {
        harness.source.set_series(
            "BTCUSDT",
            interval,
            series_ending_at(interval, aligned_now(interval), 60),
        );
    }

    let status = harness
        .service
        .initialize_symbol("BTCUSDT", "15", true, true)
        .await;
    assert_eq!(status.status, "initialized");
    assert_eq!(status.primary_interval, Interval::Min15);
    assert!(status.intervals_loading.contains(&Interval::Min15));
    assert!(status.coverage.contains_key(&Interval::Day));
    assert!(status.initial_candles > 0);

    // Wait for the background loads to settle.
    let mut settled = false;
    for _ in 0..100 {
        let loading = harness.service.get_loading_status();
        let terminal = loading
            .values()
            .all(|p| matches!(p.status, LoadStatus::Completed | LoadStatus::Failed));
        if !loading.is_empty() && terminal {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(settled, "background loads did not settle");

    drain(&harness.store).await;
    let coverage = harness
        .store
        .get_coverage("BTCUSDT", Interval::Min15, MarketType::Linear)
        .unwrap()
        .unwrap();
    assert!(
        coverage.count as f64 >= 40.0 * 0.9,
        "primary interval must reach 90% of its target, got {}",
        coverage.count
    );

    // A venue with less coverage than the target still completes.
    let loading = harness.service.get_loading_status();
    let primary = loading.get("BTCUSDT:15").unwrap();
    assert_eq!(primary.status, LoadStatus::Completed);
    assert!(primary.loaded_candles <= 60);

    harness.service.stop_update_service().await;
    harness.store.stop().await;
}

#[tokio::test]
async fn updater_tick_tops_up_freshness_and_merges_ram() {
    let mut targets = BTreeMap::new();
    for interval in Interval::SUPPORTED {
        targets.insert(interval, 40usize);
    }
    let config = ServiceConfig {
        max_candles_to_load: targets,
        default_target_candles: 40,
        ..ServiceConfig::default()
    };
    let harness = build(config);

    // Store already holds enough history for the 90% coverage check, but
    // its newest candle is 30 minutes behind.
    let behind_end = aligned_now(Interval::Min1) - 30 * Interval::Min1.ms();
    let stored = series_ending_at(Interval::Min1, behind_end, 60);
    harness
        .store
        .queue("BTCUSDT", Interval::Min1, MarketType::Linear, &stored)
        .unwrap();
    drain(&harness.store).await;

    // Venue has the full current series.
    harness.source.set_series(
        "BTCUSDT",
        Interval::Min1,
        series_ending_at(Interval::Min1, aligned_now(Interval::Min1), 120),
    );

    // Registers the symbol as primary; Min1 is covered so no background
    // load is needed for it.
    harness
        .service
        .initialize_symbol("BTCUSDT", "1", true, false)
        .await;

    harness.service.update_active_symbols().await;
    drain(&harness.store).await;

    let newest = harness
        .store
        .newest_open_time("BTCUSDT", Interval::Min1, MarketType::Linear)
        .unwrap()
        .unwrap();
    assert!(newest > behind_end, "the updater must top up recent candles");

    let status = harness.service.get_status();
    assert!(status.ram_total_candles > 0);
}

#[tokio::test]
async fn update_service_stops_promptly() {
    let harness = build(ServiceConfig::default());

    harness.service.start_update_service(3_600);
    assert!(harness.service.get_status().running);

    let stopped = tokio::time::timeout(
        Duration::from_secs(2),
        harness.service.stop_update_service(),
    )
    .await;
    assert!(stopped.is_ok(), "updater must stop within the grace period");
    assert!(!harness.service.get_status().running);
}

#[tokio::test]
async fn second_initialize_is_idempotent() {
    let harness = build(ServiceConfig::default());
    harness.source.set_series(
        "ETHUSDT",
        Interval::Min60,
        series_ending_at(Interval::Min60, aligned_now(Interval::Min60), 30),
    );

    let first = harness
        .service
        .initialize_symbol("ETHUSDT", "60", false, false)
        .await;
    let second = harness
        .service
        .initialize_symbol("ETHUSDT", "60", false, false)
        .await;
    assert_eq!(first.symbol, second.symbol);
    assert_eq!(harness.service.get_status().symbols_loaded, 1);
}
