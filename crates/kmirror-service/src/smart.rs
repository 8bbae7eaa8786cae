use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Months, TimeZone, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kmirror_bybit::KlineSource;
use kmirror_models::{
    pair_key, Candle, Interval, LoadStatus, LoadingProgress, MarketType, RetentionConfig,
    ServiceConfig, SymbolState,
};
use kmirror_store::{Coverage, KlineStore, Repository, StoreError};

use crate::quality::{DataQualityMonitor, StaleDataHandler};
use crate::repair::GapRepairEngine;
use crate::working_set::WorkingSet;

/// Candles the historical fetch asks for beyond a client's end_time so
/// client-side merges stay gap-free.
const HISTORY_OVERLAP_CANDLES: usize = 10;
/// Latest-candle fetch size per updater tick.
const UPDATE_FETCH_CANDLES: usize = 10;
/// Coverage fraction above which an interval counts as already loaded.
const COVERAGE_TARGET_FRACTION: f64 = 0.9;
/// Gap bound for the repair pass scheduled right after a historical load.
const POST_LOAD_REPAIR_GAPS: usize = 20;
/// Gap bound for the opportunistic periodic repair passes.
const PERIODIC_REPAIR_GAPS: usize = 10;

/// Status structure returned by `initialize_symbol`.
#[derive(Debug, Clone, Serialize)]
pub struct InitStatus {
    pub symbol: String,
    pub primary_interval: Interval,
    pub status: String,
    pub intervals_loaded: Vec<Interval>,
    pub intervals_loading: Vec<Interval>,
    pub coverage: BTreeMap<Interval, Option<Coverage>>,
    pub initial_candles: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub symbols_loaded: usize,
    pub ram_keys: Vec<String>,
    pub ram_total_candles: usize,
    pub loading: BTreeMap<String, LoadingProgress>,
    pub symbol_states: BTreeMap<String, SymbolState>,
}

/// The public read face of the mirror: a three-tier cache (RAM working set,
/// store, venue) with a freshness gate, adjacent-timeframe pre-warm on
/// symbol initialization, a background updater, and retention enforcement.
///
/// Read operations never raise; transport failures degrade to whatever the
/// lower tiers hold, ultimately to an empty list.
pub struct SmartKlineService {
    store: Arc<KlineStore>,
    repo: Repository,
    source: Arc<dyn KlineSource>,
    repair: Arc<GapRepairEngine>,
    quality: Arc<DataQualityMonitor>,
    config: ServiceConfig,
    retention: RetentionConfig,
    ram: WorkingSet,
    states: Mutex<HashMap<String, SymbolState>>,
    progress: Mutex<BTreeMap<String, LoadingProgress>>,
    running: AtomicBool,
    updater: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    last_repair_check: Mutex<Option<DateTime<Utc>>>,
    last_retention_check: Mutex<Option<DateTime<Utc>>>,
}

impl SmartKlineService {
    /// Wire up the service and register it as the monitor's stale-data
    /// handler.
    pub fn new(
        store: Arc<KlineStore>,
        source: Arc<dyn KlineSource>,
        repair: Arc<GapRepairEngine>,
        quality: Arc<DataQualityMonitor>,
        config: ServiceConfig,
        retention: RetentionConfig,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            repo: Repository::new(store.clone()),
            ram: WorkingSet::new(config.ram_limit),
            store,
            source,
            repair,
            quality: quality.clone(),
            config,
            retention,
            states: Mutex::new(HashMap::new()),
            progress: Mutex::new(BTreeMap::new()),
            running: AtomicBool::new(false),
            updater: Mutex::new(None),
            last_repair_check: Mutex::new(None),
            last_retention_check: Mutex::new(None),
        });
        quality.set_stale_handler(service.clone() as Arc<dyn StaleDataHandler>);
        service
    }

    fn market(&self) -> MarketType {
        self.config.market_type
    }

    fn parse_interval(&self, interval: &str) -> Option<Interval> {
        match interval.parse::<Interval>() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(interval, error = %e, "Rejected unknown interval");
                None
            }
        }
    }

    fn is_fresh(candles: &[Candle], interval: Interval) -> bool {
        let Some(last) = candles.last() else {
            return false;
        };
        let threshold = Utc::now().timestamp_millis() - interval.ms();
        last.open_time >= threshold
    }

    fn tail(mut candles: Vec<Candle>, limit: usize) -> Vec<Candle> {
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        candles
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Up to `limit` newest candles, oldest-first. RAM and store hits must
    /// be both large enough and fresh; anything else falls through to the
    /// venue. `force_fresh` skips both cache tiers.
    pub async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
        force_fresh: bool,
    ) -> Vec<Candle> {
        let Some(interval) = self.parse_interval(interval) else {
            return Vec::new();
        };
        let key = pair_key(symbol, interval);

        if force_fresh {
            tracing::info!(key, "Force fresh requested, fetching from venue");
            return self.fetch_persist_cache(symbol, interval, limit).await;
        }

        if let Some(cached) = self.ram.snapshot(symbol, interval) {
            if cached.len() >= limit && Self::is_fresh(&cached, interval) {
                tracing::debug!(key, candles = cached.len(), "RAM cache hit");
                return Self::tail(cached, limit);
            }
        }

        match self.repo.last_n(symbol, interval, self.market(), limit) {
            Ok(stored) if stored.len() >= limit && Self::is_fresh(&stored, interval) => {
                tracing::debug!(key, candles = stored.len(), "Store hit");
                self.ram.replace_tail(symbol, interval, &stored);
                return Self::tail(stored, limit);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(key, error = %e, "Store read failed"),
        }

        tracing::info!(key, "Cache miss or stale, fetching from venue");
        self.fetch_persist_cache(symbol, interval, limit).await
    }

    async fn fetch_persist_cache(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Vec<Candle> {
        let candles = match self
            .source
            .get_klines(symbol, interval, limit, self.market())
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                tracing::warn!(symbol, interval = %interval, error = %e, "Venue fetch failed");
                return Vec::new();
            }
        };
        if candles.is_empty() {
            return candles;
        }
        self.ram.replace_tail(symbol, interval, &candles);
        self.persist(symbol, interval, &candles);
        Self::tail(candles, limit)
    }

    /// Up to `limit` candles with `open_time < end_time`, oldest-first,
    /// over-fetched by a 10-candle overlap so client-side merges stay
    /// seamless. Store first, venue fallback.
    pub async fn get_historical_candles(
        &self,
        symbol: &str,
        interval: &str,
        end_time: i64,
        limit: usize,
    ) -> Vec<Candle> {
        let Some(interval) = self.parse_interval(interval) else {
            return Vec::new();
        };
        let overlap_time = HISTORY_OVERLAP_CANDLES as i64 * interval.ms();
        let effective_end = end_time + overlap_time;
        let want = limit + HISTORY_OVERLAP_CANDLES;

        match self
            .repo
            .last_n_before(symbol, interval, self.market(), effective_end, want)
        {
            Ok(stored) if stored.len() >= limit / 2 => {
                tracing::debug!(symbol, interval = %interval, end_time, "Store historical hit");
                return stored;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(symbol, error = %e, "Store historical read failed"),
        }

        match self
            .source
            .get_klines_before(symbol, interval, effective_end, want, self.market())
            .await
        {
            Ok(candles) => {
                if !candles.is_empty() {
                    self.persist(symbol, interval, &candles);
                }
                candles
            }
            Err(e) => {
                tracing::warn!(symbol, interval = %interval, error = %e, "Venue historical fetch failed");
                Vec::new()
            }
        }
    }

    fn persist(&self, symbol: &str, interval: Interval, candles: &[Candle]) {
        match self.store.queue(symbol, interval, self.market(), candles) {
            Ok(accepted) => {
                tracing::debug!(symbol, interval = %interval, accepted, "Queued for persistence")
            }
            Err(StoreError::QueueFull { rejected }) => {
                tracing::warn!(symbol, interval = %interval, rejected, "Store queue full")
            }
            Err(e) => tracing::warn!(symbol, interval = %interval, error = %e, "Persist failed"),
        }
    }

    // ------------------------------------------------------------------
    // Symbol initialization
    // ------------------------------------------------------------------

    /// The interval set prepared for a primary: the primary itself, its
    /// adjacency neighbors, the always-required set, and daily.
    fn intervals_to_prepare(&self, primary: Interval, load_adjacent: bool) -> BTreeSet<Interval> {
        let mut intervals = BTreeSet::from([primary]);
        if load_adjacent {
            if let Some(neighbors) = self.config.adjacency.get(&primary) {
                intervals.extend(neighbors.iter().copied());
            }
        }
        intervals.insert(Interval::Day);
        intervals.extend(self.config.required_intervals.iter().copied());
        intervals.retain(Interval::is_supported);
        intervals
    }

    /// Idempotently register a symbol as primary, check store coverage for
    /// every interval to prepare, schedule background historical loads for
    /// the under-covered ones, hydrate the primary interval into RAM, and
    /// start quality monitoring.
    pub async fn initialize_symbol(
        self: &Arc<Self>,
        symbol: &str,
        primary_interval: &str,
        load_history: bool,
        load_adjacent: bool,
    ) -> InitStatus {
        let primary = self
            .parse_interval(primary_interval)
            .unwrap_or(Interval::Min15);
        tracing::info!(symbol, primary = %primary, "Initializing symbol");

        {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            states
                .entry(symbol.to_string())
                .or_insert_with(|| SymbolState::new(symbol))
                .is_primary = true;
        }

        let intervals = self.intervals_to_prepare(primary, load_adjacent);
        let mut status = InitStatus {
            symbol: symbol.to_string(),
            primary_interval: primary,
            status: "initialized".to_string(),
            intervals_loaded: Vec::new(),
            intervals_loading: Vec::new(),
            coverage: BTreeMap::new(),
            initial_candles: 0,
        };

        for interval in &intervals {
            let coverage = self
                .repo
                .coverage(symbol, *interval, self.market())
                .unwrap_or_default();
            status.coverage.insert(*interval, coverage);
        }

        if load_history {
            for interval in &intervals {
                let target = self.config.target_candles(*interval);
                let covered = status
                    .coverage
                    .get(interval)
                    .and_then(|c| c.as_ref())
                    .map(|c| c.count)
                    .unwrap_or(0);

                if (covered as f64) >= target as f64 * COVERAGE_TARGET_FRACTION {
                    self.mark_loaded(symbol, *interval);
                    status.intervals_loaded.push(*interval);
                    tracing::info!(symbol, interval = %interval, covered, "Interval already covered");
                } else {
                    status.intervals_loading.push(*interval);
                    let service = Arc::clone(self);
                    let symbol = symbol.to_string();
                    let interval = *interval;
                    tokio::spawn(async move {
                        service
                            .load_historical_background(&symbol, interval, target)
                            .await;
                    });
                }
            }
        }

        status.initial_candles = self
            .get_candles(symbol, primary.as_str(), self.config.ram_limit, false)
            .await
            .len();

        self.quality.start_monitoring(symbol, primary);
        self.quality.start();

        status
    }

    fn mark_loaded(&self, symbol: &str, interval: Interval) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = states.get_mut(symbol) {
            state.loaded_intervals.insert(interval);
        }
    }

    async fn load_historical_background(
        self: Arc<Self>,
        symbol: &str,
        interval: Interval,
        target: usize,
    ) {
        let key = pair_key(symbol, interval);
        {
            let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
            let entry = progress
                .entry(key.clone())
                .or_insert_with(|| LoadingProgress::new(symbol, interval, target));
            entry.total_candles = target;
            entry.status = LoadStatus::Loading;
            entry.started_at = Some(Utc::now());
            entry.finished_at = None;
            entry.error = None;
        }
        tracing::info!(key, target, "Background historical load starting");

        // Extend backwards from the oldest stored candle, if any.
        let end_time = self
            .repo
            .coverage(symbol, interval, self.market())
            .ok()
            .flatten()
            .map(|c| c.oldest);

        let result = self
            .source
            .get_klines_historical(symbol, interval, target, end_time, self.market())
            .await;

        let mut schedule_repair = false;
        {
            let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
            let entry = progress
                .entry(key.clone())
                .or_insert_with(|| LoadingProgress::new(symbol, interval, target));
            match &result {
                Ok(candles) if !candles.is_empty() => {
                    entry.loaded_candles = candles.len();
                    entry.status = LoadStatus::Completed;
                    schedule_repair = true;
                }
                Ok(_) => {
                    entry.status = LoadStatus::Failed;
                    entry.error = Some("no candles returned".to_string());
                }
                Err(e) => {
                    entry.status = LoadStatus::Failed;
                    entry.error = Some(e.to_string());
                }
            }
            entry.finished_at = Some(Utc::now());
        }

        if let Ok(candles) = result {
            if !candles.is_empty() {
                self.persist(symbol, interval, &candles);
                self.mark_loaded(symbol, interval);
                tracing::info!(key, loaded = candles.len(), "Background load complete");
            }
        }

        if schedule_repair {
            let service = Arc::clone(&self);
            let symbol = symbol.to_string();
            tokio::spawn(async move {
                if let Err(e) = service
                    .repair
                    .repair_all_gaps(&symbol, interval, POST_LOAD_REPAIR_GAPS)
                    .await
                {
                    tracing::warn!(symbol, interval = %interval, error = %e, "Post-load repair failed");
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Background updater
    // ------------------------------------------------------------------

    pub fn start_update_service(self: &Arc<Self>, period_secs: u64) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            service.update_loop(period_secs, token).await;
        });
        *self.updater.lock().unwrap_or_else(|e| e.into_inner()) = Some((cancel, handle));
        tracing::info!(period_secs, "Background update service started");
    }

    pub async fn stop_update_service(&self) {
        self.running.store(false, Ordering::Release);
        let taken = {
            let mut updater = self.updater.lock().unwrap_or_else(|e| e.into_inner());
            updater.take()
        };
        if let Some((cancel, handle)) = taken {
            cancel.cancel();
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                tracing::warn!("Update service did not stop within grace period");
            } else {
                tracing::info!("Background update service stopped");
            }
        }
    }

    async fn update_loop(self: Arc<Self>, period_secs: u64, cancel: CancellationToken) {
        let period = Duration::from_secs(period_secs);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Update loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(period) => {
                    self.update_active_symbols().await;
                    self.periodic_repair().await;
                    self.periodic_retention().await;
                }
            }
        }
    }

    /// One updater tick: per primary symbol and loaded interval, top up
    /// freshness, fetch the latest few candles, persist, and merge them
    /// into the RAM working set.
    pub async fn update_active_symbols(&self) {
        let targets: Vec<(String, Vec<Interval>)> = {
            let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            states
                .values()
                .filter(|s| s.is_primary)
                .map(|s| (s.symbol.clone(), s.loaded_intervals.iter().copied().collect()))
                .collect()
        };

        for (symbol, intervals) in targets {
            for interval in intervals {
                self.ensure_data_freshness(&symbol, interval).await;

                let latest = match self
                    .source
                    .get_klines(&symbol, interval, UPDATE_FETCH_CANDLES, self.market())
                    .await
                {
                    Ok(candles) => candles,
                    Err(e) => {
                        tracing::warn!(symbol, interval = %interval, error = %e, "Update fetch failed");
                        continue;
                    }
                };
                if latest.is_empty() {
                    continue;
                }
                self.persist(&symbol, interval, &latest);
                self.ram.merge(&symbol, interval, &latest);

                let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(state) = states.get_mut(&symbol) {
                    state.last_update = Some(Utc::now());
                }
            }
        }
    }

    /// Fill the stretch between the store's newest candle and "now" when
    /// more than one interval is missing. No-op when no new candles exist
    /// remotely.
    pub async fn ensure_data_freshness(&self, symbol: &str, interval: Interval) {
        let newest = match self.store.newest_open_time(symbol, interval, self.market()) {
            Ok(Some(newest)) => newest,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(symbol, interval = %interval, error = %e, "Freshness check failed");
                return;
            }
        };

        let now_ms = Utc::now().timestamp_millis();
        let missing = (now_ms - newest) / interval.ms();
        if missing <= 1 {
            return;
        }

        tracing::info!(symbol, interval = %interval, missing, "Topping up recent candles");
        let fetch = (missing as usize + 10).min(1_000);
        match self
            .source
            .get_klines(symbol, interval, fetch, self.market())
            .await
        {
            Ok(candles) => {
                let fresh: Vec<Candle> = candles
                    .into_iter()
                    .filter(|c| c.open_time > newest)
                    .collect();
                if !fresh.is_empty() {
                    self.persist(symbol, interval, &fresh);
                    tracing::info!(symbol, interval = %interval, loaded = fresh.len(), "Loaded new candles");
                }
            }
            Err(e) => {
                tracing::warn!(symbol, interval = %interval, error = %e, "Freshness fetch failed")
            }
        }
    }

    // ------------------------------------------------------------------
    // Periodic repair
    // ------------------------------------------------------------------

    async fn periodic_repair(self: &Arc<Self>) {
        let now = Utc::now();
        {
            let mut last = self
                .last_repair_check
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = *last {
                let hours = (now - previous).num_seconds() as f64 / 3_600.0;
                if hours < self.config.repair_interval_hours as f64 {
                    return;
                }
            }
            *last = Some(now);
        }
        tracing::info!("Periodic gap repair check starting");

        let targets: Vec<(String, Vec<Interval>)> = {
            let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            states
                .values()
                .map(|s| (s.symbol.clone(), s.loaded_intervals.iter().copied().collect()))
                .collect()
        };

        for (symbol, intervals) in targets {
            for interval in intervals {
                let summary = match self.repair.repair_summary(&symbol, interval) {
                    Ok(summary) => summary,
                    Err(e) => {
                        tracing::warn!(symbol, interval = %interval, error = %e, "Gap check failed");
                        continue;
                    }
                };
                if !summary.needs_repair {
                    continue;
                }
                tracing::info!(symbol, interval = %interval, gaps = summary.data_gaps, "Scheduling repair");
                let service = Arc::clone(self);
                let symbol = symbol.clone();
                tokio::spawn(async move {
                    if let Err(e) = service
                        .repair
                        .repair_all_gaps(&symbol, interval, PERIODIC_REPAIR_GAPS)
                        .await
                    {
                        tracing::warn!(symbol, interval = %interval, error = %e, "Periodic repair failed");
                    }
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Retention enforcement
    // ------------------------------------------------------------------

    async fn periodic_retention(&self) {
        let now = Utc::now();
        {
            let mut last = self
                .last_retention_check
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = *last {
                if (now - previous).num_days() < self.retention.retention_check_days {
                    return;
                }
            }
            *last = Some(now);
        }
        let deleted = self.enforce_retention_policy();
        if deleted > 0 {
            tracing::info!(deleted, "Retention sweep complete");
        }
    }

    /// Apply the retention policy now: sweep rows before the global minimum
    /// date, then trim one calendar month off the front of any pair whose
    /// span exceeds the retention window. Returns rows deleted.
    pub fn enforce_retention_policy(&self) -> usize {
        let mut total_deleted = 0usize;

        let min_ts = self.retention.global_min_ts();
        match self.store.delete_before(min_ts) {
            Ok(deleted) if deleted > 0 => {
                total_deleted += deleted;
                tracing::info!(deleted, min_ts, "Deleted candles before global minimum date");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Global minimum sweep failed"),
        }

        let pairs = match self.store.summary() {
            Ok(pairs) => pairs,
            Err(e) => {
                tracing::error!(error = %e, "Retention summary failed");
                return total_deleted;
            }
        };

        let max_span_ms = self.retention.max_retention_ms();
        for pair in pairs {
            let span_ms = pair.newest - pair.oldest;
            if span_ms <= max_span_ms {
                continue;
            }
            // Trim a calendar month off the front so the retained prefix
            // starts on a month boundary.
            let Some(oldest_dt) = Utc.timestamp_millis_opt(pair.oldest).single() else {
                continue;
            };
            let Some(cutoff) = oldest_dt.checked_add_months(Months::new(1)) else {
                continue;
            };
            let cutoff_ts = cutoff.timestamp_millis();
            match self.store.delete_pair_before(
                &pair.symbol,
                pair.interval,
                pair.market_type,
                cutoff_ts,
            ) {
                Ok(deleted) if deleted > 0 => {
                    total_deleted += deleted;
                    tracing::info!(
                        symbol = %pair.symbol,
                        interval = %pair.interval,
                        deleted,
                        span_days = span_ms / 86_400_000,
                        "Trimmed oldest month"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(symbol = %pair.symbol, error = %e, "Retention trim failed")
                }
            }
        }

        total_deleted
    }

    // ------------------------------------------------------------------
    // Status surfaces
    // ------------------------------------------------------------------

    pub fn get_loading_status(&self) -> BTreeMap<String, LoadingProgress> {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn get_status(&self) -> ServiceStatus {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        ServiceStatus {
            running: self.running.load(Ordering::Acquire),
            symbols_loaded: states.len(),
            ram_keys: self.ram.keys(),
            ram_total_candles: self.ram.total_candles(),
            loading: self.get_loading_status(),
            symbol_states: states
                .iter()
                .map(|(symbol, state)| (symbol.clone(), state.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl StaleDataHandler for SmartKlineService {
    async fn refresh(&self, symbol: &str, interval: Interval) -> usize {
        self.get_candles(symbol, interval.as_str(), self.config.ram_limit, true)
            .await
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kmirror_models::MirrorConfig;

    fn service_config() -> ServiceConfig {
        MirrorConfig::default().service
    }

    #[test]
    fn interval_set_for_15m_primary() {
        // Exercises the set computation without any I/O.
        let config = service_config();
        let mut intervals = BTreeSet::from([Interval::Min15]);
        intervals.extend(config.adjacency.get(&Interval::Min15).unwrap().iter());
        intervals.insert(Interval::Day);
        intervals.extend(config.required_intervals.iter());
        intervals.retain(Interval::is_supported);

        assert_eq!(
            intervals,
            BTreeSet::from([
                Interval::Min1,
                Interval::Min5,
                Interval::Min15,
                Interval::Min30,
                Interval::Min60,
                Interval::Day,
            ])
        );
    }

    #[test]
    fn tail_keeps_newest() {
        let candles: Vec<Candle> = (1..=10)
            .map(|i| Candle::new(i * 60_000, 1.0, 1.0, 1.0, 1.0, 1.0))
            .collect();
        let tail = SmartKlineService::tail(candles, 3);
        let times: Vec<i64> = tail.iter().map(|c| c.open_time).collect();
        assert_eq!(times, vec![8 * 60_000, 9 * 60_000, 10 * 60_000]);
    }

    #[test]
    fn freshness_gate() {
        let now = Utc::now().timestamp_millis();
        let fresh = vec![Candle::new(now - 30_000, 1.0, 1.0, 1.0, 1.0, 1.0)];
        let stale = vec![Candle::new(now - 10 * 60_000, 1.0, 1.0, 1.0, 1.0, 1.0)];
        assert!(SmartKlineService::is_fresh(&fresh, Interval::Min1));
        assert!(!SmartKlineService::is_fresh(&stale, Interval::Min1));
        assert!(SmartKlineService::is_fresh(&stale, Interval::Min60));
        assert!(!SmartKlineService::is_fresh(&[], Interval::Min1));
    }
}
