use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use kmirror_bybit::KlineSource;
use kmirror_models::{
    AnomalyKind, AnomalyReport, Gap, Interval, MarketType, MonitorConfig, QualityCheckResult,
    Severity,
};
use kmirror_store::KlineStore;

use crate::error::ServiceError;
use crate::outlier::{candle_features, detect_outliers};
use crate::repair::GapRepairEngine;

/// Seam for the stale-data remediation: the smart service registers itself
/// so a stale pair gets a force-fresh read through the full cache path.
/// Without a handler the monitor falls back to a direct venue fetch.
#[async_trait]
pub trait StaleDataHandler: Send + Sync {
    /// Force-refresh a pair; returns the number of candles obtained.
    async fn refresh(&self, symbol: &str, interval: Interval) -> usize;
}

/// Continuous four-layer supervision of the active (symbol, interval) set
/// with autonomous repair dispatch.
pub struct DataQualityMonitor {
    store: Arc<KlineStore>,
    source: Arc<dyn KlineSource>,
    repair: Arc<GapRepairEngine>,
    config: MonitorConfig,
    market_type: MarketType,
    active: Mutex<HashMap<String, BTreeSet<Interval>>>,
    stale_handler: Mutex<Option<Arc<dyn StaleDataHandler>>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl DataQualityMonitor {
    pub fn new(
        store: Arc<KlineStore>,
        source: Arc<dyn KlineSource>,
        repair: Arc<GapRepairEngine>,
        config: MonitorConfig,
        market_type: MarketType,
    ) -> Self {
        Self {
            store,
            source,
            repair,
            config,
            market_type,
            active: Mutex::new(HashMap::new()),
            stale_handler: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn set_stale_handler(&self, handler: Arc<dyn StaleDataHandler>) {
        *self
            .stale_handler
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    pub fn start_monitoring(&self, symbol: &str, interval: Interval) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active
            .entry(symbol.to_string())
            .or_default()
            .insert(interval);
        tracing::info!(symbol, interval = %interval, "Started quality monitoring");
    }

    pub fn stop_monitoring(&self, symbol: &str, interval: Interval) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(intervals) = active.get_mut(symbol) {
            intervals.remove(&interval);
            if intervals.is_empty() {
                active.remove(symbol);
            }
        }
        tracing::info!(symbol, interval = %interval, "Stopped quality monitoring");
    }

    pub fn monitored_pairs(&self) -> Vec<(String, Interval)> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active
            .iter()
            .flat_map(|(symbol, intervals)| {
                intervals.iter().map(move |i| (symbol.clone(), *i))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Layer 1: completeness
    // ------------------------------------------------------------------

    pub fn check_completeness(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<(f64, Vec<AnomalyReport>), ServiceError> {
        let Some(coverage) = self.store.get_coverage(symbol, interval, self.market_type)? else {
            let report = AnomalyReport::new(
                AnomalyKind::MissingData,
                symbol,
                interval,
                Severity::Critical,
                format!("No data found for {symbol}:{interval}"),
            );
            return Ok((0.0, vec![report]));
        };

        let expected = ((coverage.newest - coverage.oldest) / interval.ms() + 1).max(1) as u64;
        let completeness = (coverage.count as f64 / expected as f64) * 100.0;

        let mut anomalies = Vec::new();
        if completeness < self.config.completeness_threshold {
            // Weekend holes count against completeness too; the repair
            // dispatch decides what is actionable.
            let gaps = self
                .repair
                .find_timestamp_gaps(symbol, interval, 10, false)?;
            for gap in gaps {
                anomalies.push(
                    AnomalyReport::new(
                        AnomalyKind::MissingData,
                        symbol,
                        interval,
                        gap.severity(),
                        format!("Gap of {} missing candles", gap.missing_candles),
                    )
                    .at(gap.gap_start)
                    .with_details(serde_json::json!({
                        "gap_start": gap.gap_start,
                        "gap_end": gap.gap_end,
                        "missing_candles": gap.missing_candles,
                        "is_weekend": gap.is_weekend,
                    })),
                );
            }
        }

        Ok((completeness, anomalies))
    }

    // ------------------------------------------------------------------
    // Layer 2: freshness
    // ------------------------------------------------------------------

    pub fn check_freshness(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<(bool, Vec<AnomalyReport>), ServiceError> {
        let Some(newest) = self.store.newest_open_time(symbol, interval, self.market_type)?
        else {
            let report = AnomalyReport::new(
                AnomalyKind::StaleData,
                symbol,
                interval,
                Severity::Critical,
                "No data available",
            );
            return Ok((false, vec![report]));
        };

        let now_ms = Utc::now().timestamp_millis();
        let span = interval.ms();
        let max_age_ms = (span as f64 * self.config.freshness_multiplier) as i64;
        let age_ms = now_ms - newest;

        if age_ms <= max_age_ms {
            return Ok((true, Vec::new()));
        }

        let severity = if age_ms > span * 5 {
            Severity::High
        } else {
            Severity::Medium
        };
        let report = AnomalyReport::new(
            AnomalyKind::StaleData,
            symbol,
            interval,
            severity,
            format!(
                "Data is {:.0} min old (max allowed: {:.0} min)",
                age_ms as f64 / 60_000.0,
                max_age_ms as f64 / 60_000.0
            ),
        )
        .at(newest)
        .with_details(serde_json::json!({
            "last_candle_time": newest,
            "age_ms": age_ms,
            "threshold_ms": max_age_ms,
        }));
        Ok((false, vec![report]))
    }

    // ------------------------------------------------------------------
    // Layer 3: continuity
    // ------------------------------------------------------------------

    pub fn check_continuity(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<(usize, Vec<AnomalyReport>), ServiceError> {
        let price_gaps = self.repair.find_price_gaps(
            symbol,
            interval,
            self.config.continuity_window,
            self.config.z_threshold,
            self.config.critical_gap_pct,
            self.config.high_gap_pct,
        )?;

        let anomalies: Vec<AnomalyReport> = price_gaps
            .iter()
            .map(|gap| {
                let direction = if gap.gap_pct > 0.0 { "UP" } else { "DOWN" };
                AnomalyReport::new(
                    AnomalyKind::PriceGap,
                    symbol,
                    interval,
                    gap.severity,
                    format!(
                        "Price gap {direction}: {:+.2}% (z-score {:.2})",
                        gap.gap_pct, gap.z_score
                    ),
                )
                .at(gap.open_time)
                .with_details(serde_json::json!({
                    "open": gap.open,
                    "prev_close": gap.prev_close,
                    "gap_pct": gap.gap_pct,
                    "z_score": gap.z_score,
                }))
            })
            .collect();

        Ok((anomalies.len(), anomalies))
    }

    // ------------------------------------------------------------------
    // Layer 4: isolation outliers
    // ------------------------------------------------------------------

    pub fn check_outliers(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<(usize, Vec<AnomalyReport>), ServiceError> {
        let candles = self.store.get_range(
            symbol,
            interval,
            self.market_type,
            self.config.continuity_window,
            None,
        )?;
        if candles.len() < self.config.outlier_min_candles {
            return Ok((0, Vec::new()));
        }

        let features: Vec<_> = candles.iter().map(candle_features).collect();
        let mask = detect_outliers(
            &features,
            self.config.outlier_contamination,
            self.config.outlier_trees,
            self.config.outlier_seed,
        );

        let anomalies: Vec<AnomalyReport> = candles
            .iter()
            .zip(mask.iter())
            .filter(|(_, flagged)| **flagged)
            .map(|(candle, _)| {
                AnomalyReport::new(
                    AnomalyKind::Outlier,
                    symbol,
                    interval,
                    Severity::Medium,
                    "Isolation-scored outlier candle",
                )
                .at(candle.open_time)
                .with_details(serde_json::json!({
                    "open": candle.open,
                    "high": candle.high,
                    "low": candle.low,
                    "close": candle.close,
                    "volume": candle.volume,
                }))
            })
            .collect();

        Ok((anomalies.len(), anomalies))
    }

    // ------------------------------------------------------------------
    // All layers
    // ------------------------------------------------------------------

    pub fn run_all_checks(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<QualityCheckResult, ServiceError> {
        let mut anomalies = Vec::new();

        let (completeness_pct, mut found) = self.check_completeness(symbol, interval)?;
        anomalies.append(&mut found);

        let (freshness_ok, mut found) = self.check_freshness(symbol, interval)?;
        anomalies.append(&mut found);

        let (continuity_issues, mut found) = self.check_continuity(symbol, interval)?;
        anomalies.append(&mut found);

        let (outlier_count, mut found) = self.check_outliers(symbol, interval)?;
        anomalies.append(&mut found);

        let is_healthy = completeness_pct >= self.config.completeness_threshold
            && freshness_ok
            && continuity_issues == 0
            && outlier_count < 5;

        Ok(QualityCheckResult {
            symbol: symbol.to_string(),
            interval,
            check_time: Utc::now(),
            is_healthy,
            completeness_pct,
            freshness_ok,
            continuity_issues,
            outlier_count,
            anomalies,
        })
    }

    // ------------------------------------------------------------------
    // Auto-repair dispatch
    // ------------------------------------------------------------------

    /// Dispatch a targeted remediation per actionable anomaly; marks the
    /// repaired ones and returns how many succeeded.
    pub async fn auto_repair(&self, result: &mut QualityCheckResult) -> usize {
        let symbol = result.symbol.clone();
        let interval = result.interval;
        let mut repaired = 0;

        for anomaly in &mut result.anomalies {
            let outcome = match anomaly.kind {
                AnomalyKind::MissingData => {
                    let Some(gap) = gap_from_details(&symbol, interval, anomaly) else {
                        continue;
                    };
                    match self.repair.repair_gap(&gap).await {
                        Ok(outcome) => outcome.repaired(),
                        Err(e) => {
                            tracing::warn!(symbol, error = %e, "Gap auto-repair failed");
                            false
                        }
                    }
                }
                AnomalyKind::StaleData => self.refresh_stale(&symbol, interval).await > 0,
                AnomalyKind::PriceGap | AnomalyKind::Outlier => {
                    let Some(timestamp) = anomaly.timestamp else {
                        continue;
                    };
                    match self
                        .repair
                        .repair_timestamps(&symbol, interval, &[timestamp])
                        .await
                    {
                        Ok(written) => written > 0,
                        Err(e) => {
                            tracing::warn!(symbol, error = %e, "Candle auto-repair failed");
                            false
                        }
                    }
                }
            };
            if outcome {
                anomaly.auto_repaired = true;
                repaired += 1;
                tracing::info!(symbol, interval = %interval, kind = ?anomaly.kind, "Auto-repaired anomaly");
            }
        }

        repaired
    }

    async fn refresh_stale(&self, symbol: &str, interval: Interval) -> usize {
        let handler = {
            let guard = self
                .stale_handler
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        if let Some(handler) = handler {
            return handler.refresh(symbol, interval).await;
        }
        // No service registered: fetch and upsert directly.
        match self
            .source
            .get_klines(symbol, interval, 500, self.market_type)
            .await
        {
            Ok(candles) if !candles.is_empty() => {
                match self
                    .store
                    .queue(symbol, interval, self.market_type, &candles)
                {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(symbol, error = %e, "Stale refresh persist failed");
                        0
                    }
                }
            }
            Ok(_) => 0,
            Err(e) => {
                tracing::warn!(symbol, error = %e, "Stale refresh fetch failed");
                0
            }
        }
    }

    // ------------------------------------------------------------------
    // Background scheduler
    // ------------------------------------------------------------------

    /// Start the monitoring loop. Idempotent: a live task is kept.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, handle)) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        let cancel = CancellationToken::new();
        let monitor = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            monitor.monitoring_loop(token).await;
        });
        *task = Some((cancel, handle));
        tracing::info!("Quality monitoring started");
    }

    pub async fn stop(&self) {
        let taken = {
            let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
            task.take()
        };
        if let Some((cancel, handle)) = taken {
            cancel.cancel();
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                tracing::warn!("Quality monitor did not stop within grace period");
            } else {
                tracing::info!("Quality monitoring stopped");
            }
        }
    }

    async fn monitoring_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = Duration::from_secs(self.config.monitor_period_secs);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Quality monitoring loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(period) => {
                    self.sweep().await;
                }
            }
        }
    }

    /// One pass over the active set. Checks are CPU- and disk-bound, so
    /// each pair's sweep runs on the blocking pool.
    async fn sweep(self: &Arc<Self>) {
        for (symbol, interval) in self.monitored_pairs() {
            let result = {
                let monitor = Arc::clone(self);
                let symbol = symbol.clone();
                tokio::task::spawn_blocking(move || monitor.run_all_checks(&symbol, interval))
                    .await
            };
            let mut result = match result {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    tracing::error!(symbol, interval = %interval, error = %e, "Quality check failed");
                    continue;
                }
                Err(e) => {
                    tracing::error!(symbol, interval = %interval, error = %e, "Quality check panicked");
                    continue;
                }
            };

            if result.is_healthy {
                tracing::debug!(symbol, interval = %interval, "Pair is healthy");
                continue;
            }

            tracing::warn!(
                symbol,
                interval = %interval,
                completeness = result.completeness_pct,
                fresh = result.freshness_ok,
                continuity_issues = result.continuity_issues,
                outliers = result.outlier_count,
                "Quality issues detected"
            );
            let repaired = self.auto_repair(&mut result).await;
            if repaired > 0 {
                tracing::info!(symbol, interval = %interval, repaired, "Auto-repair complete");
            }
        }
    }

}

fn gap_from_details(symbol: &str, interval: Interval, anomaly: &AnomalyReport) -> Option<Gap> {
    let details = anomaly.details.as_object()?;
    let gap_start = details.get("gap_start")?.as_i64()?;
    let gap_end = details.get("gap_end")?.as_i64()?;
    let missing = details
        .get("missing_candles")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    Some(Gap {
        symbol: symbol.to_string(),
        interval,
        gap_start,
        gap_end,
        missing_candles: missing,
        is_weekend: Gap::classify_weekend(gap_start, gap_end),
    })
}
