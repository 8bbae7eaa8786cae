use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use kmirror_bybit::KlineSource;
use kmirror_models::{Candle, Gap, Interval, MarketType, RepairConfig};
use kmirror_store::{KlineStore, StoreError};

use crate::continuity::{detect_price_gaps, PriceGap};
use crate::error::ServiceError;

/// Result of repairing one timestamp gap.
#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub fetched: usize,
    pub written: usize,
}

impl RepairOutcome {
    pub fn repaired(&self) -> bool {
        self.written > 0
    }
}

/// Summary of one bounded repair pass.
#[derive(Debug, Clone, Serialize)]
pub struct RepairRun {
    pub symbol: String,
    pub interval: Interval,
    pub gaps_found: usize,
    pub gaps_repaired: usize,
    pub candles_written: usize,
}

/// Data-quality snapshot used to decide whether a pair needs a repair pass.
#[derive(Debug, Clone, Serialize)]
pub struct RepairSummary {
    pub symbol: String,
    pub interval: Interval,
    pub total_candles: u64,
    pub expected_candles: u64,
    pub completeness_pct: f64,
    pub data_gaps: usize,
    pub weekend_gaps: usize,
    pub needs_repair: bool,
}

/// Detects holes and price discontinuities in the persisted series and
/// re-fetches the affected ranges through the venue seam.
pub struct GapRepairEngine {
    store: Arc<KlineStore>,
    source: Arc<dyn KlineSource>,
    config: RepairConfig,
    market_type: MarketType,
}

impl GapRepairEngine {
    pub fn new(
        store: Arc<KlineStore>,
        source: Arc<dyn KlineSource>,
        config: RepairConfig,
        market_type: MarketType,
    ) -> Self {
        Self {
            store,
            source,
            config,
            market_type,
        }
    }

    /// Scan the open_time sequence for holes wider than 1.5 interval spans.
    /// Largest holes first, capped at `max_gaps`. Weekend holes are dropped
    /// when `skip_weekends` is set.
    pub fn find_timestamp_gaps(
        &self,
        symbol: &str,
        interval: Interval,
        max_gaps: usize,
        skip_weekends: bool,
    ) -> Result<Vec<Gap>, ServiceError> {
        let times = self
            .store
            .open_times(symbol, interval, self.market_type)?;
        let span = interval.ms();

        let mut gaps: Vec<Gap> = times
            .windows(2)
            .filter_map(|pair| {
                let delta = pair[1] - pair[0];
                if (delta as f64) <= span as f64 * 1.5 {
                    return None;
                }
                let is_weekend = Gap::classify_weekend(pair[0], pair[1]);
                if skip_weekends && is_weekend {
                    return None;
                }
                Some(Gap {
                    symbol: symbol.to_string(),
                    interval,
                    gap_start: pair[0],
                    gap_end: pair[1],
                    missing_candles: delta / span - 1,
                    is_weekend,
                })
            })
            .collect();

        gaps.sort_by_key(|g| std::cmp::Reverse(g.missing_candles));
        gaps.truncate(max_gaps);
        Ok(gaps)
    }

    /// Price discontinuities over the newest `window` candles.
    pub fn find_price_gaps(
        &self,
        symbol: &str,
        interval: Interval,
        window: usize,
        z_threshold: f64,
        critical_pct: f64,
        high_pct: f64,
    ) -> Result<Vec<PriceGap>, ServiceError> {
        let candles = self
            .store
            .get_range(symbol, interval, self.market_type, window, None)?;
        Ok(detect_price_gaps(
            &candles,
            z_threshold,
            critical_pct,
            high_pct,
        ))
    }

    /// Page backwards through the venue until `[start_time, end_time)` is
    /// covered, deduplicated and sorted oldest-first.
    pub async fn fetch_candles_for_range(
        &self,
        symbol: &str,
        interval: Interval,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<Candle>, ServiceError> {
        let span = interval.ms();
        let expected = ((end_time - start_time) / span).max(0) as usize;
        let mut assembled: Vec<Candle> = Vec::new();
        let mut current_end = end_time;

        while current_end > start_time {
            let page = self
                .source
                .get_klines_before(
                    symbol,
                    interval,
                    current_end,
                    expected.clamp(1, 1_000),
                    self.market_type,
                )
                .await?;
            if page.is_empty() {
                break;
            }
            let oldest = page.iter().map(|c| c.open_time).min().unwrap_or(start_time);
            assembled.extend(page.into_iter().filter(|c| c.open_time >= start_time));
            if oldest >= current_end {
                break;
            }
            current_end = oldest;
            tokio::time::sleep(Duration::from_millis(self.config.rate_limit_delay_ms)).await;
        }

        assembled.sort_by_key(|c| c.open_time);
        assembled.dedup_by_key(|c| c.open_time);
        Ok(assembled)
    }

    /// Re-fetch one hole (with surrounding context) and persist whatever
    /// the venue has for it.
    pub async fn repair_gap(&self, gap: &Gap) -> Result<RepairOutcome, ServiceError> {
        let span = gap.interval.ms();
        let context = self.config.context_candles * span;
        let fetch_start = gap.gap_start - context;
        let fetch_end = gap.gap_end + context;

        tracing::info!(
            symbol = %gap.symbol,
            interval = %gap.interval,
            gap_start = gap.gap_start,
            gap_end = gap.gap_end,
            missing = gap.missing_candles,
            "Repairing gap"
        );

        let candles = self
            .fetch_candles_for_range(&gap.symbol, gap.interval, fetch_start, fetch_end)
            .await?;
        // Keep only rows inside the hole itself.
        let hole: Vec<Candle> = candles
            .into_iter()
            .filter(|c| c.open_time > gap.gap_start && c.open_time < gap.gap_end)
            .collect();

        if hole.is_empty() {
            tracing::warn!(symbol = %gap.symbol, interval = %gap.interval, "No candles for gap");
            return Ok(RepairOutcome {
                fetched: 0,
                written: 0,
            });
        }

        let fetched = hole.len();
        let written = self.persist(&gap.symbol, gap.interval, &hole)?;
        Ok(RepairOutcome { fetched, written })
    }

    /// Re-fetch specific bad candles plus `context` neighbors on each side
    /// and upsert them. Used for price-gap and outlier remediation.
    pub async fn repair_timestamps(
        &self,
        symbol: &str,
        interval: Interval,
        timestamps: &[i64],
    ) -> Result<usize, ServiceError> {
        let (Some(&min_ts), Some(&max_ts)) =
            (timestamps.iter().min(), timestamps.iter().max())
        else {
            return Ok(0);
        };
        let span = interval.ms();
        let context = self.config.context_candles * span;
        let candles = self
            .fetch_candles_for_range(symbol, interval, min_ts - context, max_ts + span + context)
            .await?;
        if candles.is_empty() {
            return Ok(0);
        }
        self.persist(symbol, interval, &candles)
            .map_err(ServiceError::from)
    }

    /// One bounded pass over the worst holes of a pair.
    pub async fn repair_all_gaps(
        &self,
        symbol: &str,
        interval: Interval,
        max_gaps: usize,
    ) -> Result<RepairRun, ServiceError> {
        let gaps = self.find_timestamp_gaps(
            symbol,
            interval,
            max_gaps.min(self.config.max_gaps),
            self.config.skip_weekends,
        )?;

        let mut run = RepairRun {
            symbol: symbol.to_string(),
            interval,
            gaps_found: gaps.len(),
            gaps_repaired: 0,
            candles_written: 0,
        };
        for gap in &gaps {
            match self.repair_gap(gap).await {
                Ok(outcome) => {
                    if outcome.repaired() {
                        run.gaps_repaired += 1;
                        run.candles_written += outcome.written;
                    }
                }
                Err(e) => {
                    tracing::warn!(symbol, interval = %interval, error = %e, "Gap repair failed");
                }
            }
            tokio::time::sleep(Duration::from_millis(self.config.rate_limit_delay_ms)).await;
        }

        tracing::info!(
            symbol,
            interval = %interval,
            gaps_found = run.gaps_found,
            gaps_repaired = run.gaps_repaired,
            candles_written = run.candles_written,
            "Repair pass complete"
        );
        Ok(run)
    }

    /// Completeness snapshot for one pair, weekend holes split out.
    pub fn repair_summary(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> Result<RepairSummary, ServiceError> {
        let coverage = self.store.get_coverage(symbol, interval, self.market_type)?;
        let (total, expected) = match coverage {
            Some(c) => {
                let expected = ((c.newest - c.oldest) / interval.ms() + 1).max(0) as u64;
                (c.count, expected)
            }
            None => (0, 0),
        };
        let completeness_pct = if expected > 0 {
            (total as f64 / expected as f64) * 100.0
        } else {
            100.0
        };

        let all_gaps = self.find_timestamp_gaps(symbol, interval, 100, false)?;
        let weekend_gaps = all_gaps.iter().filter(|g| g.is_weekend).count();
        let data_gaps = all_gaps.len() - weekend_gaps;

        Ok(RepairSummary {
            symbol: symbol.to_string(),
            interval,
            total_candles: total,
            expected_candles: expected,
            completeness_pct: (completeness_pct * 100.0).round() / 100.0,
            data_gaps,
            weekend_gaps,
            needs_repair: data_gaps > 0,
        })
    }

    fn persist(
        &self,
        symbol: &str,
        interval: Interval,
        candles: &[Candle],
    ) -> Result<usize, StoreError> {
        match self.store.queue(symbol, interval, self.market_type, candles) {
            Ok(accepted) => Ok(accepted),
            // Back-pressure is transient; the next pass retries this hole.
            Err(StoreError::QueueFull { rejected }) => {
                tracing::warn!(symbol, interval = %interval, rejected, "Store queue full");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}
