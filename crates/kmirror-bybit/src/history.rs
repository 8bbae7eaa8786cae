use chrono::Utc;

use kmirror_models::{Candle, Interval, MarketType};

use crate::error::AdapterError;
use crate::normalize::sort_dedup;
use crate::source::KlineSource;

/// Explicit pull-model pager behind `get_klines_historical`.
///
/// Walks backwards from `current_end`, one venue page per `next_page` call.
/// Terminates when the target is met, a page comes back empty, three
/// consecutive pages run short (venue coverage exhausted), or the page
/// budget runs out.
pub struct HistoryWalk<'a, S: KlineSource + ?Sized> {
    source: &'a S,
    symbol: String,
    interval: Interval,
    market_type: MarketType,
    remaining: usize,
    current_end: i64,
    effective_start: i64,
    short_pages: u32,
    pages_left: usize,
    done: bool,
}

/// Pages smaller than this count towards the exhaustion heuristic.
const SHORT_PAGE_ROWS: usize = 50;
/// Consecutive short pages before the venue is considered exhausted.
const SHORT_PAGE_LIMIT: u32 = 3;
/// Venue cap on rows per request.
const PAGE_LIMIT: usize = 1_000;

impl<'a, S: KlineSource + ?Sized> HistoryWalk<'a, S> {
    pub fn new(
        source: &'a S,
        symbol: &str,
        interval: Interval,
        total_candles: usize,
        end_time: Option<i64>,
        market_type: MarketType,
    ) -> Self {
        let end = end_time.unwrap_or_else(|| Utc::now().timestamp_millis());
        let span = (total_candles as i64).saturating_mul(interval.ms());
        Self {
            source,
            symbol: symbol.to_string(),
            interval,
            market_type,
            remaining: total_candles,
            current_end: end,
            effective_start: end.saturating_sub(span),
            short_pages: 0,
            // Backstop against a venue that pages without progressing.
            pages_left: total_candles.div_ceil(PAGE_LIMIT) * 4 + 10,
            done: false,
        }
    }

    /// Fetch the next page back in time. `Ok(None)` means the walk is over.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Candle>>, AdapterError> {
        if self.done || self.remaining == 0 || self.pages_left == 0 {
            return Ok(None);
        }
        if self.current_end <= self.effective_start {
            return Ok(None);
        }
        self.pages_left -= 1;

        let page_limit = self.remaining.min(PAGE_LIMIT);
        let page = self
            .source
            .get_klines_before(
                &self.symbol,
                self.interval,
                self.current_end,
                page_limit,
                self.market_type,
            )
            .await?;

        if page.is_empty() {
            self.done = true;
            return Ok(None);
        }

        if page.len() < SHORT_PAGE_ROWS {
            self.short_pages += 1;
            if self.short_pages >= SHORT_PAGE_LIMIT {
                self.done = true;
            }
        } else {
            self.short_pages = 0;
        }

        let min_open = page.iter().map(|c| c.open_time).min().unwrap_or(0);
        let current_end = self.current_end;
        let effective_start = self.effective_start;
        let kept: Vec<Candle> = page
            .into_iter()
            .filter(|c| c.open_time >= effective_start && c.open_time < current_end)
            .collect();

        self.remaining = self.remaining.saturating_sub(kept.len());
        // Step strictly past the oldest row even when the filter dropped it.
        self.current_end = min_open.saturating_sub(1);

        Ok(Some(kept))
    }

    /// Drive the walk to completion: oldest-first, deduplicated, at most the
    /// requested total (newest rows win when the venue over-delivers).
    pub async fn collect(mut self) -> Result<Vec<Candle>, AdapterError> {
        let target = self.remaining;
        let mut assembled: Vec<Candle> = Vec::new();
        while let Some(page) = self.next_page().await? {
            assembled.extend(page);
        }
        sort_dedup(&mut assembled);
        if assembled.len() > target {
            assembled.drain(..assembled.len() - target);
        }
        Ok(assembled)
    }
}
