//! Scripted venue doubles and series builders shared by the integration
//! tests. Not part of the public API surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use kmirror_bybit::{AdapterError, KlineSource};
use kmirror_models::{Candle, Interval, MarketType};

/// A venue whose series are seeded by the test. `get_klines` serves the
/// newest `limit` rows; `get_klines_before` filters by the end bound.
#[derive(Default)]
pub struct MockSource {
    series: Mutex<HashMap<(String, Interval), Vec<Candle>>>,
    calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_series(&self, symbol: &str, interval: Interval, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.open_time);
        let mut series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        series.insert((symbol.to_string(), interval), candles);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, symbol: &str, interval: Interval) -> Vec<Candle> {
        let series = self.series.lock().unwrap_or_else(|e| e.into_inner());
        series
            .get(&(symbol.to_string(), interval))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl KlineSource for MockSource {
    async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        _market_type: MarketType,
    ) -> Result<Vec<Candle>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut candles = self.lookup(symbol, interval);
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    async fn get_klines_before(
        &self,
        symbol: &str,
        interval: Interval,
        end_time: i64,
        limit: usize,
        _market_type: MarketType,
    ) -> Result<Vec<Candle>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut candles = self.lookup(symbol, interval);
        candles.retain(|c| c.open_time < end_time);
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }
}

/// Contiguous candles at `interval` spacing, ending at `end_ms` (the last
/// open_time), with a gently drifting close so continuity checks see a
/// realistic series.
pub fn series_ending_at(interval: Interval, end_ms: i64, count: usize) -> Vec<Candle> {
    let span = interval.ms();
    let mut candles = Vec::with_capacity(count);
    let mut price = 100.0;
    for i in 0..count {
        let open_time = end_ms - (count as i64 - 1 - i as i64) * span;
        let drift = if i % 2 == 0 { 0.0002 } else { -0.0002 };
        let close = price * (1.0 + drift);
        candles.push(Candle::new(
            open_time,
            price,
            price.max(close) * 1.0005,
            price.min(close) * 0.9995,
            close,
            50.0 + (i % 10) as f64,
        ));
        price = close;
    }
    candles
}

/// A series with the candles inside `(hole_start, hole_end)` removed.
pub fn series_with_hole(
    interval: Interval,
    end_ms: i64,
    count: usize,
    hole_start: i64,
    hole_end: i64,
) -> Vec<Candle> {
    series_ending_at(interval, end_ms, count)
        .into_iter()
        .filter(|c| c.open_time <= hole_start || c.open_time >= hole_end)
        .collect()
}
