use async_trait::async_trait;

use kmirror_models::{Candle, Interval, MarketType};

use crate::error::AdapterError;
use crate::history::HistoryWalk;

/// The venue seam the service, gap repair engine and quality monitor depend
/// on. Tests substitute a scripted implementation; production wires in
/// `BybitAdapter`.
#[async_trait]
pub trait KlineSource: Send + Sync {
    /// Up to `limit` candles ending at "now", oldest-first. Transport
    /// failures surface as an empty list, not an error.
    async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        market_type: MarketType,
    ) -> Result<Vec<Candle>, AdapterError>;

    /// Up to `limit` candles with `open_time < end_time`, oldest-first.
    async fn get_klines_before(
        &self,
        symbol: &str,
        interval: Interval,
        end_time: i64,
        limit: usize,
        market_type: MarketType,
    ) -> Result<Vec<Candle>, AdapterError>;

    /// Up to `total_candles` rows assembled by paging backwards from
    /// `end_time` (or "now"), oldest-first, deduplicated by open_time.
    /// A venue with less coverage than requested yields fewer rows.
    async fn get_klines_historical(
        &self,
        symbol: &str,
        interval: Interval,
        total_candles: usize,
        end_time: Option<i64>,
        market_type: MarketType,
    ) -> Result<Vec<Candle>, AdapterError> {
        HistoryWalk::new(self, symbol, interval, total_candles, end_time, market_type)
            .collect()
            .await
    }
}
