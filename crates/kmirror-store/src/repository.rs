use std::sync::Arc;

use kmirror_models::{Candle, Interval, MarketType};

use crate::error::StoreError;
use crate::reader::{Coverage, PairSummary};
use crate::store::KlineStore;

/// Thin query facade over the store used by the service layer.
#[derive(Clone)]
pub struct Repository {
    store: Arc<KlineStore>,
}

impl Repository {
    pub fn new(store: Arc<KlineStore>) -> Self {
        Self { store }
    }

    /// Newest `n` candles, oldest-first.
    pub fn last_n(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
        n: usize,
    ) -> Result<Vec<Candle>, StoreError> {
        self.store.get_range(symbol, interval, market_type, n, None)
    }

    /// Newest `n` candles strictly before `end_time`, oldest-first.
    pub fn last_n_before(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
        end_time: i64,
        n: usize,
    ) -> Result<Vec<Candle>, StoreError> {
        self.store
            .get_range(symbol, interval, market_type, n, Some(end_time))
    }

    pub fn coverage(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
    ) -> Result<Option<Coverage>, StoreError> {
        self.store.get_coverage(symbol, interval, market_type)
    }

    pub fn summary(&self) -> Result<Vec<PairSummary>, StoreError> {
        self.store.summary()
    }
}
