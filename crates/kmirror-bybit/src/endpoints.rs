use kmirror_models::{Interval, MarketType};

/// The kline endpoint cascade, tried in order until one yields rows.
///
/// The chosen variant is recorded by the adapter so operators can see which
/// surface actually served a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlineEndpoint {
    /// Primary v5 market kline for the requested category.
    V5Market,
    /// Legacy spot quote endpoint.
    SpotQuoteV1,
    /// Legacy linear kline endpoint.
    LinearLegacy,
}

pub const KLINE_CASCADE: [KlineEndpoint; 3] = [
    KlineEndpoint::V5Market,
    KlineEndpoint::SpotQuoteV1,
    KlineEndpoint::LinearLegacy,
];

pub const INSTRUMENTS_PATH: &str = "/v5/market/instruments-info";
pub const RECENT_TRADES_PATH: &str = "/v5/market/recent-trade";

impl KlineEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            KlineEndpoint::V5Market => "/v5/market/kline",
            KlineEndpoint::SpotQuoteV1 => "/spot/quote/v1/kline",
            KlineEndpoint::LinearLegacy => "/public/linear/kline",
        }
    }

    /// Query parameters for one kline request. Only the v5 surface accepts
    /// the `end` bound; the legacy endpoints get filtered client-side.
    pub fn query(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        end_time: Option<i64>,
        market_type: MarketType,
    ) -> Vec<(String, String)> {
        let mut params = match self {
            KlineEndpoint::V5Market => vec![
                ("category".to_string(), market_type.as_str().to_string()),
                ("symbol".to_string(), symbol.to_string()),
                ("interval".to_string(), interval.as_str().to_string()),
                ("limit".to_string(), limit.to_string()),
            ],
            KlineEndpoint::SpotQuoteV1 | KlineEndpoint::LinearLegacy => vec![
                ("symbol".to_string(), symbol.to_string()),
                ("interval".to_string(), interval.as_str().to_string()),
                ("limit".to_string(), limit.to_string()),
            ],
        };
        if let Some(end) = end_time {
            if matches!(self, KlineEndpoint::V5Market) {
                params.push(("end".to_string(), end.to_string()));
            }
        }
        params
    }
}
