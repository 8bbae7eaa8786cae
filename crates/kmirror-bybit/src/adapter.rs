use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use kmirror_models::{AdapterConfig, Candle, Interval, MarketType};

use crate::endpoints::{KlineEndpoint, INSTRUMENTS_PATH, KLINE_CASCADE, RECENT_TRADES_PATH};
use crate::error::AdapterError;
use crate::normalize::{extract_rows, normalize_kline_row, sort_dedup};
use crate::source::KlineSource;

/// One tradable instrument from `instruments-info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub status: String,
    pub is_pre_listing: bool,
}

impl Instrument {
    pub fn is_trading(&self) -> bool {
        self.status == "Trading" && !self.is_pre_listing
    }
}

type InstrumentMap = HashMap<String, Instrument>;

/// One executed trade from `recent-trade`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub time: i64,
    pub price: f64,
    pub qty: f64,
    pub side: String,
}

/// Stateless wrapper around the Bybit v5 REST surface.
///
/// Normalizes rows, cascades through endpoint variants until one yields
/// data, honors a minimum inter-request delay, and retries transient
/// failures with exponential backoff. Kline reads never fail to callers:
/// when every variant comes up empty the result is an empty list and the
/// failure is kept in `last_error` for diagnostics.
pub struct BybitAdapter {
    http: reqwest::Client,
    config: AdapterConfig,
    instruments: Cache<String, Arc<InstrumentMap>>,
    stale_instruments: Mutex<HashMap<String, Arc<InstrumentMap>>>,
    gate: RateGate,
    last_status: AtomicU16,
    last_endpoint: Mutex<Option<KlineEndpoint>>,
    last_error: Mutex<Option<String>>,
}

impl BybitAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, AdapterError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.instruments_timeout_secs.max(1)))
            .build()?;
        let instruments = Cache::builder()
            .max_capacity(8)
            .time_to_live(Duration::from_secs(config.instruments_ttl_secs))
            .build();
        let gate = RateGate::new(Duration::from_millis(config.rate_limit_ms));
        Ok(Self {
            http,
            config,
            instruments,
            stale_instruments: Mutex::new(HashMap::new()),
            gate,
            last_status: AtomicU16::new(0),
            last_endpoint: Mutex::new(None),
            last_error: Mutex::new(None),
        })
    }

    /// HTTP status of the most recent venue response, 0 before any call.
    pub fn last_status(&self) -> u16 {
        self.last_status.load(Ordering::Relaxed)
    }

    /// The endpoint variant that served the most recent successful kline
    /// fetch.
    pub fn last_endpoint(&self) -> Option<KlineEndpoint> {
        *self.last_endpoint.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record_error(&self, message: String) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
    }

    /// Symbols to try when the caller's string does not match the venue
    /// format: as given, uppercased, and with the USDT suffix appended.
    fn symbol_candidates(symbol: &str) -> Vec<String> {
        let mut candidates = vec![symbol.to_string()];
        let upper = symbol.to_uppercase();
        if !candidates.contains(&upper) {
            candidates.push(upper.clone());
        }
        if !upper.ends_with("USDT") {
            candidates.push(format!("{upper}USDT"));
        }
        candidates
    }

    /// GET with rate gating and bounded retry. Connect errors, timeouts and
    /// 5xx responses back off and retry; 4xx fails immediately.
    async fn fetch_json(
        &self,
        path: &str,
        query: &[(String, String)],
        timeout: Duration,
    ) -> Result<serde_json::Value, AdapterError> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut delay = self.config.retry_initial_secs.max(0.0);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.gate.wait().await;

            let response = self
                .http
                .get(&url)
                .query(query)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    self.last_status.store(status.as_u16(), Ordering::Relaxed);
                    if status.is_success() {
                        return Ok(resp.json::<serde_json::Value>().await?);
                    }
                    if status.is_client_error() {
                        return Err(AdapterError::Venue(format!("HTTP {status} from {path}")));
                    }
                    tracing::debug!(path, status = status.as_u16(), attempt, "Server error");
                    if attempt >= self.config.retry_max_attempts {
                        return Err(AdapterError::Venue(format!(
                            "HTTP {status} from {path} after {attempt} attempts"
                        )));
                    }
                }
                Err(e) => {
                    self.last_status.store(0, Ordering::Relaxed);
                    tracing::debug!(path, error = %e, attempt, "Request failed");
                    if attempt >= self.config.retry_max_attempts {
                        return Err(AdapterError::Http(e));
                    }
                }
            }

            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            delay = (delay * self.config.retry_multiplier).min(self.config.retry_cap_secs);
        }
    }

    /// The shared kline path: candidate symbols x endpoint cascade, first
    /// non-empty normalized page wins.
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        end_time: Option<i64>,
        market_type: MarketType,
    ) -> Vec<Candle> {
        let limit = limit.min(1_000);
        let timeout = Duration::from_secs(self.config.kline_timeout_secs.max(1));

        for candidate in Self::symbol_candidates(symbol) {
            for endpoint in KLINE_CASCADE {
                let query = endpoint.query(&candidate, interval, limit, end_time, market_type);
                let payload = match self.fetch_json(endpoint.path(), &query, timeout).await {
                    Ok(payload) => payload,
                    Err(e) => {
                        self.record_error(e.to_string());
                        tracing::debug!(
                            symbol = %candidate,
                            endpoint = ?endpoint,
                            error = %e,
                            "Kline probe failed, trying next variant"
                        );
                        continue;
                    }
                };

                let mut candles: Vec<Candle> = extract_rows(&payload)
                    .iter()
                    .filter_map(normalize_kline_row)
                    .collect();
                if candles.is_empty() {
                    continue;
                }
                sort_dedup(&mut candles);
                if let Some(end) = end_time {
                    // Legacy variants ignore the end bound server-side.
                    candles.retain(|c| c.open_time < end);
                }
                if candles.len() > limit {
                    candles.drain(..candles.len() - limit);
                }
                if candles.is_empty() {
                    continue;
                }

                *self
                    .last_endpoint
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(endpoint);
                tracing::info!(
                    symbol = %candidate,
                    interval = %interval,
                    count = candles.len(),
                    endpoint = ?endpoint,
                    "Fetched klines"
                );
                return candles;
            }
        }

        tracing::warn!(symbol, interval = %interval, "All kline endpoint variants failed");
        Vec::new()
    }

    async fn fetch_instruments(
        &self,
        market_type: MarketType,
    ) -> Result<Arc<InstrumentMap>, AdapterError> {
        let timeout = Duration::from_secs(self.config.instruments_timeout_secs.max(1));
        let query = vec![("category".to_string(), market_type.as_str().to_string())];
        let payload = self.fetch_json(INSTRUMENTS_PATH, &query, timeout).await?;

        let mut map = InstrumentMap::new();
        for row in extract_rows(&payload) {
            let Some(symbol) = row.get("symbol").and_then(|v| v.as_str()) else {
                continue;
            };
            let status = row
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let is_pre_listing = row
                .get("isPreListing")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            map.insert(
                symbol.to_string(),
                Instrument {
                    symbol: symbol.to_string(),
                    status,
                    is_pre_listing,
                },
            );
        }
        Ok(Arc::new(map))
    }

    /// Instrument map for a category, cached with a TTL. Refresh is
    /// single-flight; a failed refresh serves the previous snapshot when
    /// one exists.
    async fn instruments(&self, market_type: MarketType) -> Result<Arc<InstrumentMap>, AdapterError> {
        let key = market_type.as_str().to_string();
        let fetched = self
            .instruments
            .try_get_with(key.clone(), self.fetch_instruments(market_type))
            .await;
        match fetched {
            Ok(map) => {
                self.stale_instruments
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key, map.clone());
                Ok(map)
            }
            Err(e) => {
                tracing::warn!(category = %market_type, error = %e, "Instrument refresh failed");
                let stale = self
                    .stale_instruments
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(&key)
                    .cloned();
                stale.ok_or_else(|| AdapterError::Venue(e.to_string()))
            }
        }
    }

    /// Tradable instruments for a category, cached for the configured TTL.
    pub async fn get_symbols_list(
        &self,
        market_type: MarketType,
        trading_only: bool,
    ) -> Result<Vec<String>, AdapterError> {
        let map = self.instruments(market_type).await?;
        let mut symbols: Vec<String> = map
            .values()
            .filter(|i| !trading_only || i.is_trading())
            .map(|i| i.symbol.clone())
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    /// Resolve a caller-supplied symbol to its canonical venue form, or
    /// fail with `UnknownSymbol` when no trading instrument matches.
    pub async fn validate_symbol(
        &self,
        symbol: &str,
        market_type: MarketType,
    ) -> Result<String, AdapterError> {
        if symbol.is_empty() {
            return Err(AdapterError::UnknownSymbol(String::new()));
        }
        let map = self.instruments(market_type).await?;
        let upper = symbol.to_uppercase();

        if let Some(instrument) = map.get(&upper) {
            if instrument.is_trading() {
                return Ok(upper);
            }
            return Err(AdapterError::UnknownSymbol(format!("{upper} not trading")));
        }
        if !upper.ends_with("USDT") {
            let candidate = format!("{upper}USDT");
            if let Some(instrument) = map.get(&candidate) {
                if instrument.is_trading() {
                    return Ok(candidate);
                }
                return Err(AdapterError::UnknownSymbol(format!(
                    "{candidate} not trading"
                )));
            }
        }
        Err(AdapterError::UnknownSymbol(symbol.to_string()))
    }

    /// Recent executed trades; tick-resolution data next to the minute
    /// candles. Failures degrade to an empty list.
    pub async fn get_recent_trades(&self, symbol: &str, limit: usize) -> Vec<Trade> {
        let timeout = Duration::from_secs(self.config.kline_timeout_secs.max(1));
        for candidate in Self::symbol_candidates(symbol) {
            let query = vec![
                ("category".to_string(), "linear".to_string()),
                ("symbol".to_string(), candidate.clone()),
                ("limit".to_string(), limit.to_string()),
            ];
            let payload = match self.fetch_json(RECENT_TRADES_PATH, &query, timeout).await {
                Ok(payload) => payload,
                Err(e) => {
                    self.record_error(e.to_string());
                    continue;
                }
            };
            let trades: Vec<Trade> = extract_rows(&payload)
                .iter()
                .filter_map(|row| {
                    let time = row
                        .get("execTime")
                        .or_else(|| row.get("time"))
                        .and_then(lenient_i64)?;
                    Some(Trade {
                        time,
                        price: row.get("price").and_then(lenient_f64).unwrap_or(0.0),
                        qty: row
                            .get("size")
                            .or_else(|| row.get("qty"))
                            .and_then(lenient_f64)
                            .unwrap_or(0.0),
                        side: row
                            .get("side")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown")
                            .to_lowercase(),
                    })
                })
                .collect();
            if !trades.is_empty() {
                return trades;
            }
        }
        tracing::warn!(symbol, "Could not fetch recent trades");
        Vec::new()
    }
}

fn lenient_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn lenient_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl KlineSource for BybitAdapter {
    async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        market_type: MarketType,
    ) -> Result<Vec<Candle>, AdapterError> {
        Ok(self
            .fetch_klines(symbol, interval, limit, None, market_type)
            .await)
    }

    async fn get_klines_before(
        &self,
        symbol: &str,
        interval: Interval,
        end_time: i64,
        limit: usize,
        market_type: MarketType,
    ) -> Result<Vec<Candle>, AdapterError> {
        Ok(self
            .fetch_klines(symbol, interval, limit, Some(end_time), market_type)
            .await)
    }
}

/// Enforces the minimum inter-request delay across all adapter calls.
struct RateGate {
    min_delay: Duration,
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

impl RateGate {
    fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_request: tokio::sync::Mutex::new(None),
        }
    }

    async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_expansion_adds_upper_and_suffix() {
        assert_eq!(
            BybitAdapter::symbol_candidates("btc"),
            vec!["btc", "BTC", "BTCUSDT"]
        );
        assert_eq!(
            BybitAdapter::symbol_candidates("ethusdt"),
            vec!["ethusdt", "ETHUSDT"]
        );
        assert_eq!(BybitAdapter::symbol_candidates("BTCUSDT"), vec!["BTCUSDT"]);
    }

    #[test]
    fn instrument_trading_predicate() {
        let trading = Instrument {
            symbol: "BTCUSDT".into(),
            status: "Trading".into(),
            is_pre_listing: false,
        };
        let pre_listing = Instrument {
            symbol: "NEWUSDT".into(),
            status: "Trading".into(),
            is_pre_listing: true,
        };
        let delisted = Instrument {
            symbol: "OLDUSDT".into(),
            status: "Closed".into(),
            is_pre_listing: false,
        };
        assert!(trading.is_trading());
        assert!(!pre_listing.is_trading());
        assert!(!delisted.is_trading());
    }

    #[tokio::test]
    async fn rate_gate_spaces_requests() {
        let gate = RateGate::new(Duration::from_millis(40));
        let start = Instant::now();
        gate.wait().await;
        gate.wait().await;
        gate.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn adapter_builds_from_default_config() {
        let adapter = BybitAdapter::new(AdapterConfig::default()).unwrap();
        assert_eq!(adapter.last_status(), 0);
        assert!(adapter.last_endpoint().is_none());
        assert!(adapter.last_error().is_none());
    }
}
