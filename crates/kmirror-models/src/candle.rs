use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::interval::Interval;
use crate::market::MarketType;

/// One normalized OHLCV bar as returned by the venue.
///
/// Numeric fields default to 0.0 when the venue row omitted or garbled them;
/// the untouched source row is kept in `raw` for auditing. A row whose
/// `open_time` cannot be recovered never becomes a `Candle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    #[serde(default)]
    pub open: f64,
    #[serde(default)]
    pub high: f64,
    #[serde(default)]
    pub low: f64,
    #[serde(default)]
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub turnover: f64,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

impl Candle {
    /// Bare candle with only the key and prices set; used by tests and the
    /// repair paths that synthesize expectations.
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            turnover: 0.0,
            raw: serde_json::Value::Null,
        }
    }

    /// Derived UTC timestamp for the bar open.
    pub fn open_time_dt(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.open_time).single()
    }
}

/// A candle bound to its persistence key, ready for the store queue.
#[derive(Debug, Clone)]
pub struct KlineRecord {
    pub symbol: String,
    pub interval: Interval,
    pub market_type: MarketType,
    pub open_time: i64,
    pub open_time_dt: Option<String>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
    /// JSON text of the normalized candle, raw venue row included.
    pub raw: String,
}

impl KlineRecord {
    /// Build a record from a normalized candle. Returns `None` for candles
    /// without a usable open_time; those are counted by the caller.
    pub fn from_candle(
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
        candle: &Candle,
    ) -> Option<Self> {
        if candle.open_time <= 0 {
            return None;
        }
        Some(Self {
            symbol: symbol.to_string(),
            interval,
            market_type,
            open_time: candle.open_time,
            open_time_dt: candle.open_time_dt().map(|dt| dt.to_rfc3339()),
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            turnover: candle.turnover,
            raw: serde_json::to_string(candle).unwrap_or_else(|_| "{}".to_string()),
        })
    }

    pub fn to_candle(&self) -> Candle {
        Candle {
            open_time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            turnover: self.turnover,
            raw: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_from_candle_keeps_key_fields() {
        let candle = Candle::new(1_735_689_600_000, 100.0, 101.0, 99.0, 100.5, 1_000.0);
        let record =
            KlineRecord::from_candle("BTCUSDT", Interval::Min15, MarketType::Linear, &candle)
                .unwrap();
        assert_eq!(record.symbol, "BTCUSDT");
        assert_eq!(record.interval, Interval::Min15);
        assert_eq!(record.open_time, 1_735_689_600_000);
        assert!(record.open_time_dt.as_deref().unwrap().starts_with("2025-01-01"));
        assert!(record.raw.contains("\"open_time\":1735689600000"));
    }

    #[test]
    fn record_rejects_missing_open_time() {
        let candle = Candle::new(0, 1.0, 1.0, 1.0, 1.0, 0.0);
        assert!(
            KlineRecord::from_candle("BTCUSDT", Interval::Min1, MarketType::Linear, &candle)
                .is_none()
        );
    }

    #[test]
    fn candle_json_defaults_missing_numerics() {
        let candle: Candle = serde_json::from_str(r#"{"open_time": 1700000000000}"#).unwrap();
        assert_eq!(candle.open, 0.0);
        assert_eq!(candle.volume, 0.0);
        assert!(candle.raw.is_null());
    }
}
