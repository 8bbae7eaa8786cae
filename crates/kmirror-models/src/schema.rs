/// The kline audit table written by the store's writer task and read by
/// everything else.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS kline_audit (
///     id           INTEGER PRIMARY KEY AUTOINCREMENT,
///     symbol       TEXT NOT NULL,
///     interval     TEXT NOT NULL,
///     market_type  TEXT NOT NULL DEFAULT 'linear',
///     open_time    INTEGER NOT NULL,
///     open_time_dt TEXT,
///     open_price   REAL,
///     high_price   REAL,
///     low_price    REAL,
///     close_price  REAL,
///     volume       REAL,
///     turnover     REAL,
///     raw          TEXT NOT NULL,
///     inserted_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
/// );
/// ```
///
/// The unique index carries the idempotency contract: one row per
/// (symbol, interval, market_type, open_time). Databases created by older
/// builds used a (symbol, open_time) key; dropping that index on open is
/// the forward migration.
pub const KLINE_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS kline_audit (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol       TEXT NOT NULL,
    interval     TEXT NOT NULL,
    market_type  TEXT NOT NULL DEFAULT 'linear',
    open_time    INTEGER NOT NULL,
    open_time_dt TEXT,
    open_price   REAL,
    high_price   REAL,
    low_price    REAL,
    close_price  REAL,
    volume       REAL,
    turnover     REAL,
    raw          TEXT NOT NULL,
    inserted_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE UNIQUE INDEX IF NOT EXISTS uix_symbol_interval_market_open_time
    ON kline_audit(symbol, interval, market_type, open_time);
DROP INDEX IF EXISTS uix_symbol_open_time;
";

/// Cache/progress keys are `{symbol}:{interval}` everywhere a flat string
/// key is needed (RAM working set, loading-progress map, log fields).
pub fn pair_key(symbol: &str, interval: crate::Interval) -> String {
    format!("{symbol}:{interval}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interval;

    #[test]
    fn pair_key_format() {
        assert_eq!(pair_key("BTCUSDT", Interval::Min15), "BTCUSDT:15");
        assert_eq!(pair_key("ETHUSDT", Interval::Day), "ETHUSDT:D");
    }

    #[test]
    fn ddl_migrates_legacy_index() {
        assert!(KLINE_TABLE_DDL.contains("DROP INDEX IF EXISTS uix_symbol_open_time"));
        assert!(KLINE_TABLE_DDL.contains("uix_symbol_interval_market_open_time"));
    }
}
