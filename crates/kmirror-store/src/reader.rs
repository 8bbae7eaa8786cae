use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use kmirror_models::{Candle, Interval, KlineRecord, MarketType, KLINE_TABLE_DDL};

use crate::error::StoreError;

/// Min/max/count of one persisted (symbol, interval, market) series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub oldest: i64,
    pub newest: i64,
    pub count: u64,
}

/// One row of the diagnostics summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSummary {
    pub symbol: String,
    pub interval: Interval,
    pub market_type: MarketType,
    pub count: u64,
    pub oldest: i64,
    pub newest: i64,
}

/// Read-only accessor for the kline audit database.
pub struct KlineReader {
    conn: Connection,
}

impl KlineReader {
    /// Open a read-only connection to an existing database file.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Writable in-memory database for tests; creates the schema so tests
    /// can seed rows through `insert`.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(KLINE_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Up to `limit` candles oldest-first, optionally bounded by
    /// `open_time < end_time`.
    pub fn get_range(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, StoreError> {
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Candle> {
            Ok(Candle {
                open_time: row.get(0)?,
                open: row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                high: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                low: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                close: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                volume: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
                turnover: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                raw: serde_json::Value::Null,
            })
        };

        // Newest-first with LIMIT, then reversed so callers always see
        // ascending open_time.
        let mut candles = if let Some(end) = end_time {
            let mut stmt = self.conn.prepare_cached(
                "SELECT open_time, open_price, high_price, low_price, close_price, volume, turnover \
                 FROM kline_audit \
                 WHERE symbol = ?1 AND interval = ?2 AND market_type = ?3 AND open_time < ?4 \
                 ORDER BY open_time DESC LIMIT ?5",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![
                        symbol,
                        interval.as_str(),
                        market_type.as_str(),
                        end,
                        limit as i64
                    ],
                    map_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        } else {
            let mut stmt = self.conn.prepare_cached(
                "SELECT open_time, open_price, high_price, low_price, close_price, volume, turnover \
                 FROM kline_audit \
                 WHERE symbol = ?1 AND interval = ?2 AND market_type = ?3 \
                 ORDER BY open_time DESC LIMIT ?4",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![symbol, interval.as_str(), market_type.as_str(), limit as i64],
                    map_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        candles.reverse();
        Ok(candles)
    }

    /// (oldest, newest, count) for one pair, or `None` when empty.
    pub fn coverage(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
    ) -> Result<Option<Coverage>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT MIN(open_time), MAX(open_time), COUNT(*) FROM kline_audit \
             WHERE symbol = ?1 AND interval = ?2 AND market_type = ?3",
        )?;
        let row = stmt.query_row(
            rusqlite::params![symbol, interval.as_str(), market_type.as_str()],
            |row| {
                Ok((
                    row.get::<_, Option<i64>>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, u64>(2)?,
                ))
            },
        )?;
        match row {
            (Some(oldest), Some(newest), count) if count > 0 => Ok(Some(Coverage {
                oldest,
                newest,
                count,
            })),
            _ => Ok(None),
        }
    }

    pub fn newest_open_time(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
    ) -> Result<Option<i64>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT MAX(open_time) FROM kline_audit \
             WHERE symbol = ?1 AND interval = ?2 AND market_type = ?3",
        )?;
        let newest: Option<i64> = stmt.query_row(
            rusqlite::params![symbol, interval.as_str(), market_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(newest)
    }

    /// The full ascending open_time column for one pair. Feeds the gap scan.
    pub fn open_times(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
    ) -> Result<Vec<i64>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT open_time FROM kline_audit \
             WHERE symbol = ?1 AND interval = ?2 AND market_type = ?3 \
             ORDER BY open_time ASC",
        )?;
        let times = stmt
            .query_map(
                rusqlite::params![symbol, interval.as_str(), market_type.as_str()],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(times)
    }

    /// Aggregate rows per (symbol, interval, market) for diagnostics.
    /// Rows with intervals this build does not know are skipped.
    pub fn summary(&self) -> Result<Vec<PairSummary>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT symbol, interval, market_type, COUNT(*), MIN(open_time), MAX(open_time) \
             FROM kline_audit \
             GROUP BY symbol, interval, market_type \
             ORDER BY symbol, interval, market_type",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(symbol, interval, market, count, oldest, newest)| {
                let interval: Interval = interval.parse().ok()?;
                let market_type: MarketType = market.parse().ok()?;
                Some(PairSummary {
                    symbol,
                    interval,
                    market_type,
                    count,
                    oldest,
                    newest,
                })
            })
            .collect())
    }

    /// Seed helper for tests; production writes go through the writer task.
    pub fn insert(&self, record: &KlineRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kline_audit \
             (symbol, interval, market_type, open_time, open_time_dt, \
              open_price, high_price, low_price, close_price, volume, turnover, raw) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                record.symbol,
                record.interval.as_str(),
                record.market_type.as_str(),
                record.open_time,
                record.open_time_dt,
                record.open,
                record.high,
                record.low,
                record.close,
                record.volume,
                record.turnover,
                record.raw,
            ],
        )?;
        Ok(())
    }
}
