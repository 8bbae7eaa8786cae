use std::time::Duration;

use rusqlite::Connection;

use kmirror_models::{Interval, KlineRecord, MarketType, KLINE_TABLE_DDL};

use crate::error::StoreError;

/// Writable connection to the kline audit database.
///
/// Opens in WAL journal mode so readers stay concurrent with the single
/// writer task. The schema (including the legacy-index migration) is applied
/// on open.
pub struct SqliteWriter {
    conn: Connection,
}

/// Per-batch flush accounting. Row-level failures do not abort the batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushOutcome {
    pub written: usize,
    pub errors: usize,
}

impl SqliteWriter {
    /// Open a read-write connection. Creates the schema if missing.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(KLINE_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", 10_000)?;
        Ok(Self { conn })
    }

    /// In-memory database for unit tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(KLINE_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Upsert a batch inside one transaction.
    ///
    /// Conflicts on (symbol, interval, market_type, open_time) overwrite the
    /// OHLCV columns and the raw payload and bump inserted_at. Individual row
    /// errors are logged and counted; the surviving rows still commit.
    pub fn upsert_batch(&mut self, rows: &[KlineRecord]) -> Result<FlushOutcome, StoreError> {
        let mut outcome = FlushOutcome::default();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO kline_audit \
                 (symbol, interval, market_type, open_time, open_time_dt, \
                  open_price, high_price, low_price, close_price, volume, turnover, raw, inserted_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, CURRENT_TIMESTAMP) \
                 ON CONFLICT(symbol, interval, market_type, open_time) DO UPDATE SET \
                    open_time_dt = excluded.open_time_dt, \
                    open_price = excluded.open_price, \
                    high_price = excluded.high_price, \
                    low_price = excluded.low_price, \
                    close_price = excluded.close_price, \
                    volume = excluded.volume, \
                    turnover = excluded.turnover, \
                    raw = excluded.raw, \
                    inserted_at = CURRENT_TIMESTAMP",
            )?;
            for row in rows {
                let result = stmt.execute(rusqlite::params![
                    row.symbol,
                    row.interval.as_str(),
                    row.market_type.as_str(),
                    row.open_time,
                    row.open_time_dt,
                    row.open,
                    row.high,
                    row.low,
                    row.close,
                    row.volume,
                    row.turnover,
                    row.raw,
                ]);
                match result {
                    Ok(_) => outcome.written += 1,
                    Err(e) => {
                        outcome.errors += 1;
                        tracing::warn!(
                            symbol = %row.symbol,
                            interval = %row.interval,
                            open_time = row.open_time,
                            error = %e,
                            "Row insert failed"
                        );
                    }
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    /// Delete every candle older than `min_ts`, across all pairs. Returns
    /// the number of rows removed.
    pub fn delete_before(&self, min_ts: i64) -> Result<usize, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM kline_audit WHERE open_time < ?1",
            rusqlite::params![min_ts],
        )?;
        Ok(deleted)
    }

    /// Delete candles of one pair older than `cutoff_ts`.
    pub fn delete_pair_before(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
        cutoff_ts: i64,
    ) -> Result<usize, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM kline_audit \
             WHERE symbol = ?1 AND interval = ?2 AND market_type = ?3 AND open_time < ?4",
            rusqlite::params![symbol, interval.as_str(), market_type.as_str(), cutoff_ts],
        )?;
        Ok(deleted)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM kline_audit", [], |row| row.get(0))?;
        Ok(count)
    }
}
