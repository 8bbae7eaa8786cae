use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use kmirror_models::{Candle, Interval, KlineRecord, MarketType, StoreConfig};

use crate::error::StoreError;
use crate::reader::{Coverage, KlineReader, PairSummary};
use crate::writer::SqliteWriter;

#[derive(Default)]
struct StoreCounters {
    written: AtomicU64,
    errors: AtomicU64,
    flushes: AtomicU64,
}

/// Snapshot of the store's counters for diagnostics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreStats {
    pub pending_rows: usize,
    pub written: u64,
    pub errors: u64,
    pub flushes: u64,
    pub running: bool,
}

/// Queued, batched, idempotent persistence for kline rows.
///
/// One background task owns the writable connection and drains the ingest
/// channel; it flushes when the local buffer reaches `batch_size` or when
/// `batch_flush_ms` has passed since the first buffered row. Readers go
/// through a separate read-only connection and never block the writer.
pub struct KlineStore {
    tx: Mutex<Option<mpsc::Sender<Vec<KlineRecord>>>>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<KlineReader>,
    admin: Mutex<SqliteWriter>,
    pending: Arc<AtomicUsize>,
    counters: Arc<StoreCounters>,
    stopped: AtomicBool,
    config: StoreConfig,
}

impl KlineStore {
    /// Open the database and spawn the writer task. Must be called from
    /// within a tokio runtime.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = SqliteWriter::open(&config.db_path)?;
        let admin = SqliteWriter::open(&config.db_path)?;
        let reader = KlineReader::open(&config.db_path)?;

        let (tx, rx) = mpsc::channel::<Vec<KlineRecord>>(1024);
        let pending = Arc::new(AtomicUsize::new(0));
        let counters = Arc::new(StoreCounters::default());

        let handle = tokio::spawn(write_loop(
            rx,
            writer,
            config.clone(),
            pending.clone(),
            counters.clone(),
        ));

        tracing::info!(db_path = %config.db_path, "Kline store opened");

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            writer_handle: Mutex::new(Some(handle)),
            reader: Mutex::new(reader),
            admin: Mutex::new(admin),
            pending,
            counters,
            stopped: AtomicBool::new(false),
            config,
        })
    }

    /// Enqueue candles for persistence. Non-blocking; returns the number of
    /// rows accepted. Rows without a usable open_time are dropped and
    /// counted as errors. Fails with `QueueFull` when accepting the batch
    /// would exceed the pending-row bound, and with `Stopped` after
    /// shutdown.
    pub fn queue(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
        candles: &[Candle],
    ) -> Result<usize, StoreError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(StoreError::Stopped);
        }

        let records: Vec<KlineRecord> = candles
            .iter()
            .filter_map(|c| KlineRecord::from_candle(symbol, interval, market_type, c))
            .collect();
        let skipped = candles.len() - records.len();
        if skipped > 0 {
            self.counters
                .errors
                .fetch_add(skipped as u64, Ordering::Relaxed);
            tracing::warn!(symbol, interval = %interval, skipped, "Dropped rows without open_time");
        }
        if records.is_empty() {
            return Ok(0);
        }

        let n = records.len();
        self.reserve(n)?;

        let sender = {
            let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        let Some(sender) = sender else {
            self.pending.fetch_sub(n, Ordering::AcqRel);
            return Err(StoreError::Stopped);
        };

        match sender.try_send(records) {
            Ok(()) => {
                tracing::debug!(symbol, interval = %interval, queued = n, "Queued klines");
                Ok(n)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.pending.fetch_sub(n, Ordering::AcqRel);
                Err(StoreError::QueueFull { rejected: n })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.pending.fetch_sub(n, Ordering::AcqRel);
                Err(StoreError::Stopped)
            }
        }
    }

    /// Claim `n` rows of queue capacity or fail with `QueueFull`.
    fn reserve(&self, n: usize) -> Result<(), StoreError> {
        let capacity = self.config.queue_capacity;
        let mut current = self.pending.load(Ordering::Acquire);
        loop {
            if current + n > capacity {
                return Err(StoreError::QueueFull { rejected: n });
            }
            match self.pending.compare_exchange_weak(
                current,
                current + n,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Close the ingest channel and wait for the writer to drain, bounded
    /// by the configured shutdown grace. Rows still buffered after the
    /// deadline are dropped with a warning.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the only sender ends the writer's recv loop after drain.
        {
            let mut guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            guard.take();
        }

        let handle = {
            let mut guard = self.writer_handle.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(handle) = handle {
            let grace = Duration::from_secs(self.config.shutdown_grace_secs);
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => tracing::info!("Kline store writer drained"),
                Ok(Err(e)) => tracing::error!(error = %e, "Kline store writer panicked"),
                Err(_) => {
                    let dropped = self.pending.load(Ordering::Acquire);
                    tracing::warn!(dropped, "Writer drain deadline hit; pending rows dropped");
                }
            }
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            pending_rows: self.pending.load(Ordering::Acquire),
            written: self.counters.written.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            running: !self.stopped.load(Ordering::Acquire),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_range(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, StoreError> {
        let reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        reader.get_range(symbol, interval, market_type, limit, end_time)
    }

    pub fn get_coverage(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
    ) -> Result<Option<Coverage>, StoreError> {
        let reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        reader.coverage(symbol, interval, market_type)
    }

    pub fn newest_open_time(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
    ) -> Result<Option<i64>, StoreError> {
        let reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        reader.newest_open_time(symbol, interval, market_type)
    }

    pub fn open_times(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
    ) -> Result<Vec<i64>, StoreError> {
        let reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        reader.open_times(symbol, interval, market_type)
    }

    pub fn summary(&self) -> Result<Vec<PairSummary>, StoreError> {
        let reader = self.reader.lock().unwrap_or_else(|e| e.into_inner());
        reader.summary()
    }

    // ------------------------------------------------------------------
    // Maintenance (retention enforcement)
    // ------------------------------------------------------------------

    pub fn delete_before(&self, min_ts: i64) -> Result<usize, StoreError> {
        let admin = self.admin.lock().unwrap_or_else(|e| e.into_inner());
        admin.delete_before(min_ts)
    }

    pub fn delete_pair_before(
        &self,
        symbol: &str,
        interval: Interval,
        market_type: MarketType,
        cutoff_ts: i64,
    ) -> Result<usize, StoreError> {
        let admin = self.admin.lock().unwrap_or_else(|e| e.into_inner());
        admin.delete_pair_before(symbol, interval, market_type, cutoff_ts)
    }
}

/// The single writer task. Buffers incoming batches and flushes on size or
/// timer; exits when the channel closes (after a final flush) or when a
/// batch-level transaction fails, which stops ingestion until restart.
async fn write_loop(
    mut rx: mpsc::Receiver<Vec<KlineRecord>>,
    mut writer: SqliteWriter,
    config: StoreConfig,
    pending: Arc<AtomicUsize>,
    counters: Arc<StoreCounters>,
) {
    tracing::debug!("Store write loop started");
    let flush_after = Duration::from_millis(config.batch_flush_ms);
    let mut buffer: Vec<KlineRecord> = Vec::with_capacity(config.batch_size);
    let mut deadline: Option<Instant> = None;

    loop {
        let flush_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));
        tokio::select! {
            batch = rx.recv() => match batch {
                Some(mut rows) => {
                    if buffer.is_empty() {
                        deadline = Some(Instant::now() + flush_after);
                    }
                    buffer.append(&mut rows);
                    if buffer.len() >= config.batch_size {
                        if !flush(&mut writer, &mut buffer, &pending, &counters) {
                            return;
                        }
                        deadline = None;
                    }
                }
                None => break,
            },
            _ = tokio::time::sleep_until(flush_at), if deadline.is_some() => {
                if !flush(&mut writer, &mut buffer, &pending, &counters) {
                    return;
                }
                deadline = None;
            }
        }
    }

    // Channel closed: drain whatever is buffered before exiting.
    flush(&mut writer, &mut buffer, &pending, &counters);
    tracing::debug!("Store write loop stopped");
}

/// Returns false on a batch-level storage failure, which terminates the
/// writer (StorageFatal semantics: stop accepting rows until restart).
fn flush(
    writer: &mut SqliteWriter,
    buffer: &mut Vec<KlineRecord>,
    pending: &AtomicUsize,
    counters: &StoreCounters,
) -> bool {
    if buffer.is_empty() {
        return true;
    }
    let n = buffer.len();
    match writer.upsert_batch(buffer) {
        Ok(outcome) => {
            counters
                .written
                .fetch_add(outcome.written as u64, Ordering::Relaxed);
            counters
                .errors
                .fetch_add(outcome.errors as u64, Ordering::Relaxed);
            counters.flushes.fetch_add(1, Ordering::Relaxed);
            pending.fetch_sub(n, Ordering::AcqRel);
            buffer.clear();
            tracing::debug!(
                written = outcome.written,
                errors = outcome.errors,
                "Flushed batch"
            );
            true
        }
        Err(e) => {
            pending.fetch_sub(n, Ordering::AcqRel);
            counters.errors.fetch_add(n as u64, Ordering::Relaxed);
            buffer.clear();
            tracing::error!(error = %e, rows = n, "Batch flush failed; writer stopping");
            false
        }
    }
}
