//! Stress tests for concurrent read/write access to the kline database.
//!
//! WAL mode must let the writer upsert batches while readers scan the same
//! file without SQLITE_BUSY errors or torn batches.
//!
//! Run with:
//! ```bash
//! cargo test -p kmirror-store --test wal_stress
//! ```

use std::sync::{Arc, Barrier};
use std::thread;

use kmirror_models::{Candle, Interval, KlineRecord, MarketType};
use kmirror_store::{KlineReader, SqliteWriter};

fn make_record(symbol: &str, open_time: i64, close: f64) -> KlineRecord {
    let candle = Candle::new(open_time, close - 1.0, close + 1.0, close - 2.0, close, 5.0);
    KlineRecord::from_candle(symbol, Interval::Min1, MarketType::Linear, &candle).unwrap()
}

#[test]
fn concurrent_writer_and_readers_no_busy_errors() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stress.db");
    let path_str = db_path.to_str().unwrap();

    // Writer creates the DB and enables WAL.
    let mut writer = SqliteWriter::open(path_str).unwrap();
    let seed: Vec<KlineRecord> = (1..=50)
        .map(|i| make_record("BTCUSDT", i * 60_000, i as f64))
        .collect();
    writer.upsert_batch(&seed).unwrap();

    let write_batches = 200;
    let reader_count = 4;
    let reads_per_reader = 100;

    let barrier = Arc::new(Barrier::new(1 + reader_count));

    let writer_barrier = barrier.clone();
    let writer_path = path_str.to_string();
    let writer_handle = thread::spawn(move || {
        writer_barrier.wait();
        let mut writer = SqliteWriter::open(&writer_path).unwrap();
        for i in 0..write_batches {
            let base = (100 + i * 5) as i64 * 60_000;
            let batch: Vec<KlineRecord> = (0..5)
                .map(|j| make_record("BTCUSDT", base + j * 60_000, (i * 5 + j) as f64))
                .collect();
            writer.upsert_batch(&batch).unwrap();
        }
    });

    let reader_handles: Vec<_> = (0..reader_count)
        .map(|reader_id| {
            let b = barrier.clone();
            let p = path_str.to_string();
            thread::spawn(move || {
                b.wait();
                let reader = KlineReader::open(&p).unwrap();
                let mut found = 0usize;
                for _ in 0..reads_per_reader {
                    let range = reader
                        .get_range("BTCUSDT", Interval::Min1, MarketType::Linear, 50, None)
                        .unwrap();
                    found += range.len();
                    if let Some(coverage) = reader
                        .coverage("BTCUSDT", Interval::Min1, MarketType::Linear)
                        .unwrap()
                    {
                        assert!(coverage.count >= 50);
                    }
                }
                (reader_id, found)
            })
        })
        .collect();

    writer_handle.join().expect("writer thread panicked");
    for handle in reader_handles {
        let (id, found) = handle.join().expect("reader thread panicked");
        assert!(found > 0, "Reader {id} found zero rows");
    }
}

#[test]
fn readers_never_see_partial_batches() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("consistency.db");
    let path_str = db_path.to_str().unwrap();

    let mut writer = SqliteWriter::open(path_str).unwrap();

    // Each batch writes 10 contiguous minutes with a batch-unique close
    // price. A reader must never observe a partially applied batch.
    let batch_count = 50i64;
    let rows_per_batch = 10i64;

    let reader_path = path_str.to_string();
    let barrier = Arc::new(Barrier::new(2));
    let reader_barrier = barrier.clone();

    let reader_handle = thread::spawn(move || {
        reader_barrier.wait();
        let reader = KlineReader::open(&reader_path).unwrap();
        let mut complete_batches_seen = 0usize;
        for _ in 0..200 {
            let rows = reader
                .get_range("BATCH", Interval::Min1, MarketType::Linear, 10_000, None)
                .unwrap_or_default();
            let mut by_batch: std::collections::HashMap<i64, Vec<f64>> =
                std::collections::HashMap::new();
            for row in &rows {
                let batch_id = row.open_time / (rows_per_batch * 60_000);
                by_batch.entry(batch_id).or_default().push(row.close);
            }
            for (batch_id, closes) in &by_batch {
                if closes.len() == rows_per_batch as usize {
                    let first = closes[0];
                    assert!(
                        closes.iter().all(|c| *c == first),
                        "batch {batch_id} visible with mixed values"
                    );
                    complete_batches_seen += 1;
                }
            }
        }
        complete_batches_seen
    });

    barrier.wait();
    for i in 0..batch_count {
        let batch: Vec<KlineRecord> = (0..rows_per_batch)
            .map(|j| make_record("BATCH", (i * rows_per_batch + j) * 60_000, i as f64))
            .collect();
        writer.upsert_batch(&batch).unwrap();
    }

    let seen = reader_handle.join().expect("reader panicked");
    assert!(seen > 0, "reader never observed a complete batch");
}

#[test]
fn retention_delete_during_concurrent_reads() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("retention.db");
    let path_str = db_path.to_str().unwrap();

    let mut writer = SqliteWriter::open(path_str).unwrap();
    let rows: Vec<KlineRecord> = (1..=100)
        .map(|i| make_record("BTCUSDT", i * 60_000, i as f64))
        .collect();
    writer.upsert_batch(&rows).unwrap();

    let reader = KlineReader::open(path_str).unwrap();
    let before = reader
        .coverage("BTCUSDT", Interval::Min1, MarketType::Linear)
        .unwrap()
        .unwrap();
    assert_eq!(before.count, 100);

    let deleted = writer.delete_before(51 * 60_000).unwrap();
    assert_eq!(deleted, 50);

    let after = reader
        .coverage("BTCUSDT", Interval::Min1, MarketType::Linear)
        .unwrap()
        .unwrap();
    assert_eq!(after.count, 50);
    assert_eq!(after.oldest, 51 * 60_000);
}
