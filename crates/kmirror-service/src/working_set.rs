use std::collections::HashMap;
use std::sync::RwLock;

use kmirror_models::{pair_key, Candle, Interval};

/// The RAM tier: a bounded tail of each (symbol, interval) series.
///
/// Readers get snapshot copies, never references into the map, so callers
/// cannot observe torn state. Mutations happen only through the service.
pub struct WorkingSet {
    limit: usize,
    map: RwLock<HashMap<(String, Interval), Vec<Candle>>>,
}

impl WorkingSet {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Copy of the cached tail for a key, oldest-first.
    pub fn snapshot(&self, symbol: &str, interval: Interval) -> Option<Vec<Candle>> {
        let map = self.map.read().unwrap_or_else(|e| e.into_inner());
        map.get(&(symbol.to_string(), interval)).cloned()
    }

    /// Replace the cached tail with the newest `limit` of `candles`.
    pub fn replace_tail(&self, symbol: &str, interval: Interval, candles: &[Candle]) {
        let start = candles.len().saturating_sub(self.limit);
        let tail = candles[start..].to_vec();
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        map.insert((symbol.to_string(), interval), tail);
    }

    /// Merge fresh candles into the cached tail: dedup by open_time (new
    /// rows win), sort ascending, keep the newest `limit`.
    pub fn merge(&self, symbol: &str, interval: Interval, fresh: &[Candle]) {
        if fresh.is_empty() {
            return;
        }
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        let entry = map
            .entry((symbol.to_string(), interval))
            .or_default();
        entry.retain(|c| !fresh.iter().any(|f| f.open_time == c.open_time));
        entry.extend_from_slice(fresh);
        entry.sort_by_key(|c| c.open_time);
        if entry.len() > self.limit {
            let excess = entry.len() - self.limit;
            entry.drain(..excess);
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let map = self.map.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = map
            .keys()
            .map(|(symbol, interval)| pair_key(symbol, *interval))
            .collect();
        keys.sort();
        keys
    }

    pub fn total_candles(&self) -> usize {
        let map = self.map.read().unwrap_or_else(|e| e.into_inner());
        map.values().map(Vec::len).sum()
    }
}
