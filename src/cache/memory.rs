/// In-memory table of resolved date records.
///
/// ## Role in the tier chain
///
/// **Disk (source of truth):**
/// - One aggregate per date under the cache root
/// - Survives restarts; pruned by retention
///
/// **Memory (hot path):**
/// - One `CacheRecord` per date key, shared out as `Arc`
/// - Empty records are kept too, so a date with no data is not
///   re-resolved on every call
/// - Bounded; the oldest dates are evicted first
///
/// The table itself is synchronous. The resolver wraps it in a mutex and
/// never holds that lock across an await.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::{CacheRecord, DateKey};

// ---------------------------------------------------------------------------
// In-Memory Record Cache
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MemoryCache {
    records: BTreeMap<DateKey, Arc<CacheRecord>>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            max_entries,
        }
    }

    /// Cached record for `date` (fast path).
    pub fn get(&self, date: DateKey) -> Option<Arc<CacheRecord>> {
        self.records.get(&date).cloned()
    }

    /// Stores `record` under its date, replacing any previous one, then
    /// prunes.
    pub fn insert(&mut self, record: Arc<CacheRecord>) {
        self.records.insert(record.date, record);
        self.prune();
    }

    pub fn remove(&mut self, date: DateKey) -> Option<Arc<CacheRecord>> {
        self.records.remove(&date)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Keeps only the dates for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(DateKey) -> bool,
    {
        self.records.retain(|date, _| keep(*date));
    }

    /// Evicts the oldest dates until at most `max_entries` remain.
    /// Returns how many were evicted.
    pub fn prune(&mut self) -> usize {
        let mut evicted = 0;
        while self.records.len() > self.max_entries {
            if self.records.pop_first().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Cached dates, oldest first.
    pub fn dates(&self) -> Vec<DateKey> {
        self.records.keys().copied().collect()
    }
}
