//! Hot entry cache
//!
//! Keeps recently read or written file entries in memory in front of the
//! disk engine, so folder expansion does not re-parse the same JSON over and
//! over. Uses a synchronous Moka cache; the disk engine stays authoritative.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::sync::Cache;
use tracing::{debug, trace};

use crate::drive::FileEntry;

/// Default number of entries kept hot
const DEFAULT_CAPACITY: u64 = 10_000;

/// Default idle time before an entry is dropped
const DEFAULT_IDLE: Duration = Duration::from_secs(600);

/// Memory cache for file entries with hit/miss accounting
pub struct EntryCache {
    /// Entries keyed by id
    entries: Cache<String, FileEntry>,
    /// Lookups answered from memory
    hits: AtomicU64,
    /// Lookups that fell through to disk
    misses: AtomicU64,
}

impl EntryCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_IDLE)
    }

    /// Create a cache with a custom capacity and idle timeout
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of entries kept
    /// * `idle` - Time an unread entry stays cached
    pub fn with_limits(capacity: u64, idle: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_idle(idle)
            .name("file_entry_cache")
            .build();

        Self {
            entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up an entry, counting the hit or miss
    pub fn get(&self, id: &str) -> Option<FileEntry> {
        match self.entries.get(id) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(id = id, "Entry cache HIT");
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(id = id, "Entry cache MISS");
                None
            }
        }
    }

    pub fn insert(&self, entry: FileEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    pub fn invalidate(&self, id: &str) {
        self.entries.invalidate(id);
        debug!(id = id, "Invalidated cached entry");
    }

    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();
        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            entries = self.entries.entry_count(),
            "Entry cache metrics"
        );
    }
}

impl Default for EntryCache {
    fn default() -> Self {
        Self::new()
    }
}
