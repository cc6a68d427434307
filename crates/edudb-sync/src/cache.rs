//! In-process TTL cache for hot table reads.
//!
//! Writes that land through sync or restore call [`RowCache::invalidate`]
//! as soon as the backing table changes, so readers never serve rows older
//! than the last write plus the TTL, even on runs that fail partway.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::row::Row;

struct CacheEntry {
    rows: Vec<Row>,
    stored_at: Instant,
}

/// One cached result set with an age check on read.
pub struct RowCache {
    slot: RwLock<Option<CacheEntry>>,
}

impl RowCache {
    pub const fn new() -> Self {
        RowCache {
            slot: RwLock::new(None),
        }
    }

    /// The cached rows if stored less than `ttl` ago. An expired entry is
    /// dropped on the way out.
    pub fn get(&self, ttl: Duration) -> Option<Vec<Row>> {
        {
            let guard = match self.slot.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(entry) = guard.as_ref() {
                if entry.stored_at.elapsed() < ttl {
                    return Some(entry.rows.clone());
                }
            } else {
                return None;
            }
        }
        self.invalidate();
        None
    }

    pub fn set(&self, rows: Vec<Row>) {
        let mut guard = match self.slot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(CacheEntry {
            rows,
            stored_at: Instant::now(),
        });
    }

    /// Drop the cached entry. Called synchronously after any write to the
    /// backing table.
    pub fn invalidate(&self) {
        let mut guard = match self.slot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.take().is_some() {
            debug!("Cache invalidated");
        }
    }
}

impl Default for RowCache {
    fn default() -> Self {
        RowCache::new()
    }
}

static MATERIALS_CACHE: RowCache = RowCache::new();

/// Process-wide cache for the materials table.
pub fn materials_cache() -> &'static RowCache {
    &MATERIALS_CACHE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SqlValue;

    fn sample_rows() -> Vec<Row> {
        let mut row = Row::new();
        row.push("id", SqlValue::I32(1));
        row.push("title", SqlValue::Text("Algebra".into()));
        vec![row]
    }

    #[test]
    fn test_empty_cache_misses() {
        let cache = RowCache::new();
        assert!(cache.get(Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_fresh_entry_hits() {
        let cache = RowCache::new();
        cache.set(sample_rows());
        let rows = cache.get(Duration::from_secs(60)).unwrap();
        assert_eq!(rows, sample_rows());
    }

    #[test]
    fn test_zero_ttl_always_expires() {
        let cache = RowCache::new();
        cache.set(sample_rows());
        assert!(cache.get(Duration::ZERO).is_none());
        // The expired entry is gone, not just hidden.
        assert!(cache.get(Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_invalidate_clears_entry() {
        let cache = RowCache::new();
        cache.set(sample_rows());
        cache.invalidate();
        assert!(cache.get(Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_set_replaces_previous_entry() {
        let cache = RowCache::new();
        cache.set(sample_rows());
        let mut newer = Row::new();
        newer.push("id", SqlValue::I32(2));
        cache.set(vec![newer.clone()]);
        assert_eq!(cache.get(Duration::from_secs(60)), Some(vec![newer]));
    }
}
