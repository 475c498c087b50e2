//! In-memory counter store.
//!
//! A sharded, bounded LRU: the shard mutex doubles as the per-key
//! exclusive lock, held only for the duration of one counter evaluation
//! and never across a suspension point. Eviction only touches entries
//! whose window has already expired; a shard full of live entries
//! surfaces memory pressure as an error instead of dropping state.

use std::hash::Hasher;
use std::num::NonZeroUsize;

use fnv::FnvHasher;
use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};

use gubernator_core::algorithms::CounterState;
use gubernator_core::error::{GubernatorError, Result};

const SHARD_COUNT: usize = 32;

fn shard_index(key: &str) -> usize {
    let mut h = FnvHasher::default();
    h.write(key.as_bytes());
    (h.finish() as usize) & (SHARD_COUNT - 1)
}

pub struct CounterCache {
    shards: Vec<Mutex<LruCache<String, CounterState>>>,
}

impl CounterCache {
    /// `capacity` bounds the total resident counters; it is divided
    /// evenly across the shards.
    pub fn new(capacity: usize) -> Self {
        let per_shard =
            NonZeroUsize::new((capacity / SHARD_COUNT).max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
        }
    }

    /// Acquire the exclusive lock for `key`. Concurrent requests for the
    /// same key serialize here; different shards proceed in parallel.
    pub fn entry<'c, 'k>(&'c self, key: &'k str) -> EntryGuard<'c, 'k> {
        EntryGuard {
            shard: self.shards[shard_index(key)].lock(),
            key,
        }
    }

    pub fn remove(&self, key: &str) {
        self.shards[shard_index(key)].lock().pop(key);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every entry, taken one shard lock at a time.
    pub fn each(&self) -> Vec<(String, CounterState)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock();
            out.extend(guard.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }

    /// Drop entries whose window has expired. Returns how many were
    /// removed.
    pub fn sweep_expired(&self, now_ms: i64) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut guard = shard.lock();
            let expired: Vec<String> = guard
                .iter()
                .filter(|(_, v)| v.is_expired(now_ms))
                .map(|(k, _)| k.clone())
                .collect();
            for k in &expired {
                guard.pop(k);
            }
            removed += expired.len();
        }
        removed
    }
}

/// Exclusive access to one key's slot. Dropping the guard releases the
/// lock.
pub struct EntryGuard<'c, 'k> {
    shard: MutexGuard<'c, LruCache<String, CounterState>>,
    key: &'k str,
}

impl EntryGuard<'_, '_> {
    /// Current state for the key, marking it recently used.
    pub fn get(&mut self) -> Option<&CounterState> {
        self.shard.get(self.key)
    }

    /// Store the next state. When the shard is at capacity, only an
    /// expired LRU entry may be evicted to make room.
    pub fn put(&mut self, state: CounterState, now_ms: i64) -> Result<()> {
        if self.shard.len() >= usize::from(self.shard.cap()) && !self.shard.contains(self.key) {
            let lru_expired =
                matches!(self.shard.peek_lru(), Some((_, v)) if v.is_expired(now_ms));
            if !lru_expired {
                return Err(GubernatorError::CacheFull);
            }
            self.shard.pop_lru();
        }
        self.shard.put(self.key.to_owned(), state);
        Ok(())
    }

    pub fn remove(&mut self) {
        self.shard.pop(self.key);
    }
}
