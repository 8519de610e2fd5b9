//! In-memory tier with LRU eviction.
//!
//! Holds decoded artifacts by [`RequestKey`], bounded by total payload bytes.
//! Recency is a per-tier tick rather than wall-clock time, so two touches in
//! the same instant still order correctly.

use super::stats::{TierCounters, TierStats};
use crate::request::RequestKey;
use crate::traits::Artifact;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::{trace, warn};

struct Entry {
    artifact: Artifact,
    tick: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<RequestKey, Entry>,
    /// tick → key, oldest first.
    recency: BTreeMap<u64, RequestKey>,
    size_bytes: usize,
    tick: u64,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &RequestKey) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.size_bytes -= entry.artifact.len();
        Some(entry)
    }
}

/// Byte-bounded LRU of decoded artifacts.
pub struct MemoryTier {
    inner: Mutex<Inner>,
    max_size_bytes: usize,
    counters: TierCounters,
}

impl MemoryTier {
    /// Create a tier holding at most `max_size_bytes` of artifact payload.
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_size_bytes,
            counters: TierCounters::default(),
        }
    }

    /// Look up an artifact, marking it most recently used.
    pub fn get(&self, key: &RequestKey) -> Option<Artifact> {
        let mut inner = self.inner.lock();
        let tick = inner.next_tick();

        let Some(entry) = inner.entries.get_mut(key) else {
            self.counters.miss();
            return None;
        };
        let old_tick = std::mem::replace(&mut entry.tick, tick);
        let artifact = entry.artifact.clone();
        inner.recency.remove(&old_tick);
        inner.recency.insert(tick, key.clone());
        drop(inner);

        self.counters.hit();
        Some(artifact)
    }

    /// Store an artifact, evicting least recently used entries to make room.
    ///
    /// Artifacts larger than the whole tier are not stored and count as a
    /// failed write. Followers coalesced on such a key cannot be served from
    /// the cache and redo the work one by one.
    pub fn put(&self, key: RequestKey, artifact: Artifact) {
        let size = artifact.len();
        if size > self.max_size_bytes {
            self.counters.write_failure();
            warn!(
                key = %key,
                size,
                max = self.max_size_bytes,
                "Artifact larger than memory tier, not cached"
            );
            return;
        }

        let mut inner = self.inner.lock();
        inner.remove(&key);

        let mut evicted = 0u64;
        while inner.size_bytes + size > self.max_size_bytes {
            let Some((_, victim)) = inner.recency.pop_first() else {
                break;
            };
            if let Some(entry) = inner.entries.remove(&victim) {
                inner.size_bytes -= entry.artifact.len();
                evicted += 1;
                trace!(key = %victim, "Evicted from memory tier");
            }
        }

        let tick = inner.next_tick();
        inner.recency.insert(tick, key.clone());
        inner.entries.insert(key, Entry { artifact, tick });
        inner.size_bytes += size;
        drop(inner);

        self.counters.write();
        if evicted > 0 {
            self.counters.evicted(evicted);
        }
    }

    /// Returns true if the key is present. Does not affect recency.
    pub fn contains(&self, key: &RequestKey) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Remove an entry.
    pub fn remove(&self, key: &RequestKey) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.inner.lock().size_bytes
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    /// Clear all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.size_bytes = 0;
    }

    pub fn stats(&self) -> TierStats {
        let inner = self.inner.lock();
        self.counters.snapshot(inner.size_bytes, inner.entries.len())
    }
}
