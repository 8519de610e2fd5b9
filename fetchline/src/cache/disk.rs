//! Persistent tier: one file of raw bytes per network key.
//!
//! File names are the BLAKE3 hex digest of the key plus `.raw`, so any
//! URI maps to a flat, filesystem-safe name. Writes go to a uniquely named
//! temporary file that is renamed into place; readers never see a partial
//! file. The size bound is enforced oldest-first, where "oldest" is the
//! least recently written or read entry.

use super::stats::{TierCounters, TierStats};
use super::types::CacheError;
use crate::request::NetworkKey;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

const ENTRY_EXTENSION: &str = "raw";
const TEMP_MARKER: &str = ".tmp-";

struct DiskEntry {
    size: usize,
    tick: u64,
}

#[derive(Default)]
struct Index {
    /// File stem → entry.
    entries: HashMap<String, DiskEntry>,
    /// tick → file stem, oldest first.
    recency: BTreeMap<u64, String>,
    size_bytes: usize,
    tick: u64,
}

impl Index {
    fn touch(&mut self, stem: &str) -> bool {
        self.tick += 1;
        let tick = self.tick;
        let Some(entry) = self.entries.get_mut(stem) else {
            return false;
        };
        let old = std::mem::replace(&mut entry.tick, tick);
        self.recency.remove(&old);
        self.recency.insert(tick, stem.to_string());
        true
    }

    fn insert(&mut self, stem: String, size: usize) {
        self.remove(&stem);
        self.tick += 1;
        self.recency.insert(self.tick, stem.clone());
        self.entries.insert(
            stem,
            DiskEntry {
                size,
                tick: self.tick,
            },
        );
        self.size_bytes += size;
    }

    fn remove(&mut self, stem: &str) -> bool {
        match self.entries.remove(stem) {
            Some(entry) => {
                self.recency.remove(&entry.tick);
                self.size_bytes -= entry.size;
                true
            }
            None => false,
        }
    }

    /// Pops oldest entries until `size_bytes` fits `max`, returning their stems.
    fn evict_to(&mut self, max: usize) -> Vec<String> {
        let mut victims = Vec::new();
        while self.size_bytes > max {
            let Some((_, stem)) = self.recency.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&stem) {
                self.size_bytes -= entry.size;
                victims.push(stem);
            }
        }
        victims
    }
}

/// File-per-key store of raw bytes with a total size bound.
pub struct DiskTier {
    directory: PathBuf,
    max_size_bytes: usize,
    index: Mutex<Index>,
    temp_counter: AtomicU64,
    counters: TierCounters,
}

impl DiskTier {
    /// Open (or create) a tier rooted at `directory`.
    ///
    /// Existing entries are indexed in modification-time order and the
    /// size bound is applied immediately. Leftover temporary files from an
    /// interrupted write are removed.
    pub fn new(directory: impl Into<PathBuf>, max_size_bytes: usize) -> Result<Self, CacheError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let tier = Self {
            directory,
            max_size_bytes,
            index: Mutex::new(Index::default()),
            temp_counter: AtomicU64::new(0),
            counters: TierCounters::default(),
        };
        tier.scan()?;
        tier.enforce_limit();

        let stats = tier.stats();
        info!(
            directory = %tier.directory.display(),
            entries = stats.entry_count,
            size_bytes = stats.size_bytes,
            max_size_bytes,
            "Persistent tier opened"
        );
        Ok(tier)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Read the raw bytes for `key`.
    pub fn get(&self, key: &NetworkKey) -> Option<Bytes> {
        let stem = file_stem(key);
        if !self.index.lock().entries.contains_key(&stem) {
            self.counters.miss();
            return None;
        }

        match fs::read(self.entry_path(&stem)) {
            Ok(data) => {
                self.index.lock().touch(&stem);
                self.counters.hit();
                Some(Bytes::from(data))
            }
            Err(e) => {
                // Evicted concurrently or removed behind our back.
                debug!(key = %key, error = %e, "Persistent entry unreadable, dropping from index");
                self.index.lock().remove(&stem);
                self.counters.miss();
                None
            }
        }
    }

    /// Write the raw bytes for `key`, evicting older entries to stay
    /// within the size bound.
    ///
    /// Payloads larger than the whole tier are skipped and count as a failed
    /// write.
    pub fn put(&self, key: &NetworkKey, data: &[u8]) -> Result<(), CacheError> {
        if data.len() > self.max_size_bytes {
            self.counters.write_failure();
            warn!(
                key = %key,
                size = data.len(),
                max = self.max_size_bytes,
                "Payload larger than persistent tier, not cached"
            );
            return Ok(());
        }

        let stem = file_stem(key);
        let temp = self.directory.join(format!(
            "{}.{}{}{}-{}",
            stem,
            ENTRY_EXTENSION,
            TEMP_MARKER,
            std::process::id(),
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = fs::write(&temp, data).and_then(|_| fs::rename(&temp, self.entry_path(&stem))) {
            let _ = fs::remove_file(&temp);
            self.counters.write_failure();
            return Err(e.into());
        }

        self.index.lock().insert(stem, data.len());
        self.counters.write();
        trace!(key = %key, size = data.len(), "Persistent entry written");

        self.enforce_limit();
        Ok(())
    }

    pub fn contains(&self, key: &NetworkKey) -> bool {
        self.index.lock().entries.contains_key(&file_stem(key))
    }

    /// Delete the entry for `key`.
    pub fn remove(&self, key: &NetworkKey) -> Result<bool, CacheError> {
        let stem = file_stem(key);
        if !self.index.lock().remove(&stem) {
            return Ok(false);
        }
        match fs::remove_file(self.entry_path(&stem)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.index.lock().size_bytes
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    pub fn stats(&self) -> TierStats {
        let index = self.index.lock();
        self.counters.snapshot(index.size_bytes, index.entries.len())
    }

    fn entry_path(&self, stem: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", stem, ENTRY_EXTENSION))
    }

    fn scan(&self) -> Result<(), CacheError> {
        let mut found: Vec<(SystemTime, String, usize)> = Vec::new();

        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.contains(TEMP_MARKER) {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale temporary file");
                }
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, stem.to_string(), metadata.len() as usize));
        }

        found.sort();
        let mut index = self.index.lock();
        for (_, stem, size) in found {
            index.insert(stem, size);
        }
        Ok(())
    }

    fn enforce_limit(&self) {
        let victims = self.index.lock().evict_to(self.max_size_bytes);
        if victims.is_empty() {
            return;
        }

        for stem in &victims {
            if let Err(e) = fs::remove_file(self.entry_path(stem)) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(entry = %stem, error = %e, "Failed to delete evicted persistent entry");
                }
            }
        }
        self.counters.evicted(victims.len() as u64);
        debug!(count = victims.len(), "Evicted persistent entries");
    }
}

fn file_stem(key: &NetworkKey) -> String {
    blake3::hash(key.as_str().as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(name: &str) -> NetworkKey {
        NetworkKey::new(&format!("https://example.com/{name}"))
    }

    #[test]
    fn test_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let tier = DiskTier::new(temp_dir.path(), 1024).unwrap();

        tier.put(&key("a"), b"hello").unwrap();
        assert_eq!(tier.get(&key("a")).unwrap(), Bytes::from_static(b"hello"));
        assert!(tier.get(&key("b")).is_none());

        let stats = tier.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.size_bytes, 5);
    }

    #[test]
    fn test_file_names_are_hashed() {
        let temp_dir = TempDir::new().unwrap();
        let tier = DiskTier::new(temp_dir.path(), 1024).unwrap();
        tier.put(&key("some/deep/path?q=1"), b"x").unwrap();

        let names: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".raw"));
        assert_eq!(names[0].len(), 64 + 4);
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let temp_dir = TempDir::new().unwrap();
        {
            let tier = DiskTier::new(temp_dir.path(), 1024).unwrap();
            tier.put(&key("a"), b"persisted").unwrap();
        }

        let tier = DiskTier::new(temp_dir.path(), 1024).unwrap();
        assert_eq!(tier.entry_count(), 1);
        assert_eq!(tier.size_bytes(), 9);
        assert_eq!(tier.get(&key("a")).unwrap(), Bytes::from_static(b"persisted"));
    }

    #[test]
    fn test_evicts_oldest_first() {
        let temp_dir = TempDir::new().unwrap();
        let tier = DiskTier::new(temp_dir.path(), 20).unwrap();

        tier.put(&key("a"), &[1u8; 8]).unwrap();
        tier.put(&key("b"), &[2u8; 8]).unwrap();
        // Reading "a" makes "b" the oldest.
        assert!(tier.get(&key("a")).is_some());
        tier.put(&key("c"), &[3u8; 8]).unwrap();

        assert!(tier.contains(&key("a")));
        assert!(!tier.contains(&key("b")));
        assert!(tier.contains(&key("c")));
        assert_eq!(tier.size_bytes(), 16);
        assert_eq!(tier.stats().evictions, 1);
        assert!(!tier.entry_path(&file_stem(&key("b"))).exists());
    }

    #[test]
    fn test_shrinking_bound_evicts_on_open() {
        let temp_dir = TempDir::new().unwrap();
        {
            let tier = DiskTier::new(temp_dir.path(), 1024).unwrap();
            tier.put(&key("a"), &[0u8; 10]).unwrap();
            tier.put(&key("b"), &[0u8; 10]).unwrap();
        }

        let tier = DiskTier::new(temp_dir.path(), 15).unwrap();
        assert_eq!(tier.entry_count(), 1);
        assert!(tier.size_bytes() <= 15);
    }

    #[test]
    fn test_stale_temp_files_removed() {
        let temp_dir = TempDir::new().unwrap();
        let stale = temp_dir.path().join("abc.raw.tmp-1-0");
        fs::write(&stale, b"partial").unwrap();

        let tier = DiskTier::new(temp_dir.path(), 1024).unwrap();
        assert!(!stale.exists());
        assert_eq!(tier.entry_count(), 0);
    }

    #[test]
    fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let tier = DiskTier::new(temp_dir.path(), 1024).unwrap();
        tier.put(&key("a"), b"x").unwrap();

        assert!(tier.remove(&key("a")).unwrap());
        assert!(!tier.remove(&key("a")).unwrap());
        assert!(tier.get(&key("a")).is_none());
    }

    #[test]
    fn test_oversized_payload_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let tier = DiskTier::new(temp_dir.path(), 4).unwrap();

        tier.put(&key("a"), b"too large").unwrap();
        assert!(!tier.contains(&key("a")));
        assert_eq!(tier.stats().write_failures, 1);
    }
}
