//! Two-tier cache facade over [`MemoryTier`] and [`DiskTier`].

use super::disk::DiskTier;
use super::memory::MemoryTier;
use super::stats::CacheStats;
use super::types::CacheError;
use crate::config::CacheSettings;
use crate::request::{NetworkKey, RequestKey};
use crate::traits::{Artifact, CacheFacade};
use bytes::Bytes;
use tracing::warn;

/// [`CacheFacade`] combining an optional memory tier and an optional
/// persistent tier.
pub struct TieredCache {
    memory: Option<MemoryTier>,
    disk: Option<DiskTier>,
}

impl TieredCache {
    pub fn new(memory: Option<MemoryTier>, disk: Option<DiskTier>) -> Self {
        Self { memory, disk }
    }

    /// A cache with only the memory tier.
    pub fn memory_only(max_size_bytes: usize) -> Self {
        Self::new(Some(MemoryTier::new(max_size_bytes)), None)
    }

    /// A cache with neither tier; every lookup misses.
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Build the tiers described by the `[cache]` section.
    pub fn from_settings(settings: &CacheSettings) -> Result<Self, CacheError> {
        let memory = if settings.memory_enabled {
            if settings.memory_size == 0 {
                return Err(CacheError::InvalidConfig(
                    "memory_size must be greater than zero".to_string(),
                ));
            }
            Some(MemoryTier::new(settings.memory_size))
        } else {
            None
        };

        let disk = if settings.disk_enabled {
            if settings.disk_size == 0 {
                return Err(CacheError::InvalidConfig(
                    "disk_size must be greater than zero".to_string(),
                ));
            }
            Some(DiskTier::new(&settings.directory, settings.disk_size)?)
        } else {
            None
        };

        Ok(Self::new(memory, disk))
    }

    pub fn memory(&self) -> Option<&MemoryTier> {
        self.memory.as_ref()
    }

    pub fn disk(&self) -> Option<&DiskTier> {
        self.disk.as_ref()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory: self.memory.as_ref().map(MemoryTier::stats),
            disk: self.disk.as_ref().map(DiskTier::stats),
        }
    }
}

impl CacheFacade for TieredCache {
    fn get(&self, key: &RequestKey) -> Option<Artifact> {
        self.memory.as_ref()?.get(key)
    }

    fn put(&self, key: &RequestKey, artifact: Artifact) {
        if let Some(memory) = &self.memory {
            memory.put(key.clone(), artifact);
        }
    }

    fn contains(&self, key: &RequestKey) -> bool {
        self.memory.as_ref().is_some_and(|m| m.contains(key))
    }

    fn get_raw(&self, key: &NetworkKey) -> Option<Bytes> {
        self.disk.as_ref()?.get(key)
    }

    fn put_raw(&self, key: &NetworkKey, data: Bytes) {
        if let Some(disk) = &self.disk {
            // A failed write only costs a future refetch.
            if let Err(e) = disk.put(key, &data) {
                warn!(key = %key, error = %e, "Failed to write persistent cache entry");
            }
        }
    }

    fn memory_enabled(&self) -> bool {
        self.memory.is_some()
    }

    fn persistent_enabled(&self) -> bool {
        self.disk.is_some()
    }
}
