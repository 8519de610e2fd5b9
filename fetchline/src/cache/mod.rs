//! Reference two-tier cache.
//!
//! - [`MemoryTier`]: decoded artifacts by request key, byte-bounded LRU
//! - [`DiskTier`]: raw bytes by network key, one file per entry
//! - [`TieredCache`]: the [`CacheFacade`](crate::traits::CacheFacade) the
//!   pipeline sees; either tier may be absent

mod disk;
mod memory;
mod stats;
mod tiered;
mod types;

pub use disk::DiskTier;
pub use memory::MemoryTier;
pub use stats::{CacheStats, TierStats};
pub use tiered::TieredCache;
pub use types::CacheError;
