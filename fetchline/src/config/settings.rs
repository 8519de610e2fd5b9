//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    /// Lane worker and queue sizes
    pub lanes: LaneSettings,
    /// Cache tiers
    pub cache: CacheSettings,
    /// HTTP fetcher settings
    pub download: DownloadSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Lane configuration.
///
/// The dispatch lane is always a single worker with an unbounded queue and
/// is not configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneSettings {
    /// Concurrent downloads
    pub network_workers: usize,
    /// Queued downloads before the oldest is discarded
    pub network_queue: usize,
    /// Concurrent loads/decodes
    pub local_workers: usize,
    /// Queued loads before the oldest is discarded
    pub local_queue: usize,
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Directory of the persistent tier
    pub directory: PathBuf,
    /// Whether the memory tier exists
    pub memory_enabled: bool,
    /// Memory tier size in bytes
    pub memory_size: usize,
    /// Whether the persistent tier exists
    pub disk_enabled: bool,
    /// Persistent tier size in bytes
    pub disk_size: usize,
}

/// Download configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Timeout in seconds for HTTP requests.
    pub timeout: u64,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Log file path
    pub file: PathBuf,
}
