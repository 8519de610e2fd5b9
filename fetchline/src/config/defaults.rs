//! Default values for all configuration settings and the
//! `ConfigFile::default()` implementation.

use super::file::config_directory;
use super::settings::*;
use crate::scheduler::{
    DEFAULT_LOCAL_QUEUE, DEFAULT_LOCAL_WORKERS, DEFAULT_NETWORK_QUEUE, DEFAULT_NETWORK_WORKERS,
};
use std::path::PathBuf;

/// Default memory tier size (256 MB).
pub const DEFAULT_MEMORY_CACHE_SIZE: usize = 256 * 1024 * 1024;

/// Default persistent tier size (2 GB).
pub const DEFAULT_DISK_CACHE_SIZE: usize = 2 * 1024 * 1024 * 1024;

/// Default HTTP timeout in seconds.
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = concat!("fetchline/", env!("CARGO_PKG_VERSION"));

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "fetchline.log";

/// Upper bound on lane workers accepted from the config file.
pub const MAX_LANE_WORKERS: usize = 256;

/// Default persistent tier directory: the platform cache dir, or
/// `~/.fetchline/cache` when there is none.
pub fn default_cache_directory() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("fetchline"))
        .unwrap_or_else(|| config_directory().join("cache"))
}

impl Default for LaneSettings {
    fn default() -> Self {
        Self {
            network_workers: DEFAULT_NETWORK_WORKERS,
            network_queue: DEFAULT_NETWORK_QUEUE,
            local_workers: DEFAULT_LOCAL_WORKERS,
            local_queue: DEFAULT_LOCAL_QUEUE,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: default_cache_directory(),
            memory_enabled: true,
            memory_size: DEFAULT_MEMORY_CACHE_SIZE,
            disk_enabled: true,
            disk_size: DEFAULT_DISK_CACHE_SIZE,
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file: config_directory().join(DEFAULT_LOG_FILE),
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            lanes: LaneSettings::default(),
            cache: CacheSettings::default(),
            download: DownloadSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}
