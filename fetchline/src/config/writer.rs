//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! Produces the commented INI representation written to `config.ini`.

use super::settings::ConfigFile;
use super::size::format_size;
use std::path::Path;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    format!(
        r#"[lanes]
; Concurrent downloads (default: 3)
network_workers = {}
; Downloads waiting for a worker before the oldest is discarded (default: 200)
network_queue = {}
; Concurrent local loads and decodes (default: 3)
local_workers = {}
; Loads waiting for a worker before the oldest is discarded (default: 200)
local_queue = {}

[cache]
; Directory of the persistent cache (raw downloaded bytes)
directory = {}
; In-memory cache of decoded results
memory_enabled = {}
; Supports: KB, MB, GB suffixes (e.g., 64MB, 1GB)
memory_size = {}
; Persistent cache on disk
disk_enabled = {}
; Supports: KB, MB, GB suffixes (e.g., 500MB, 20GB)
disk_size = {}

[download]
; Timeout in seconds for HTTP requests (default: 30)
timeout = {}
user_agent = {}

[logging]
; Log file, cleared at the start of every session
file = {}
"#,
        config.lanes.network_workers,
        config.lanes.network_queue,
        config.lanes.local_workers,
        config.lanes.local_queue,
        path_to_string(&config.cache.directory),
        config.cache.memory_enabled,
        format_size(config.cache.memory_size),
        config.cache.disk_enabled,
        format_size(config.cache.disk_size),
        config.download.timeout,
        config.download.user_agent,
        path_to_string(&config.logging.file),
    )
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_every_section() {
        let content = to_config_string(&ConfigFile::default());
        for section in ["[lanes]", "[cache]", "[download]", "[logging]"] {
            assert!(content.contains(section), "missing {section}");
        }
        assert!(content.contains("memory_size = 256MB"));
        assert!(content.contains("disk_size = 2GB"));
    }
}
