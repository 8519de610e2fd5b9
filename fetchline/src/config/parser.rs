//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use super::defaults::MAX_LANE_WORKERS;
use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::size::parse_size;
use ini::{Ini, Properties};
use std::path::PathBuf;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [lanes] section
    if let Some(section) = ini.section(Some("lanes")) {
        if let Some(v) = workers(section, "network_workers")? {
            config.lanes.network_workers = v;
        }
        if let Some(v) = queue(section, "network_queue")? {
            config.lanes.network_queue = v;
        }
        if let Some(v) = workers(section, "local_workers")? {
            config.lanes.local_workers = v;
        }
        if let Some(v) = queue(section, "local_queue")? {
            config.lanes.local_queue = v;
        }
    }

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("memory_enabled") {
            config.cache.memory_enabled = parse_bool("cache", "memory_enabled", v)?;
        }
        if let Some(v) = section.get("memory_size") {
            config.cache.memory_size = parse_size(v).map_err(|_| {
                ConfigFileError::invalid(
                    "cache",
                    "memory_size",
                    v,
                    "expected format like '256MB', '1GB', or '1024KB'",
                )
            })?;
        }
        if let Some(v) = section.get("disk_enabled") {
            config.cache.disk_enabled = parse_bool("cache", "disk_enabled", v)?;
        }
        if let Some(v) = section.get("disk_size") {
            config.cache.disk_size = parse_size(v).map_err(|_| {
                ConfigFileError::invalid(
                    "cache",
                    "disk_size",
                    v,
                    "expected format like '2GB', '500MB', or '1024KB'",
                )
            })?;
        }
    }

    // [download] section
    if let Some(section) = ini.section(Some("download")) {
        if let Some(v) = section.get("timeout") {
            config.download.timeout = match v.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigFileError::invalid(
                        "download",
                        "timeout",
                        v,
                        "must be a positive integer (seconds)",
                    ))
                }
            };
        }
        if let Some(v) = section.get("user_agent") {
            let v = v.trim();
            if !v.is_empty() {
                config.download.user_agent = v.to_string();
            }
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = expand_tilde(v);
            }
        }
    }

    Ok(config)
}

fn workers(section: &Properties, key: &str) -> Result<Option<usize>, ConfigFileError> {
    let Some(v) = section.get(key) else {
        return Ok(None);
    };
    match v.trim().parse::<usize>() {
        Ok(n) if (1..=MAX_LANE_WORKERS).contains(&n) => Ok(Some(n)),
        _ => Err(ConfigFileError::invalid(
            "lanes",
            key,
            v,
            format!("must be an integer between 1 and {}", MAX_LANE_WORKERS),
        )),
    }
}

fn queue(section: &Properties, key: &str) -> Result<Option<usize>, ConfigFileError> {
    let Some(v) = section.get(key) else {
        return Ok(None);
    };
    match v.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigFileError::invalid(
            "lanes",
            key,
            v,
            "must be a positive integer",
        )),
    }
}

/// Parse a boolean value; accepts true/false, yes/no, on/off, 1/0.
fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigFileError::invalid(
            section,
            key,
            value,
            "must be true or false",
        )),
    }
}

/// Expand ~ to home directory in paths.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
