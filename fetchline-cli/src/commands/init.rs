//! Init command - writes a default configuration file.

use crate::error::CliError;
use fetchline::config::{config_file_path, ConfigFile};
use std::path::Path;

/// Run the init command against the given or default config path.
pub fn run(config_path: Option<&Path>, force: bool) -> Result<(), CliError> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path);

    if run_at(&path, force)? {
        println!("Wrote default configuration to {}", path.display());
    } else {
        println!("Configuration already exists at {}", path.display());
        println!("Use --force to overwrite it with defaults.");
    }
    Ok(())
}

/// Write the defaults to `path`. Returns false when an existing file was kept.
pub fn run_at(path: &Path, force: bool) -> Result<bool, CliError> {
    if force {
        ConfigFile::default().save_to(path)?;
        return Ok(true);
    }
    Ok(ConfigFile::ensure_exists_at(path)?)
}
