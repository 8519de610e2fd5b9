//! Config command - inspect the configuration file.

use crate::error::CliError;
use crate::runner::load_config;
use clap::Subcommand;
use fetchline::config::{format_size, ConfigFile};
use std::path::Path;

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigCommands {
    /// Show the path to the configuration file
    Path,
    /// List effective configuration values
    List,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, config_path: Option<&Path>) -> Result<(), CliError> {
    let (path, config) = load_config(config_path)?;
    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
            if !path.exists() {
                println!("(not created yet, defaults are in effect)");
            }
        }
        ConfigCommands::List => {
            for (key, value) in entries(&config) {
                println!("{:<24} {}", key, value);
            }
        }
    }
    Ok(())
}

/// Flatten the configuration into `section.key` / value pairs.
fn entries(config: &ConfigFile) -> Vec<(&'static str, String)> {
    vec![
        ("lanes.network_workers", config.lanes.network_workers.to_string()),
        ("lanes.network_queue", config.lanes.network_queue.to_string()),
        ("lanes.local_workers", config.lanes.local_workers.to_string()),
        ("lanes.local_queue", config.lanes.local_queue.to_string()),
        (
            "cache.directory",
            config.cache.directory.to_string_lossy().into_owned(),
        ),
        ("cache.memory_enabled", config.cache.memory_enabled.to_string()),
        ("cache.memory_size", format_size(config.cache.memory_size)),
        ("cache.disk_enabled", config.cache.disk_enabled.to_string()),
        ("cache.disk_size", format_size(config.cache.disk_size)),
        ("download.timeout", config.download.timeout.to_string()),
        ("download.user_agent", config.download.user_agent.clone()),
        (
            "logging.file",
            config.logging.file.to_string_lossy().into_owned(),
        ),
    ]
}
