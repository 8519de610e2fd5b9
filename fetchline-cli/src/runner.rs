//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization and pipeline
//! assembly to keep command handlers short.

use crate::error::CliError;
use fetchline::cache::TieredCache;
use fetchline::config::{config_file_path, ConfigFile};
use fetchline::decode::PassthroughDecoder;
use fetchline::logging::{init_logging_from, LoggingGuard};
use fetchline::provider::HttpFetcher;
use fetchline::{Pipeline, PipelineConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Load the config file at `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<(PathBuf, ConfigFile), CliError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
    let config = ConfigFile::load_from(&path)?;
    Ok((path, config))
}

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Create a new CLI runner, loading config and initializing logging.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let (_, config) = load_config(config_path)?;

        let logging_guard = init_logging_from(&config.logging)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("fetchline v{}", fetchline::VERSION);
        info!("fetchline CLI: {} command", command);
    }

    /// Assemble a pipeline from the loaded configuration.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn build_pipeline(&self) -> Result<Pipeline, CliError> {
        let cache = TieredCache::from_settings(&self.config.cache)?;
        let fetcher = HttpFetcher::from_settings(&self.config.download).map_err(CliError::Fetcher)?;

        let pipeline = Pipeline::builder()
            .cache(Arc::new(cache))
            .fetcher(Arc::new(fetcher))
            .decoder(Arc::new(PassthroughDecoder))
            .config(PipelineConfig::from(&self.config))
            .build()?;

        info!("Pipeline created successfully");
        Ok(pipeline)
    }
}
