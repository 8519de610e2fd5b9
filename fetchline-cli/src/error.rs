//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use fetchline::cache::CacheError;
use fetchline::config::ConfigFileError;
use fetchline::{BuildError, FetchError};
use std::fmt;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Failed to open the cache tiers
    Cache(CacheError),
    /// Failed to create the HTTP fetcher
    Fetcher(FetchError),
    /// Failed to assemble the pipeline
    Pipeline(BuildError),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// Some requests did not complete
    Incomplete { failed: usize, total: usize },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Config(_) = self {
            eprintln!();
            eprintln!("Run 'fetchline config path' to locate the configuration file,");
            eprintln!("or 'fetchline init --force' to reset it to defaults.");
        }

        let code = match self {
            CliError::Incomplete { .. } => 2,
            _ => 1,
        };
        process::exit(code)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Cache(e) => write!(f, "Failed to open cache: {}", e),
            CliError::Fetcher(e) => write!(f, "Failed to create fetcher: {}", e),
            CliError::Pipeline(e) => write!(f, "Failed to build pipeline: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Incomplete { failed, total } => {
                write!(f, "{} of {} requests did not complete", failed, total)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Cache(e) => Some(e),
            CliError::Fetcher(e) => Some(e),
            CliError::Pipeline(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        CliError::Cache(e)
    }
}

impl From<BuildError> for CliError {
    fn from(e: BuildError) -> Self {
        CliError::Pipeline(e)
    }
}
