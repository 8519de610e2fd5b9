//! User configuration (`~/.fetchline/config.ini`).
//!
//! Settings structs live in [`settings`], constants in [`defaults`], parsing
//! in `parser`, serialization in `writer` and file handling in [`file`].
//!
//! # Example
//!
//! ```ignore
//! use fetchline::config::ConfigFile;
//! use fetchline::pipeline::PipelineConfig;
//!
//! let config = ConfigFile::load()?;
//! let pipeline_config = PipelineConfig::from(&config);
//! ```

pub mod defaults;
pub mod file;
mod parser;
pub mod settings;
mod size;
mod writer;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{CacheSettings, ConfigFile, DownloadSettings, LaneSettings, LoggingSettings};
pub use size::{format_size, parse_size, SizeParseError};
