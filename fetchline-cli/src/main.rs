//! fetchline CLI - Command-line interface
//!
//! Pushes resource URIs through the tiered fetch pipeline and manages the
//! configuration file.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};
use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use error::CliError;
use runner::CliRunner;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fetchline")]
#[command(version = fetchline::VERSION)]
#[command(about = "Fetch resources through a tiered, coalescing cache pipeline", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.fetchline/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch one or more resources
    Fetch(FetchArgs),

    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Inspect the configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Fetch(args) => {
            let runner = CliRunner::new(config_path)?;
            commands::fetch::run(args, &runner)
        }
        Commands::Init { force } => commands::init::run(config_path, force),
        Commands::Config(command) => commands::config::run(command, config_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchline::RequestLevel;

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "fetchline",
            "fetch",
            "--repeat",
            "3",
            "--level",
            "memory",
            "https://example.com/a.png",
            "https://example.com/b.png",
        ])
        .unwrap();

        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.uris.len(), 2);
                assert_eq!(args.repeat, 3);
                assert_eq!(args.level, RequestLevel::Memory);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_fetch_requires_uri() {
        assert!(Cli::try_parse_from(["fetchline", "fetch"]).is_err());
    }

    #[test]
    fn test_repeat_must_be_positive() {
        assert!(Cli::try_parse_from(["fetchline", "fetch", "--repeat", "0", "/tmp/a"]).is_err());
    }

    #[test]
    fn test_unknown_level_rejected() {
        assert!(Cli::try_parse_from(["fetchline", "fetch", "--level", "disk", "/tmp/a"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["fetchline", "config", "path", "--config", "/tmp/custom.ini"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/custom.ini")));
        assert!(matches!(cli.command, Commands::Config(ConfigCommands::Path)));
    }

    #[test]
    fn test_parse_init_force() {
        let cli = Cli::try_parse_from(["fetchline", "init", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::Init { force: true }));
    }
}
