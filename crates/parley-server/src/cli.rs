//! CLI arguments for the parley server

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// parley chat server
#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/parley/server.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the server (default)
    Run,

    /// Print a sample configuration file
    GenerateConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::parse_from(["parley-server"]);
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
        assert_eq!(cli.config, PathBuf::from("/etc/parley/server.toml"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["parley-server", "generate-config", "-v", "-c", "dev.toml"]);
        assert!(matches!(cli.command, Some(Commands::GenerateConfig)));
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("dev.toml"));
    }
}
