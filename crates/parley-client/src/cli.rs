//! CLI arguments for the parley client

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use parley_common::ClientKind;

/// parley chat client
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "parley.toml", global = true)]
    pub config: PathBuf,

    /// Server address, overrides the config file
    #[arg(short, long, env = "PARLEY_SERVER", global = true)]
    pub server: Option<String>,

    /// Client kind announced to the server
    #[arg(long, global = true)]
    pub kind: Option<ClientKind>,

    /// Directory for downloaded files
    #[arg(short, long, global = true)]
    pub download_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive chat session (default)
    Chat,

    /// Print a sample configuration file
    GenerateConfig,
}
