//! parley server binary
//!
//! Accepts NPLT chat connections, dispatches control messages to the
//! configured collaborators and serves file downloads over RDT.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use parley_server::ServerConfig;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        EnvFilter::new(format!("parley_server={},parley_common={}", level, level))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .json()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::GenerateConfig) => {
            println!("{}", ServerConfig::generate_sample_config());
            return Ok(());
        }
        Some(Commands::Run) | None => {}
    }

    let config = ServerConfig::load(&cli.config)?;

    tracing::info!("Starting parley server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Max clients: {}", config.max_clients);
    tracing::info!("Models: {}", config.models.available.join(", "));

    parley_server::run_server(config).await
}
