//! parley client binary
//!
//! Interactive line-oriented chat: lines typed on stdin become chat
//! messages or slash commands; server events are printed as they arrive and
//! downloaded files are written to the download directory.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use parley_client::{save_download, ClientConfig, ClientEvent, NpltClient};
use parley_common::StatusNotice;

mod cli;
mod repl;

use cli::{Cli, Commands};
use repl::Command;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
        EnvFilter::new(format!(
            "parley_client={},parley_common={}",
            level, level
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Commands::GenerateConfig) = cli.command {
        println!("{}", ClientConfig::generate_sample_config());
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config)?;
    if let Some(server) = cli.server {
        config.server_addr = server;
    }
    if let Some(kind) = cli.kind {
        config.client_kind = kind;
    }
    if let Some(dir) = cli.download_dir {
        config.download_dir = dir;
    }

    let (client, mut events) = NpltClient::connect(&config).await?;
    println!("Connected to {} (type /help for commands)", client.server_addr());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(command) = repl::parse(&line) else { continue };
                if command == Command::Quit {
                    break;
                }
                if let Err(e) = execute(&client, command).await {
                    eprintln!("! {:#}", e);
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if event == ClientEvent::Disconnected {
                    println!("* Disconnected from server");
                    break;
                }
                show(event, &config.download_dir).await;
            }
        }
    }

    client.close().await;
    Ok(())
}

async fn execute(client: &NpltClient, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Chat(text) => client.send_chat(&text)?,
        Command::Model(model) => client.switch_model(&model)?,
        Command::History(limit) => client.request_history(limit)?,
        Command::Clear => client.clear_history()?,
        Command::Sessions => client.list_sessions()?,
        Command::Switch(id) => client.switch_session(&id)?,
        Command::New(name) => client.new_session(name.as_deref())?,
        Command::Delete(id) => client.delete_session(&id)?,
        Command::Upload(path) => {
            let data = tokio::fs::read(&path).await?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow::anyhow!("{} is not a file", path.display()))?;
            client.upload(&filename, &data)?;
            println!("* Uploading {} ({} bytes)", filename, data.len());
        }
        Command::Help => println!("{}", repl::HELP),
        Command::Usage(usage) => println!("usage: {}", usage),
        Command::Quit => {}
    }
    Ok(())
}

async fn show(event: ClientEvent, download_dir: &Path) {
    match event {
        ClientEvent::Welcome { session_id } => println!("* Session {}", session_id),
        ClientEvent::ChatChunk(text) => {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        }
        ClientEvent::ReplyEnd => println!(),
        ClientEvent::Status(notice) => show_status(notice),
        ClientEvent::History(entries) => {
            if entries.is_empty() {
                println!("* No messages yet");
            }
            for entry in entries {
                println!("[{}] {}: {}", entry.timestamp, entry.role, entry.content);
            }
        }
        ClientEvent::SessionList(list) => {
            for conversation in list {
                let marker = if conversation.current { "*" } else { " " };
                println!(
                    "{} {}  {} ({} messages)",
                    marker, conversation.session_id, conversation.name, conversation.message_count
                );
            }
        }
        ClientEvent::DownloadStarted { filename, size, .. } => {
            println!("* Downloading {} ({} bytes)", filename, size)
        }
        ClientEvent::DownloadComplete { filename, data } | ClientEvent::FileReceived { filename, data } => {
            match save_download(download_dir, &filename, &data).await {
                Ok(path) => println!("* Saved {} to {}", filename, path.display()),
                Err(e) => eprintln!("! Could not save {}: {}", filename, e),
            }
        }
        ClientEvent::DownloadFailed { filename, reason } => {
            eprintln!("! Download of {} failed: {}", filename, reason)
        }
        ClientEvent::Disconnected => {}
    }
}

fn show_status(notice: StatusNotice) {
    match notice {
        StatusNotice::Thinking { detail } => match detail {
            Some(detail) => println!("* thinking: {}", detail),
            None => println!("* thinking..."),
        },
        StatusNotice::ToolCall { tool } => println!("* calling {}", tool),
        // The reply itself follows immediately
        StatusNotice::Generating | StatusNotice::StreamStart => {}
        StatusNotice::ModelSwitched { model } => println!("* Model switched to {}", model),
        StatusNotice::UploadComplete { filename, size } => {
            println!("* Uploaded {} ({} bytes)", filename, size)
        }
        StatusNotice::Info { message } => println!("* {}", message),
        StatusNotice::Error { message } => eprintln!("! {}", message),
        StatusNotice::Welcome { session_id } => println!("* Session {}", session_id),
        StatusNotice::TransferFailed { filename, reason } => {
            eprintln!("! Download of {} failed: {}", filename, reason)
        }
        StatusNotice::Plain(text) => println!("* {}", text),
    }
}
