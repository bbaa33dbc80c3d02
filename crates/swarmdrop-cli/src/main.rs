//! SWARMDROP CLI
//!
//! Room-based peer-to-peer file sharing from the terminal.

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use config::Config;
use progress::{SwarmProgress, format_bytes, format_speed};
use swarmdrop_core::node::{
    Swarm, SwarmHandle, TransferState, generate_room_code, parse_room_code,
};
use swarmdrop_files::{FileId, SharedFile};
use swarmdrop_rendezvous::{RendezvousClient, RendezvousServer};
use swarmdrop_transport::TcpTransportFactory;

/// SWARMDROP - share files with everyone in a room
#[derive(Parser)]
#[command(name = "swarmdrop")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rendezvous server URL, overriding the configuration
    #[arg(short, long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the rendezvous service
    Rendezvous {
        /// Listen address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Share files in a room and keep seeding until interrupted
    Share {
        /// Files to share
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Room code to use instead of a fresh one
        #[arg(short, long)]
        room: Option<String>,
    },

    /// Join a room and save every shared file
    Receive {
        /// Room code
        #[arg(required = true)]
        room: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Keep running after everything is saved
        #[arg(long)]
        stay: bool,
    },

    /// Print a fresh room code
    RoomCode,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default()?,
    };
    if let Some(server) = cli.server {
        config.signaling.server_url = server;
    }

    config.validate()?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Rendezvous { bind } => {
            run_rendezvous(bind, &config).await?;
        }
        Commands::Share { files, room } => {
            share_files(files, room, &config).await?;
        }
        Commands::Receive { room, output, stay } => {
            receive_files(room, output, stay, &config).await?;
        }
        Commands::RoomCode => {
            println!("{}", generate_room_code());
        }
    }

    Ok(())
}

/// Run the rendezvous service until Ctrl+C
async fn run_rendezvous(bind: Option<String>, config: &Config) -> anyhow::Result<()> {
    let mut server_config = config.rendezvous_config()?;
    if let Some(bind) = bind {
        server_config.bind_addr = bind
            .parse()
            .with_context(|| format!("Invalid bind address: {bind}"))?;
    }

    let server = RendezvousServer::bind(server_config.clone()).await?;
    let addr = server.local_addr()?;

    println!("SWARMDROP Rendezvous");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Listen: {}", style(addr).bold());
    println!("Max room size: {}", server_config.max_room_size);
    println!("Press Ctrl+C to stop");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => println!("\nShutting down..."),
    }

    Ok(())
}

/// Connect to the rendezvous service and start a swarm node
async fn start_node(config: &Config, is_host: bool) -> anyhow::Result<(RendezvousClient, SwarmHandle)> {
    let url = &config.signaling.server_url;
    let (client, inbound) = RendezvousClient::connect(url)
        .await
        .with_context(|| format!("Failed to connect to signaling server at {url}"))?;

    let factory = Arc::new(TcpTransportFactory::new(config.tcp_transport()?));
    let swarm = Swarm::spawn(config.swarm_config(is_host), factory, client.sender());
    swarm.attach_signaling(inbound);

    tracing::info!(peer_id = %swarm.peer_id(), server = %url, "swarm node started");
    Ok((client, swarm))
}

/// Share files in a room
async fn share_files(paths: Vec<PathBuf>, room: Option<String>, config: &Config) -> anyhow::Result<()> {
    let room = match room {
        Some(input) => {
            parse_room_code(&input).with_context(|| format!("Invalid room code: {input}"))?
        }
        None => generate_room_code(),
    };

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let file = SharedFile::open(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        files.push(file);
    }

    let (client, swarm) = start_node(config, true).await?;

    let shared = swarm.add_files(files).await?;
    for meta in &shared {
        println!(
            "Sharing: {} ({}, {} chunks)",
            meta.name,
            format_bytes(meta.size),
            meta.total_chunks
        );
    }

    swarm.join_room(room.clone()).await?;
    println!("Room code: {}", style(&room).bold().cyan());
    println!("Type a line to chat. Press Ctrl+C to stop sharing");

    let progress = SwarmProgress::new("Seeding");
    let result = run_session(&swarm, &progress, None, false).await;

    progress.finish_with_message("Stopped sharing".to_string());
    let _ = swarm.leave_room().await;
    swarm.shutdown();
    client.close();
    result
}

/// Join a room and save what it shares
async fn receive_files(room: String, output: PathBuf, stay: bool, config: &Config) -> anyhow::Result<()> {
    let room = parse_room_code(&room).with_context(|| format!("Invalid room code: {room}"))?;
    tokio::fs::create_dir_all(&output).await?;

    let (client, swarm) = start_node(config, false).await?;
    swarm.join_room(room.clone()).await?;

    println!("Joined room: {}", style(&room).bold().cyan());
    println!("Output directory: {}", output.display());

    let progress = SwarmProgress::new("Receiving");
    let result = run_session(&swarm, &progress, Some(&output), !stay).await;

    let stats = swarm.snapshot().stats.clone();
    progress.finish_with_message(format!(
        "Received {} in {} chunks (peak {})",
        format_bytes(stats.bytes_transferred),
        stats.chunks_completed,
        format_speed(stats.peak_speed)
    ));

    let _ = swarm.leave_room().await;
    swarm.shutdown();
    client.close();
    result
}

/// Drive the progress display, chat and file saving until Ctrl+C, or until
/// every file is saved when `exit_on_complete` is set.
async fn run_session(
    swarm: &SwarmHandle,
    progress: &SwarmProgress,
    output: Option<&Path>,
    exit_on_complete: bool,
) -> anyhow::Result<()> {
    let mut snapshots = swarm.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut seen_messages = 0;
    let mut last_error: Option<String> = None;
    let mut saved: HashSet<FileId> = HashSet::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = Arc::clone(&snapshots.borrow_and_update());
                progress.update(&state);

                if state.messages.len() < seen_messages {
                    seen_messages = 0;
                }
                for msg in &state.messages[seen_messages..] {
                    if !msg.is_own {
                        progress.println(format!("{} {}", style(format!("<{}>", msg.sender_name)).green(), msg.text));
                    }
                }
                seen_messages = state.messages.len();

                if state.error != last_error {
                    if let Some(error) = &state.error {
                        progress.println(format!("{} {error}", style("error:").red().bold()));
                    }
                    last_error.clone_from(&state.error);
                }

                if let Some(dir) = output {
                    for file_id in state.completed_downloads() {
                        if saved.contains(&file_id) {
                            continue;
                        }
                        let path = swarm.save_to_dir(&file_id, dir).await?;
                        progress.println(format!("Saved {}", path.display()));
                        saved.insert(file_id);
                    }
                }

                if exit_on_complete
                    && state.transfer_state == TransferState::Complete
                    && saved.len() == state.files.len()
                {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(text)) => {
                        let text = text.trim();
                        if !text.is_empty() {
                            swarm.send_text(text).await?;
                        }
                    }
                    Ok(None) | Err(_) => stdin_open = false,
                }
            }
            _ = &mut ctrl_c => {
                progress.println("Shutting down...");
                break;
            }
        }
    }

    Ok(())
}
