//! relaydrop CLI
//!
//! Runs the relay, or acts as a sending or receiving client against one.

mod progress;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use relaydrop::config::Config;
use relaydrop::download;
use relaydrop::server::RelayServer;
use relaydrop::transfer::{ByteSource, FileSource, ReceiveEvent, Session};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use progress::{format_bytes, TransferProgress};

/// Send files to a peer through a WebSocket relay
#[derive(Parser)]
#[command(name = "relaydrop")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace); RUST_LOG wins if set
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "RELAYDROP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Relay {
        /// Listen address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Send a file to a connected peer
    Send {
        /// File to send
        file: PathBuf,

        /// Connection id of the receiving peer
        #[arg(short, long)]
        target: String,

        /// Relay WebSocket URL
        #[arg(short, long, env = "RELAYDROP_URL")]
        url: Option<String>,

        /// Override the content type guessed from the extension
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Wait for files and write them to a directory
    Receive {
        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Relay WebSocket URL
        #[arg(short, long, env = "RELAYDROP_URL")]
        url: Option<String>,

        /// Exit after this many files
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let is_relay = matches!(cli.command, Commands::Relay { .. });
    init_logging(cli.verbose, is_relay);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default().context("Failed to load default config")?,
    };

    match cli.command {
        Commands::Relay { bind } => {
            if let Some(bind) = bind {
                config.relay.bind = bind;
            }
            config.validate()?;
            run_relay(&config).await
        }
        Commands::Send {
            file,
            target,
            url,
            content_type,
        } => {
            if let Some(url) = url {
                config.client.url = url;
            }
            config.validate()?;
            send_file(&config, &file, &target, content_type).await
        }
        Commands::Receive { output, url, count } => {
            if let Some(url) = url {
                config.client.url = url;
            }
            if let Some(output) = output {
                config.client.download_dir = output;
            }
            config.validate()?;
            receive_files(&config, count).await
        }
    }
}

fn init_logging(verbose: u8, is_relay: bool) {
    // Clients keep quiet by default so log lines don't fight the progress bars
    let level = match (verbose, is_relay) {
        (0, false) => "warn",
        (0, true) | (1, _) => "info",
        (2, _) => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relaydrop={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_relay(config: &Config) -> anyhow::Result<()> {
    let server = RelayServer::from_config(&config.relay)
        .await
        .with_context(|| format!("Failed to bind {}", config.relay.bind))?;

    println!(
        "{} relay on {}",
        "Listening".green().bold(),
        server.local_addr()?.to_string().cyan()
    );

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn send_file(
    config: &Config,
    path: &Path,
    target: &str,
    content_type: Option<String>,
) -> anyhow::Result<()> {
    let mut source = FileSource::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    if let Some(content_type) = content_type {
        source = source.with_content_type(content_type);
    }
    let filename = source.metadata().filename.clone();
    let size = source.metadata().size;

    let session = Session::connect_to(config.client.url.clone());
    let local_id = session
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", config.client.url))?;
    tracing::info!("Connected as {}", local_id);
    session.set_target(target);

    let bar = TransferProgress::new("Sending", &filename, size);
    let _progress = {
        let bar = bar.clone();
        session.on_file_progress(move |percent| bar.set_percent(*percent))
    };

    let result = session.send_file(&mut source).await;

    // Queued chunks are still in the writer; let them reach the relay
    session.disconnect().await;

    match result {
        Ok(_) => {
            bar.finish_with_message(format!(
                "{} {} ({}) to {}",
                "Sent".green().bold(),
                filename,
                format_bytes(size),
                target.cyan()
            ));
            Ok(())
        }
        Err(e) => {
            bar.abandon();
            Err(e).with_context(|| format!("Failed to send {}", filename))
        }
    }
}

enum ClientEvent {
    Receive(ReceiveEvent),
    Closed,
}

async fn receive_files(config: &Config, count: Option<u64>) -> anyhow::Result<()> {
    let out_dir = config.client.download_dir.clone();
    let session = Session::connect_to(config.client.url.clone());

    // Observers fire on the channel's reader task; hand events to this one
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _events = {
        let tx = tx.clone();
        session.on_receive(move |event| {
            let _ = tx.send(ClientEvent::Receive(event.clone()));
        })
    };
    let _state = session.on_connection_state(move |open| {
        if !*open {
            let _ = tx.send(ClientEvent::Closed);
        }
    });

    let local_id = session
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", config.client.url))?;

    println!("{} {}", "Your id:".bold(), local_id.yellow().bold());
    println!(
        "Waiting for files, saving to {} (Ctrl-C to stop)",
        out_dir.display()
    );

    let mut received = 0u64;
    let mut bar: Option<TransferProgress> = None;

    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c() => break,
        };

        match event {
            Some(ClientEvent::Receive(ReceiveEvent::Started(meta))) => {
                if let Some(old) = bar.take() {
                    old.abandon();
                }
                bar = TransferProgress::receiving(&meta.filename, meta.size);
                if bar.is_none() {
                    println!("{} {} (empty file)", "Skipped".yellow(), meta.filename);
                }
            }
            Some(ClientEvent::Receive(ReceiveEvent::Progress { percent, .. })) => {
                if let Some(bar) = &bar {
                    bar.set_percent(percent);
                }
            }
            Some(ClientEvent::Receive(ReceiveEvent::Completed(file))) => {
                let path = download::save_to_dir(&file, &out_dir)
                    .await
                    .with_context(|| format!("Failed to save {}", file.name))?;
                let msg = format!(
                    "{} {} ({})",
                    "Saved".green().bold(),
                    path.display(),
                    format_bytes(file.byte_length)
                );
                match bar.take() {
                    Some(bar) => bar.finish_with_message(msg),
                    None => println!("{msg}"),
                }

                received += 1;
                if count.is_some_and(|n| received >= n) {
                    break;
                }
            }
            Some(ClientEvent::Closed) | None => {
                if let Some(bar) = bar.take() {
                    bar.abandon();
                }
                bail!("Connection to relay closed");
            }
        }
    }

    session.disconnect().await;
    println!("Received {} file(s)", received);
    Ok(())
}
