//! Command-line front end.
//!
//!   rift send <file>             offer a file and print its passphrase
//!   rift receive <passphrase>    fetch the file offered under a passphrase
//!   rift code [words]            print a fresh passphrase from the wordlist

use anyhow::{Context, Result};
use rift_core::session::{ReceiverSession, SenderSession};
use rift_core::transfer::{DiskFile, DiskSink};
use rift_core::{CodeGenerator, Passphrase, ReceivedData, RiftConfig, TransferEvent};
use rift_rtc::RtcPeer;
use std::env;
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  rift send <file>
  rift receive <passphrase>
  rift code [words]";

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (RIFT_RELAY_URL etc.)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = RiftConfig::load();
    config.validate()?;

    match args.first().map(String::as_str) {
        Some("send") => {
            let path = args.get(1).context(USAGE)?;
            send(config, Path::new(path)).await
        }
        Some("receive") if args.len() > 1 => {
            let passphrase: Passphrase = args[1..].join(" ").parse()?;
            receive(config, passphrase).await
        }
        Some("code") => {
            let words = match args.get(1) {
                Some(n) => n.parse().with_context(|| format!("invalid word count: {}", n))?,
                None => config.passphrase_length,
            };
            code(&config, words).await
        }
        _ => {
            eprintln!("{}", USAGE);
            Ok(())
        }
    }
}

async fn send(config: RiftConfig, path: &Path) -> Result<()> {
    let file = DiskFile::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    let (peer, events) = RtcPeer::new(&config).await?;
    let (event_tx, event_rx) = mpsc::channel(1000);
    let printer = tokio::spawn(print_events(event_rx));

    let session = SenderSession::new(config, peer, events, event_tx, cancel_on_ctrl_c());
    let result = session.run(file).await;
    let _ = printer.await;

    let summary = result?;
    tracing::info!(file = %summary.file_name, bytes = summary.bytes, chunks = summary.chunks, "done");
    Ok(())
}

async fn receive(config: RiftConfig, passphrase: Passphrase) -> Result<()> {
    let sink = DiskSink::new(config.download_dir.clone());
    let (peer, events) = RtcPeer::new(&config).await?;
    let (event_tx, event_rx) = mpsc::channel(1000);
    let printer = tokio::spawn(print_events(event_rx));

    let session = ReceiverSession::new(config, peer, events, event_tx, cancel_on_ctrl_c());
    let result = session.run(&passphrase, sink).await;
    let _ = printer.await;

    result?;
    Ok(())
}

async fn code(config: &RiftConfig, words: usize) -> Result<()> {
    let path = config
        .wordlist_path
        .as_ref()
        .context("no wordlist configured; set RIFT_WORDLIST or wordlist_path")?;
    let generator = CodeGenerator::from_path(path).await?;
    println!("{}", generator.generate(words)?);
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

async fn print_events(mut event_rx: mpsc::Receiver<TransferEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            TransferEvent::Status(status) => println!("{}", status),
            TransferEvent::Passphrase(passphrase) => {
                println!();
                println!("  Passphrase: {}", passphrase);
                println!("  Run `rift receive {}` on the other machine.", passphrase);
                println!();
            }
            TransferEvent::Progress(percent) => {
                print!("\r  {:>3}%", percent);
                if percent == 100 {
                    println!();
                }
                let _ = std::io::stdout().flush();
            }
            TransferEvent::Sent { file_name } => println!("Sent {}", file_name),
            TransferEvent::Received(file) => match file.data {
                ReceivedData::Disk(path) => {
                    println!("Saved {} ({} bytes) to {}", file.name, file.size, path.display())
                }
                ReceivedData::Memory(bytes) => println!("Received {} ({} bytes)", file.name, bytes.len()),
            },
            TransferEvent::Error { kind, message } => eprintln!("Error [{:?}]: {}", kind, message),
        }
    }
}
