//! In-process signaling relay for the integration tests.
//!
//! Pairs a sender and a receiver by passphrase over real WebSocket
//! connections: the sender's offer is parked under a fresh passphrase until
//! a receiver asks for it, after which messages are forwarded verbatim.

#![allow(dead_code)]

use rift_core::signaling::{SignalingChannel, SignalingEvent, SignalingMessage};
use rift_core::{CodeGenerator, Wordlist};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const DEFAULT_WORDS: usize = 3;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// One distinct word for every five-roll code.
pub fn synthetic_wordlist() -> Wordlist {
    let mut raw = String::new();
    for a in 1..=6 {
        for b in 1..=6 {
            for c in 1..=6 {
                for d in 1..=6 {
                    for e in 1..=6 {
                        raw.push_str(&format!("{a}{b}{c}{d}{e}\tw{a}{b}{c}{d}{e}\n"));
                    }
                }
            }
        }
    }
    Wordlist::parse(&raw).unwrap()
}

struct Waiting {
    sender: SignalingChannel,
    offer: String,
}

type Registry = Arc<Mutex<HashMap<String, Waiting>>>;

pub struct Relay {
    pub url: String,
    handle: JoinHandle<()>,
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn start_relay() -> Relay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let generator = CodeGenerator::new(Arc::new(synthetic_wordlist()));
    let registry: Registry = Arc::default();

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let generator = generator.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                handle_connection(SignalingChannel::from_stream(ws), generator, registry).await;
            });
        }
    });

    Relay { url, handle }
}

async fn handle_connection(mut channel: SignalingChannel, generator: CodeGenerator, registry: Registry) {
    match channel.recv().await {
        SignalingEvent::Message(SignalingMessage::Offer {
            sdp,
            passphrase_length,
        }) => {
            let passphrase = generator
                .generate(passphrase_length.unwrap_or(DEFAULT_WORDS))
                .unwrap()
                .to_string();
            let _ = channel.send(SignalingMessage::Passphrase {
                passphrase: passphrase.clone(),
            });
            registry.lock().await.insert(
                passphrase,
                Waiting {
                    sender: channel,
                    offer: sdp,
                },
            );
        }
        SignalingEvent::Message(SignalingMessage::ConnectionRequest { passphrase }) => {
            let waiting = registry.lock().await.remove(&passphrase);
            match waiting {
                Some(Waiting { sender, offer }) => {
                    let _ = channel.send(SignalingMessage::Offer {
                        sdp: offer,
                        passphrase_length: None,
                    });
                    bridge(sender, channel).await;
                }
                None => channel.close(),
            }
        }
        _ => channel.close(),
    }
}

/// Forward both ways until either side leaves, then close the other.
async fn bridge(mut sender: SignalingChannel, mut receiver: SignalingChannel) {
    loop {
        tokio::select! {
            event = sender.recv() => match event {
                SignalingEvent::Message(message) => {
                    let _ = receiver.send(message);
                }
                SignalingEvent::Closed { .. } => {
                    receiver.close();
                    return;
                }
            },
            event = receiver.recv() => match event {
                SignalingEvent::Message(message) => {
                    let _ = sender.send(message);
                }
                SignalingEvent::Closed { .. } => {
                    sender.close();
                    return;
                }
            },
        }
    }
}
