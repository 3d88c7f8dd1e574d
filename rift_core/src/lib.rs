//! Passphrase-paired peer-to-peer file transfer.
//!
//! A sender registers with a signaling relay, receives a passphrase and waits;
//! a receiver types the passphrase, the two peers exchange session
//! descriptions and ICE candidates through the relay, and the file then moves
//! over a direct data channel as a metadata frame followed by chunk frames.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;

pub mod config;
pub mod error;
pub mod negotiation;
pub mod passphrase;
pub mod peer;
pub mod session;
pub mod signaling;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transfer;

pub use config::RiftConfig;
pub use error::{ErrorKind, Result, RiftError};
pub use passphrase::{CodeGenerator, Passphrase, Wordlist};

/// Progress of a session as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Initializing,
    ConnectingToRelay,
    Signaling,
    WaitingForReceiver,
    Requesting,
    ConnectingToPeer,
    Transferring,
    Receiving,
    Complete,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Status::Initializing => "Initializing...",
            Status::ConnectingToRelay => "Connecting to signaling server...",
            Status::Signaling => "Negotiating connection...",
            Status::WaitingForReceiver => "Waiting for receiver...",
            Status::Requesting => "Requesting connection...",
            Status::ConnectingToPeer => "Connecting to peer...",
            Status::Transferring => "Transferring...",
            Status::Receiving => "Receiving...",
            Status::Complete => "Transfer complete!",
        };
        f.write_str(message)
    }
}

/// Where a received file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivedData {
    Memory(Bytes),
    Disk(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub data: ReceivedData,
}

/// Report from a session to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Status(Status),
    /// Passphrase assigned by the relay, to be shown to the sender
    Passphrase(String),
    /// Whole percent, monotonic, 100 emitted exactly once
    Progress(u8),
    Sent { file_name: String },
    Received(ReceivedFile),
    Error { kind: ErrorKind, message: String },
}

impl TransferEvent {
    pub fn error(err: &RiftError) -> Self {
        TransferEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
