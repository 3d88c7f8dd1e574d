//! Error kinds shared by every Rift component.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while generating codes, signaling, or moving file bytes.
#[derive(Debug, Error)]
pub enum RiftError {
    /// Wordlist could not be fetched or parsed.
    #[error("failed to load wordlist: {0}")]
    ResourceLoad(String),

    /// A rolled code has no wordlist entry.
    #[error("roll code {0} has no wordlist entry")]
    CodeGeneration(String),

    /// Relay socket closed before the session reached its hand-off point.
    #[error("signaling connection lost: {reason}")]
    SignalingLost { code: Option<u16>, reason: String },

    /// A protocol precondition was violated (e.g. chunk before metadata).
    #[error("protocol order violated: {0}")]
    ProtocolOrder(String),

    /// Bytes do not parse as a chunk-protocol frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Signaling message arrived in a state where it cannot be applied.
    /// Always recovered locally by dropping the message.
    #[error("stale signaling message: {0}")]
    StaleSignalingState(String),

    /// The peer connection layer failed or rejected an operation.
    #[error("peer connection error: {0}")]
    PeerConnection(String),

    /// No data arrived on the channel for the configured idle window.
    #[error("transfer stalled: no data for {}s", .0.as_secs())]
    TransferStalled(Duration),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error category reported to the UI collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ResourceLoad,
    CodeGeneration,
    SignalingLost,
    ProtocolOrder,
    MalformedFrame,
    StaleSignalingState,
    PeerConnection,
    TransferStalled,
    Cancelled,
    Config,
    Io,
}

impl RiftError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RiftError::ResourceLoad(_) => ErrorKind::ResourceLoad,
            RiftError::CodeGeneration(_) => ErrorKind::CodeGeneration,
            RiftError::SignalingLost { .. } => ErrorKind::SignalingLost,
            RiftError::ProtocolOrder(_) => ErrorKind::ProtocolOrder,
            RiftError::MalformedFrame(_) => ErrorKind::MalformedFrame,
            RiftError::StaleSignalingState(_) => ErrorKind::StaleSignalingState,
            RiftError::PeerConnection(_) => ErrorKind::PeerConnection,
            RiftError::TransferStalled(_) => ErrorKind::TransferStalled,
            RiftError::Cancelled => ErrorKind::Cancelled,
            RiftError::Config(_) => ErrorKind::Config,
            RiftError::Io(_) => ErrorKind::Io,
        }
    }

    /// Stale-state conditions are swallowed with a log line instead of
    /// aborting the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RiftError::StaleSignalingState(_))
    }

    pub(crate) fn signaling_lost(code: Option<u16>, reason: impl Into<String>) -> Self {
        RiftError::SignalingLost {
            code,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = RiftError> = std::result::Result<T, E>;
