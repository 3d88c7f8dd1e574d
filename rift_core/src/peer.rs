//! Seam between the protocol logic and a concrete peer-connection stack.
//!
//! Implementations deliver asynchronous happenings (local ICE candidates,
//! channel open, failure) through an `mpsc` inbox of [`PeerEvent`]s handed out
//! by their constructor, so the negotiation loop consumes them serially.

use crate::error::Result;
use bytes::Bytes;
use std::future::Future;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Offer/answer state of the local connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

/// An ordered, reliable message channel.
pub trait DataChannel: Send + Sync + 'static {
    fn send(&self, data: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Bytes queued by the transport but not yet handed to the network
    fn buffered_amount(&self) -> impl Future<Output = usize> + Send;

    fn close(&self) -> impl Future<Output = Result<()>> + Send;

    /// Whether either side has closed the channel or the transport under it
    fn is_closed(&self) -> bool;
}

/// A data channel that finished opening, plus its inbound messages.
///
/// `messages` ends when the remote side closes the channel.
pub struct OpenChannel<C> {
    pub channel: C,
    pub messages: mpsc::UnboundedReceiver<Bytes>,
}

impl<C> std::fmt::Debug for OpenChannel<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenChannel").finish_non_exhaustive()
    }
}

pub enum PeerEvent<C> {
    /// JSON-encoded candidate gathered locally
    LocalCandidate(String),
    ChannelOpen(OpenChannel<C>),
    /// Connection failed or was closed by the stack
    Failed(String),
}

impl<C> std::fmt::Debug for PeerEvent<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            PeerEvent::ChannelOpen(_) => f.write_str("ChannelOpen"),
            PeerEvent::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
        }
    }
}

pub type PeerEvents<C> = mpsc::UnboundedReceiver<PeerEvent<C>>;

pub trait PeerConnection: Send + Sync + 'static {
    type Channel: DataChannel;

    /// Create an ordered, reliable channel. Its opening is reported as
    /// [`PeerEvent::ChannelOpen`].
    fn create_data_channel(&self, label: &str) -> impl Future<Output = Result<()>> + Send;

    /// Create an offer and install it as the local description.
    fn create_offer(&self) -> impl Future<Output = Result<String>> + Send;

    /// Create an answer and install it as the local description.
    fn create_answer(&self) -> impl Future<Output = Result<String>> + Send;

    fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    fn signaling_state(&self) -> SignalingState;

    fn has_remote_description(&self) -> impl Future<Output = bool> + Send;

    /// Apply a remote candidate in its JSON-encoded form.
    fn add_ice_candidate(&self, candidate: String) -> impl Future<Output = Result<()>> + Send;

    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}
