//! Offer/answer/ICE handshake that turns a passphrase into an open data channel.
//!
//! Each side is a small actor: one loop selecting over the relay inbox, the
//! peer-event inbox and a cancellation token, handling one event at a time.

pub mod receiver;
pub mod sender;

pub use receiver::ReceiverNegotiation;
pub use sender::SenderNegotiation;

use crate::peer::PeerConnection;
use crate::signaling::{SignalingChannel, SignalingMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    AwaitingPassphrase,
    Offering,
    RequestingOffer,
    AwaitingAnswer,
    Answering,
    IceExchange,
    DataChannelOpen,
    Terminal(Outcome),
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Terminal(_))
    }
}

/// State cell shared by both sides; logs every transition.
#[derive(Debug)]
struct Machine {
    role: &'static str,
    state: NegotiationState,
}

impl Machine {
    fn new(role: &'static str, initial: NegotiationState) -> Self {
        Self {
            role,
            state: initial,
        }
    }

    fn transition(&mut self, next: NegotiationState) {
        if self.state != next {
            tracing::debug!(role = self.role, from = ?self.state, to = ?next, "negotiation state");
            self.state = next;
        }
    }

    /// A finished negotiation never leaves its terminal state.
    fn finish(&mut self, outcome: Outcome) {
        if !self.state.is_terminal() {
            self.transition(NegotiationState::Terminal(outcome));
        }
    }
}

/// Trickle-ICE bookkeeping.
///
/// Local candidates are held back until a remote description exists, then
/// flushed in gathering order. Remote candidates arriving before the remote
/// description are discarded.
#[derive(Debug, Default)]
struct IceExchange {
    pending_local: Vec<String>,
    remote_description_set: bool,
    passphrase: Option<String>,
    /// Relay went away after hand-off; further local candidates are dropped
    relay_gone: bool,
}

impl IceExchange {
    fn with_passphrase(passphrase: Option<String>) -> Self {
        Self {
            passphrase,
            ..Self::default()
        }
    }

    /// A candidate that cannot reach the relay is dropped; losing the relay
    /// itself is reported through the signaling inbox.
    fn local(&mut self, candidate: String, signaling: &SignalingChannel) {
        if self.relay_gone {
            tracing::debug!("relay closed, dropping local candidate");
            return;
        }
        if !self.remote_description_set {
            self.pending_local.push(candidate);
            tracing::debug!(buffered = self.pending_local.len(), "buffering local candidate");
            return;
        }
        let message = SignalingMessage::IceCandidate {
            candidate,
            passphrase: self.passphrase.clone(),
        };
        if let Err(e) = signaling.send(message) {
            tracing::debug!(error = %e, "dropping local candidate");
            self.relay_gone = true;
        }
    }

    fn remote_description_applied(&mut self, signaling: &SignalingChannel) {
        self.remote_description_set = true;
        let pending = std::mem::take(&mut self.pending_local);
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "flushing buffered local candidates");
        }
        for candidate in pending {
            self.local(candidate, signaling);
        }
    }

    async fn remote<P: PeerConnection>(&self, peer: &P, candidate: String) {
        if !peer.has_remote_description().await {
            tracing::warn!("discarding remote ICE candidate received before remote description");
            return;
        }
        if let Err(e) = peer.add_ice_candidate(candidate).await {
            tracing::warn!(error = %e, "failed to apply remote ICE candidate");
        }
    }
}
