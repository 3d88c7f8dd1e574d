use serde::{Deserialize, Serialize};

/// JSON messages exchanged through the relay.
///
/// `ice-candidate.candidate` is itself a JSON-encoded `RTCIceCandidateInit`,
/// carried as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// Sender's session offer; the relay answers with a `passphrase`
    Offer {
        sdp: String,
        #[serde(
            rename = "passphraseLength",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        passphrase_length: Option<usize>,
    },
    Answer {
        sdp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
    IceCandidate {
        candidate: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
    /// Relay-assigned passphrase, delivered to the sender
    Passphrase { passphrase: String },
    /// Receiver asks the relay to pair it with the sender holding `passphrase`
    ConnectionRequest { passphrase: String },
}

impl SignalingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice-candidate",
            SignalingMessage::Passphrase { .. } => "passphrase",
            SignalingMessage::ConnectionRequest { .. } => "connection-request",
        }
    }
}
