//! Relay signaling: JSON messages over a WebSocket, keyed by passphrase.

pub mod channel;
pub mod messages;

pub use channel::{NORMAL_CLOSURE, SignalingChannel, SignalingEvent};
pub use messages::SignalingMessage;
