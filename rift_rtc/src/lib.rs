//! WebRTC-backed peer connections for `rift_core`.

mod channel;
mod peer;

pub use channel::RtcChannel;
pub use peer::RtcPeer;
