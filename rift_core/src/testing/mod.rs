//! Deterministic test doubles for the peer-connection seam.
//!
//! Built for this crate's unit tests, and for integration tests that enable
//! the `testing` feature to get a full sender/receiver pair without a real
//! WebRTC stack. Release builds leave it out.

pub mod channel;
pub mod peer;

pub use channel::MockChannel;
pub use peer::MockPeer;

use std::time::Duration;

/// Poll `condition` every few milliseconds until it holds or `limit` passes.
/// Returns whether it held.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
