use bytes::Bytes;
use rift_core::RiftError;
use rift_core::peer::{DataChannel, OpenChannel, PeerEvent};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::data_channel_message::DataChannelMessage;

pub(crate) fn peer_error(e: webrtc::Error) -> RiftError {
    RiftError::PeerConnection(e.to_string())
}

/// A WebRTC data channel.
#[derive(Clone)]
pub struct RtcChannel {
    inner: Arc<RTCDataChannel>,
}

impl RtcChannel {
    pub fn label(&self) -> &str {
        self.inner.label()
    }
}

impl std::fmt::Debug for RtcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcChannel")
            .field("label", &self.inner.label())
            .finish()
    }
}

impl DataChannel for RtcChannel {
    async fn send(&self, data: Bytes) -> rift_core::Result<()> {
        self.inner.send(&data).await.map_err(peer_error)?;
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.inner.buffered_amount().await
    }

    async fn close(&self) -> rift_core::Result<()> {
        self.inner.close().await.map_err(peer_error)
    }

    fn is_closed(&self) -> bool {
        matches!(
            self.inner.ready_state(),
            RTCDataChannelState::Closing | RTCDataChannelState::Closed
        )
    }
}

/// Hook up message, close and open callbacks.
///
/// Inbound messages are queued from the moment the callbacks are set; the
/// queue is handed out once, with [`PeerEvent::ChannelOpen`], and ends when
/// the channel closes.
pub(crate) fn attach(dc: Arc<RTCDataChannel>, events: mpsc::UnboundedSender<PeerEvent<RtcChannel>>) {
    let (msg_tx, msg_rx) = mpsc::unbounded_channel::<Bytes>();
    let msg_tx = Arc::new(Mutex::new(Some(msg_tx)));
    let msg_rx = Arc::new(Mutex::new(Some(msg_rx)));

    let inbox = msg_tx.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        if let Ok(guard) = inbox.lock() {
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(msg.data);
            }
        }
        Box::pin(async {})
    }));

    let label = dc.label().to_string();
    dc.on_close(Box::new(move || {
        tracing::debug!(label = %label, "data channel closed");
        if let Ok(mut guard) = msg_tx.lock() {
            guard.take();
        }
        Box::pin(async {})
    }));

    let channel = RtcChannel { inner: dc.clone() };
    dc.on_open(Box::new(move || {
        let messages = msg_rx.lock().ok().and_then(|mut guard| guard.take());
        if let Some(messages) = messages {
            tracing::debug!(label = %channel.label(), "data channel open");
            let _ = events.send(PeerEvent::ChannelOpen(OpenChannel {
                channel: channel.clone(),
                messages,
            }));
        }
        Box::pin(async {})
    }));
}
