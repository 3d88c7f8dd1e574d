use super::channel::MockChannel;
use crate::error::{Result, RiftError};
use crate::peer::{
    PeerConnection, PeerEvent, PeerEvents, SdpKind, SessionDescription, SignalingState,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct PeerState {
    signaling_state: SignalingState,
    local_description: Option<SessionDescription>,
    remote_descriptions: Vec<SessionDescription>,
    remote_candidates: Vec<String>,
    channel_labels: Vec<String>,
    offers_created: usize,
    closed: bool,
}

impl PeerState {
    fn connected(&self) -> bool {
        self.signaling_state == SignalingState::Stable
            && self.local_description.is_some()
            && !self.remote_descriptions.is_empty()
    }
}

/// Two mock peers that open a loopback channel once both have finished the
/// offer/answer exchange.
#[derive(Debug)]
struct PairLink {
    ready: [bool; 2],
    label: Option<String>,
    opened: bool,
    events: [mpsc::UnboundedSender<PeerEvent<MockChannel>>; 2],
}

impl PairLink {
    fn try_open(&mut self) {
        if self.opened || !self.ready[0] || !self.ready[1] || self.label.is_none() {
            return;
        }
        self.opened = true;
        let (a, b) = MockChannel::loopback_pair();
        let _ = self.events[0].send(PeerEvent::ChannelOpen(a));
        let _ = self.events[1].send(PeerEvent::ChannelOpen(b));
    }
}

/// Peer-connection double with browser-like offer/answer rules.
///
/// Every local description set produces one fake host candidate on the
/// event inbox. Remote descriptions and candidates are recorded for
/// assertions.
#[derive(Debug, Clone)]
pub struct MockPeer {
    state: Arc<Mutex<PeerState>>,
    events: mpsc::UnboundedSender<PeerEvent<MockChannel>>,
    link: Option<(Arc<Mutex<PairLink>>, usize)>,
}

impl MockPeer {
    pub fn new() -> (Self, PeerEvents<MockChannel>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_events(tx, None), rx)
    }

    /// Two linked peers; the channel opens once both sides are connected.
    pub fn loopback_pair() -> (
        (Self, PeerEvents<MockChannel>),
        (Self, PeerEvents<MockChannel>),
    ) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Mutex::new(PairLink {
            ready: [false, false],
            label: None,
            opened: false,
            events: [a_tx.clone(), b_tx.clone()],
        }));
        let a = Self::with_events(a_tx, Some((link.clone(), 0)));
        let b = Self::with_events(b_tx, Some((link, 1)));
        ((a, a_rx), (b, b_rx))
    }

    fn with_events(
        events: mpsc::UnboundedSender<PeerEvent<MockChannel>>,
        link: Option<(Arc<Mutex<PairLink>>, usize)>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(PeerState {
                signaling_state: SignalingState::Stable,
                local_description: None,
                remote_descriptions: Vec::new(),
                remote_candidates: Vec::new(),
                channel_labels: Vec::new(),
                offers_created: 0,
                closed: false,
            })),
            events,
            link,
        }
    }

    /// Push an event as if the stack produced it.
    pub fn emit(&self, event: PeerEvent<MockChannel>) {
        let _ = self.events.send(event);
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        lock(&self.state).remote_descriptions.clone()
    }

    pub fn remote_candidates(&self) -> Vec<String> {
        lock(&self.state).remote_candidates.clone()
    }

    pub fn channel_labels(&self) -> Vec<String> {
        lock(&self.state).channel_labels.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn local_description_set(&self, state: &mut PeerState, description: SessionDescription) {
        state.local_description = Some(description);
        let candidate = serde_json::json!({
            "candidate": format!(
                "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
                state.offers_created,
                50_000 + state.offers_created
            ),
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        });
        self.emit(PeerEvent::LocalCandidate(candidate.to_string()));
    }

    fn update_link(&self, state: &PeerState) {
        if let Some((link, side)) = &self.link {
            let mut link = lock(link);
            link.ready[*side] = state.connected();
            link.try_open();
        }
    }
}

impl PeerConnection for MockPeer {
    type Channel = MockChannel;

    async fn create_data_channel(&self, label: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.channel_labels.push(label.to_string());
        if let Some((link, _)) = &self.link {
            lock(link).label = Some(label.to_string());
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        let mut state = lock(&self.state);
        if state.signaling_state != SignalingState::Stable {
            return Err(RiftError::PeerConnection(format!(
                "cannot create offer in {:?}",
                state.signaling_state
            )));
        }
        state.offers_created += 1;
        let sdp = format!("v=0 mock-offer {}", state.offers_created);
        state.signaling_state = SignalingState::HaveLocalOffer;
        self.local_description_set(&mut state, SessionDescription::offer(sdp.clone()));
        Ok(sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let mut state = lock(&self.state);
        if state.signaling_state != SignalingState::HaveRemoteOffer {
            return Err(RiftError::PeerConnection(format!(
                "cannot create answer in {:?}",
                state.signaling_state
            )));
        }
        let sdp = "v=0 mock-answer".to_string();
        state.signaling_state = SignalingState::Stable;
        self.local_description_set(&mut state, SessionDescription::answer(sdp.clone()));
        self.update_link(&state);
        Ok(sdp)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let mut state = lock(&self.state);
        let next = match (description.kind, state.signaling_state) {
            (SdpKind::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
            (SdpKind::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (kind, current) => {
                return Err(RiftError::PeerConnection(format!(
                    "cannot apply remote {:?} in {:?}",
                    kind, current
                )));
            }
        };
        state.signaling_state = next;
        state.remote_descriptions.push(description);
        self.update_link(&state);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        lock(&self.state).signaling_state
    }

    async fn has_remote_description(&self) -> bool {
        !lock(&self.state).remote_descriptions.is_empty()
    }

    async fn add_ice_candidate(&self, candidate: String) -> Result<()> {
        let mut state = lock(&self.state);
        if state.remote_descriptions.is_empty() {
            return Err(RiftError::PeerConnection(
                "candidate before remote description".to_string(),
            ));
        }
        state.remote_candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.closed = true;
        state.signaling_state = SignalingState::Closed;
        Ok(())
    }
}
