use crate::channel::{RtcChannel, attach, peer_error};
use rift_core::RiftConfig;
use rift_core::peer::{
    PeerConnection, PeerEvent, PeerEvents, SdpKind, SessionDescription, SignalingState,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

/// A WebRTC peer connection carrying one data channel.
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    events: mpsc::UnboundedSender<PeerEvent<RtcChannel>>,
}

impl RtcPeer {
    /// Build a connection using the configured STUN servers.
    pub async fn new(config: &RiftConfig) -> anyhow::Result<(Self, PeerEvents<RtcChannel>)> {
        let mut media = MediaEngine::default();
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if config.stun_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: config.stun_servers.clone(),
                ..Default::default()
            }]
        };
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        register_handlers(&pc, events_tx.clone());
        tracing::debug!(stun = ?config.stun_servers, "peer connection created");

        Ok((
            Self {
                pc,
                events: events_tx,
            },
            events_rx,
        ))
    }
}

fn register_handlers(pc: &RTCPeerConnection, events: mpsc::UnboundedSender<PeerEvent<RtcChannel>>) {
    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        match candidate {
            Some(candidate) => match candidate
                .to_json()
                .map_err(|e| e.to_string())
                .and_then(|init| serde_json::to_string(&init).map_err(|e| e.to_string()))
            {
                Ok(json) => {
                    let _ = tx.send(PeerEvent::LocalCandidate(json));
                }
                Err(e) => tracing::warn!(error = %e, "failed to encode local candidate"),
            },
            None => tracing::debug!("candidate gathering complete"),
        }
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        tracing::debug!(label = %dc.label(), "remote data channel announced");
        attach(dc, tx.clone());
        Box::pin(async {})
    }));

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        tracing::debug!(state = %state, "peer connection state");
        match state {
            RTCPeerConnectionState::Failed => {
                let _ = events.send(PeerEvent::Failed("peer connection failed".to_string()));
            }
            RTCPeerConnectionState::Disconnected => {
                tracing::warn!("peer connection disconnected");
            }
            _ => {}
        }
        Box::pin(async {})
    }));
}

/// Remote candidates normally arrive as the JSON of `RTCIceCandidateInit`;
/// a bare candidate line is accepted too.
fn parse_candidate(raw: &str) -> RTCIceCandidateInit {
    serde_json::from_str(raw).unwrap_or_else(|_| RTCIceCandidateInit {
        candidate: raw.to_string(),
        ..Default::default()
    })
}

impl PeerConnection for RtcPeer {
    type Channel = RtcChannel;

    async fn create_data_channel(&self, label: &str) -> rift_core::Result<()> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(peer_error)?;
        attach(dc, self.events.clone());
        Ok(())
    }

    async fn create_offer(&self) -> rift_core::Result<String> {
        let offer = self.pc.create_offer(None).await.map_err(peer_error)?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(peer_error)?;
        Ok(sdp)
    }

    async fn create_answer(&self) -> rift_core::Result<String> {
        let answer = self.pc.create_answer(None).await.map_err(peer_error)?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(peer_error)?;
        Ok(sdp)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> rift_core::Result<()> {
        let description = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(peer_error)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(peer_error)
    }

    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveRemotePranswer => {
                SignalingState::HaveLocalOffer
            }
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveLocalPranswer => {
                SignalingState::HaveRemoteOffer
            }
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: String) -> rift_core::Result<()> {
        self.pc
            .add_ice_candidate(parse_candidate(&candidate))
            .await
            .map_err(peer_error)
    }

    async fn close(&self) -> rift_core::Result<()> {
        self.pc.close().await.map_err(peer_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RiftConfig {
        RiftConfig {
            stun_servers: Vec::new(),
            ..RiftConfig::default()
        }
    }

    #[test]
    fn test_parse_candidate_accepts_json_and_bare_lines() {
        let json = r#"{"candidate":"candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let init = parse_candidate(json);
        assert!(init.candidate.starts_with("candidate:1"));
        assert_eq!(init.sdp_mid.as_deref(), Some("0"));

        let bare = parse_candidate("candidate:2 1 udp 1 10.0.0.3 50001 typ host");
        assert_eq!(bare.candidate, "candidate:2 1 udp 1 10.0.0.3 50001 typ host");
        assert_eq!(bare.sdp_mid, None);
    }

    #[tokio::test]
    async fn test_offer_answer_moves_both_sides_to_stable() {
        let (sender, _sender_events) = RtcPeer::new(&config()).await.unwrap();
        let (receiver, _receiver_events) = RtcPeer::new(&config()).await.unwrap();
        assert_eq!(sender.signaling_state(), SignalingState::Stable);

        sender.create_data_channel("rift").await.unwrap();
        let offer = sender.create_offer().await.unwrap();
        assert!(offer.contains("m=application"));
        assert_eq!(sender.signaling_state(), SignalingState::HaveLocalOffer);
        assert!(!sender.has_remote_description().await);

        receiver
            .set_remote_description(SessionDescription::offer(offer))
            .await
            .unwrap();
        assert_eq!(receiver.signaling_state(), SignalingState::HaveRemoteOffer);
        let answer = receiver.create_answer().await.unwrap();
        assert_eq!(receiver.signaling_state(), SignalingState::Stable);

        sender
            .set_remote_description(SessionDescription::answer(answer))
            .await
            .unwrap();
        assert_eq!(sender.signaling_state(), SignalingState::Stable);
        assert!(sender.has_remote_description().await);

        sender.close().await.unwrap();
        receiver.close().await.unwrap();
    }
}
