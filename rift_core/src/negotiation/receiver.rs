use super::{IceExchange, Machine, NegotiationState, Outcome};
use crate::error::{Result, RiftError};
use crate::passphrase::Passphrase;
use crate::peer::{OpenChannel, PeerConnection, PeerEvent, PeerEvents, SessionDescription};
use crate::signaling::{SignalingChannel, SignalingEvent, SignalingMessage};
use crate::{Status, TransferEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Answering side: asks the relay for the sender holding a passphrase and
/// answers the offer it forwards.
#[derive(Debug)]
pub struct ReceiverNegotiation {
    machine: Machine,
    ice: IceExchange,
    passphrase: String,
    event_tx: mpsc::Sender<TransferEvent>,
}

impl ReceiverNegotiation {
    pub fn new(passphrase: &Passphrase, event_tx: mpsc::Sender<TransferEvent>) -> Self {
        let passphrase = passphrase.to_string();
        Self {
            machine: Machine::new("receiver", NegotiationState::AwaitingPassphrase),
            ice: IceExchange::with_passphrase(Some(passphrase.clone())),
            passphrase,
            event_tx,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.machine.state
    }

    pub fn finish(&mut self, outcome: Outcome) {
        self.machine.finish(outcome);
    }

    /// Drive the handshake until the sender's channel opens on our side.
    ///
    /// The relay must stay up for the whole handshake; any close before
    /// the channel opens is a lost connection.
    pub async fn run<P: PeerConnection>(
        &mut self,
        peer: &P,
        events: &mut PeerEvents<P::Channel>,
        signaling: &mut SignalingChannel,
        cancel: &CancellationToken,
    ) -> Result<OpenChannel<P::Channel>> {
        let result = self.drive(peer, events, signaling, cancel).await;
        match &result {
            Ok(_) => self.machine.transition(NegotiationState::DataChannelOpen),
            Err(e) => {
                tracing::debug!(error = %e, "receiver negotiation aborted");
                self.machine.finish(Outcome::Aborted);
            }
        }
        result
    }

    async fn drive<P: PeerConnection>(
        &mut self,
        peer: &P,
        events: &mut PeerEvents<P::Channel>,
        signaling: &mut SignalingChannel,
        cancel: &CancellationToken,
    ) -> Result<OpenChannel<P::Channel>> {
        signaling.send(SignalingMessage::ConnectionRequest {
            passphrase: self.passphrase.clone(),
        })?;
        self.machine.transition(NegotiationState::RequestingOffer);
        self.emit(TransferEvent::Status(Status::Requesting)).await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RiftError::Cancelled),
                // An open channel wins over a relay close that raced it
                event = events.recv() => match event {
                    Some(PeerEvent::LocalCandidate(candidate)) => self.ice.local(candidate, signaling),
                    Some(PeerEvent::ChannelOpen(open)) => {
                        tracing::info!("data channel open");
                        return Ok(open);
                    }
                    Some(PeerEvent::Failed(reason)) => return Err(RiftError::PeerConnection(reason)),
                    None => {
                        return Err(RiftError::PeerConnection(
                            "peer event stream ended".to_string(),
                        ));
                    }
                },
                event = signaling.recv() => match event {
                    SignalingEvent::Message(message) => {
                        self.on_message(peer, signaling, message).await?;
                    }
                    SignalingEvent::Closed { code, reason } => {
                        return Err(RiftError::signaling_lost(code, reason));
                    }
                },
            }
        }
    }

    async fn on_message<P: PeerConnection>(
        &mut self,
        peer: &P,
        signaling: &SignalingChannel,
        message: SignalingMessage,
    ) -> Result<()> {
        match message {
            SignalingMessage::Offer { sdp, .. } => {
                if self.machine.state != NegotiationState::RequestingOffer {
                    let stale = RiftError::StaleSignalingState(format!(
                        "offer received in {:?}",
                        self.machine.state
                    ));
                    tracing::warn!(error = %stale, "ignoring duplicate offer");
                    return Ok(());
                }
                self.machine.transition(NegotiationState::Answering);
                self.emit(TransferEvent::Status(Status::Signaling)).await;

                peer.set_remote_description(SessionDescription::offer(sdp))
                    .await?;
                let answer = peer.create_answer().await?;
                signaling.send(SignalingMessage::Answer {
                    sdp: answer,
                    passphrase: Some(self.passphrase.clone()),
                })?;

                self.ice.remote_description_applied(signaling);
                self.machine.transition(NegotiationState::IceExchange);
                self.emit(TransferEvent::Status(Status::ConnectingToPeer)).await;
            }
            SignalingMessage::IceCandidate { candidate, .. } => {
                self.ice.remote(peer, candidate).await;
            }
            other => {
                tracing::warn!(kind = other.kind(), "unexpected signaling message for receiver");
            }
        }
        Ok(())
    }

    async fn emit(&self, event: TransferEvent) {
        let _ = self.event_tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::SdpKind;
    use crate::testing::{MockChannel, MockPeer, wait_until};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn setup() -> (ReceiverNegotiation, mpsc::Receiver<TransferEvent>) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let passphrase: Passphrase = "crab-ocean-rust".parse().unwrap();
        (ReceiverNegotiation::new(&passphrase, event_tx), event_rx)
    }

    async fn expect_message(relay: &mut SignalingChannel) -> SignalingMessage {
        match tokio::time::timeout(WAIT, relay.recv()).await.unwrap() {
            SignalingEvent::Message(message) => message,
            other => panic!("expected message, got {:?}", other),
        }
    }

    fn offer(sdp: &str) -> SignalingMessage {
        SignalingMessage::Offer {
            sdp: sdp.to_string(),
            passphrase_length: None,
        }
    }

    #[tokio::test]
    async fn test_request_offer_answer() {
        let (mut negotiation, mut ui) = setup();
        assert_eq!(negotiation.state(), NegotiationState::AwaitingPassphrase);
        let (peer, mut events) = MockPeer::new();
        let (mut signaling, mut relay) = SignalingChannel::pair();
        let cancel = CancellationToken::new();

        let script = async {
            assert_eq!(
                expect_message(&mut relay).await,
                SignalingMessage::ConnectionRequest {
                    passphrase: "crab-ocean-rust".to_string()
                }
            );
            relay.send(offer("v=0 offer")).unwrap();
            match expect_message(&mut relay).await {
                SignalingMessage::Answer { passphrase, .. } => {
                    assert_eq!(passphrase.as_deref(), Some("crab-ocean-rust"));
                }
                other => panic!("expected answer, got {:?}", other),
            }
            // Candidate gathered with the answer follows it
            assert!(matches!(
                expect_message(&mut relay).await,
                SignalingMessage::IceCandidate { .. }
            ));
            let (open, _inbox) = MockChannel::open();
            peer.emit(PeerEvent::ChannelOpen(open));
        };

        let (result, ()) = tokio::join!(
            negotiation.run(&peer, &mut events, &mut signaling, &cancel),
            script
        );
        assert!(result.is_ok());
        assert_eq!(negotiation.state(), NegotiationState::DataChannelOpen);
        negotiation.finish(Outcome::Success);
        assert_eq!(
            negotiation.state(),
            NegotiationState::Terminal(Outcome::Success)
        );

        let remote = peer.remote_descriptions();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].kind, SdpKind::Offer);

        let mut statuses = Vec::new();
        while let Ok(event) = ui.try_recv() {
            if let TransferEvent::Status(status) = event {
                statuses.push(status);
            }
        }
        assert_eq!(
            statuses,
            vec![Status::Requesting, Status::Signaling, Status::ConnectingToPeer]
        );
    }

    #[tokio::test]
    async fn test_duplicate_offer_is_ignored() {
        let (mut negotiation, _ui) = setup();
        let (peer, mut events) = MockPeer::new();
        let (mut signaling, mut relay) = SignalingChannel::pair();
        let cancel = CancellationToken::new();

        let script = async {
            expect_message(&mut relay).await;
            relay.send(offer("first")).unwrap();
            relay.send(offer("second")).unwrap();
            relay
                .send(SignalingMessage::IceCandidate {
                    candidate: "remote".to_string(),
                    passphrase: None,
                })
                .unwrap();
            assert!(wait_until(WAIT, || peer.remote_candidates().len() == 1).await);
            let (open, _inbox) = MockChannel::open();
            peer.emit(PeerEvent::ChannelOpen(open));
        };

        let (result, ()) = tokio::join!(
            negotiation.run(&peer, &mut events, &mut signaling, &cancel),
            script
        );
        assert!(result.is_ok());
        let remote = peer.remote_descriptions();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].sdp, "first");
    }

    #[tokio::test]
    async fn test_relay_close_during_handshake_is_signaling_lost() {
        let (mut negotiation, _ui) = setup();
        let (peer, mut events) = MockPeer::new();
        let (mut signaling, mut relay) = SignalingChannel::pair();
        let cancel = CancellationToken::new();

        let script = async {
            expect_message(&mut relay).await;
            relay.close();
        };

        let (result, ()) = tokio::join!(
            negotiation.run(&peer, &mut events, &mut signaling, &cancel),
            script
        );
        match result {
            Err(RiftError::SignalingLost { code, .. }) => assert_eq!(code, Some(1000)),
            other => panic!("expected signaling lost, got {:?}", other.map(|_| ())),
        }
        assert_eq!(
            negotiation.state(),
            NegotiationState::Terminal(Outcome::Aborted)
        );
    }

    #[tokio::test]
    async fn test_cancel_while_requesting() {
        let (mut negotiation, _ui) = setup();
        let (peer, mut events) = MockPeer::new();
        let (mut signaling, _relay) = SignalingChannel::pair();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = negotiation
            .run(&peer, &mut events, &mut signaling, &cancel)
            .await;
        assert!(matches!(result, Err(RiftError::Cancelled)));
    }
}
