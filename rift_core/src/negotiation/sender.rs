use super::{IceExchange, Machine, NegotiationState, Outcome};
use crate::config::RiftConfig;
use crate::error::{Result, RiftError};
use crate::peer::{OpenChannel, PeerConnection, PeerEvent, PeerEvents, SessionDescription, SignalingState};
use crate::signaling::{SignalingChannel, SignalingEvent, SignalingMessage};
use crate::{Status, TransferEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Offering side: publishes an offer, learns its passphrase from the relay,
/// applies the receiver's answer.
#[derive(Debug)]
pub struct SenderNegotiation {
    machine: Machine,
    ice: IceExchange,
    channel_label: String,
    passphrase_length: usize,
    event_tx: mpsc::Sender<TransferEvent>,
}

impl SenderNegotiation {
    pub fn new(config: &RiftConfig, event_tx: mpsc::Sender<TransferEvent>) -> Self {
        Self {
            machine: Machine::new("sender", NegotiationState::Idle),
            ice: IceExchange::default(),
            channel_label: config.channel_label.clone(),
            passphrase_length: config.passphrase_length,
            event_tx,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.machine.state
    }

    /// Passphrase assigned by the relay, once known.
    pub fn passphrase(&self) -> Option<&str> {
        self.ice.passphrase.as_deref()
    }

    pub fn finish(&mut self, outcome: Outcome) {
        self.machine.finish(outcome);
    }

    /// Drive the handshake until the data channel opens.
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
                tracing::debug!(error = %e, "sender negotiation aborted");
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
        self.machine.transition(NegotiationState::Offering);
        self.emit(TransferEvent::Status(Status::Signaling)).await;

        peer.create_data_channel(&self.channel_label).await?;
        let sdp = peer.create_offer().await?;
        signaling.send(SignalingMessage::Offer {
            sdp,
            passphrase_length: Some(self.passphrase_length),
        })?;
        self.machine.transition(NegotiationState::AwaitingAnswer);

        let mut relay_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RiftError::Cancelled),
                event = signaling.recv(), if relay_open => match event {
                    SignalingEvent::Message(message) => {
                        self.on_message(peer, signaling, message).await?;
                    }
                    SignalingEvent::Closed { code, reason } => {
                        if !self.ice.remote_description_set {
                            return Err(RiftError::signaling_lost(code, reason));
                        }
                        tracing::info!(?code, "relay closed after answer, continuing without it");
                        relay_open = false;
                        self.ice.relay_gone = true;
                    }
                },
                event = events.recv() => match event {
                    Some(PeerEvent::LocalCandidate(candidate)) => self.ice.local(candidate, signaling),
                    Some(PeerEvent::ChannelOpen(open)) => {
                        tracing::info!(label = %self.channel_label, "data channel open");
                        return Ok(open);
                    }
                    Some(PeerEvent::Failed(reason)) => return Err(RiftError::PeerConnection(reason)),
                    None => {
                        return Err(RiftError::PeerConnection(
                            "peer event stream ended".to_string(),
                        ));
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
            SignalingMessage::Passphrase { passphrase } => {
                tracing::info!(passphrase = %passphrase, "passphrase assigned");
                self.ice.passphrase = Some(passphrase.clone());
                self.emit(TransferEvent::Passphrase(passphrase)).await;
                self.emit(TransferEvent::Status(Status::WaitingForReceiver)).await;
            }
            SignalingMessage::Answer { sdp, .. } => match apply_answer(peer, sdp).await {
                Ok(()) => {
                    self.ice.remote_description_applied(signaling);
                    self.machine.transition(NegotiationState::IceExchange);
                    self.emit(TransferEvent::Status(Status::ConnectingToPeer)).await;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, "ignoring answer");
                }
                Err(e) => return Err(e),
            },
            SignalingMessage::IceCandidate { candidate, .. } => {
                self.ice.remote(peer, candidate).await;
            }
            other => {
                tracing::warn!(kind = other.kind(), "unexpected signaling message for sender");
            }
        }
        Ok(())
    }

    async fn emit(&self, event: TransferEvent) {
        let _ = self.event_tx.send(event).await;
    }
}

/// Apply an answer only while our offer is outstanding.
async fn apply_answer<P: PeerConnection>(peer: &P, sdp: String) -> Result<()> {
    let state = peer.signaling_state();
    if state != SignalingState::HaveLocalOffer {
        return Err(RiftError::StaleSignalingState(format!(
            "answer received in {:?}",
            state
        )));
    }
    peer.set_remote_description(SessionDescription::answer(sdp))
        .await
}
