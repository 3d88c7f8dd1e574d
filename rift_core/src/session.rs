//! One sender or receiver session: signaling, negotiation and transfer glued
//! together with cancellation and teardown on every exit path.

use crate::config::RiftConfig;
use crate::error::{Result, RiftError};
use crate::negotiation::{Outcome, ReceiverNegotiation, SenderNegotiation};
use crate::passphrase::Passphrase;
use crate::peer::{DataChannel, OpenChannel, PeerConnection, PeerEvent, PeerEvents};
use crate::signaling::SignalingChannel;
use crate::transfer::{FileSink, FileSource, ReceiverEngine, SendSummary, SenderEngine};
use crate::{ReceivedFile, Status, TransferEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Common plumbing owned by a session.
struct Context<P: PeerConnection> {
    config: RiftConfig,
    peer: P,
    events: PeerEvents<P::Channel>,
    event_tx: mpsc::Sender<TransferEvent>,
    cancel: CancellationToken,
}

impl<P: PeerConnection> Context<P> {
    async fn emit(&self, event: TransferEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn connect(&self) -> Result<SignalingChannel> {
        self.emit(TransferEvent::Status(Status::ConnectingToRelay))
            .await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RiftError::Cancelled),
            channel = SignalingChannel::connect(&self.config.relay_url) => channel,
        }
    }

    async fn teardown(&self, signaling: &SignalingChannel) {
        signaling.close();
        if let Err(e) = self.peer.close().await {
            tracing::debug!(error = %e, "peer close failed");
        }
    }

    async fn report<T>(&self, result: &Result<T>) {
        if let Err(e) = result {
            tracing::error!(error = %e, kind = ?e.kind(), "session failed");
            self.emit(TransferEvent::error(e)).await;
        }
    }
}

async fn close_channel<C: DataChannel>(open: &OpenChannel<C>) {
    if let Err(e) = open.channel.close().await {
        tracing::debug!(error = %e, "data channel close failed");
    }
}

/// Offers one file under a relay-assigned passphrase.
pub struct SenderSession<P: PeerConnection> {
    ctx: Context<P>,
}

impl<P: PeerConnection> SenderSession<P> {
    pub fn new(
        config: RiftConfig,
        peer: P,
        events: PeerEvents<P::Channel>,
        event_tx: mpsc::Sender<TransferEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx: Context {
                config,
                peer,
                events,
                event_tx,
                cancel,
            },
        }
    }

    /// Connect to the configured relay and send `file`.
    pub async fn run<F: FileSource>(self, file: F) -> Result<SendSummary> {
        self.ctx
            .emit(TransferEvent::Status(Status::Initializing))
            .await;
        let signaling = match self.ctx.connect().await {
            Ok(signaling) => signaling,
            Err(e) => {
                let result = Err(e);
                self.ctx.report(&result).await;
                return result;
            }
        };
        self.run_with(signaling, file).await
    }

    /// Send `file` using an already-connected relay channel.
    pub async fn run_with<F: FileSource>(
        mut self,
        mut signaling: SignalingChannel,
        file: F,
    ) -> Result<SendSummary> {
        let mut negotiation = SenderNegotiation::new(&self.ctx.config, self.ctx.event_tx.clone());
        let result = self.transfer(&mut negotiation, &mut signaling, &file).await;

        negotiation.finish(if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Aborted
        });
        self.ctx.teardown(&signaling).await;
        self.ctx.report(&result).await;

        if let Ok(summary) = &result {
            self.ctx
                .emit(TransferEvent::Sent {
                    file_name: summary.file_name.clone(),
                })
                .await;
            self.ctx.emit(TransferEvent::Status(Status::Complete)).await;
        }
        result
    }

    async fn transfer<F: FileSource>(
        &mut self,
        negotiation: &mut SenderNegotiation,
        signaling: &mut SignalingChannel,
        file: &F,
    ) -> Result<SendSummary> {
        let ctx = &mut self.ctx;
        let mut open = negotiation
            .run(&ctx.peer, &mut ctx.events, signaling, &ctx.cancel)
            .await?;
        if let Some(passphrase) = negotiation.passphrase() {
            tracing::info!(passphrase, "receiver connected");
        }

        let engine = SenderEngine::new(&ctx.config, ctx.event_tx.clone());
        let result = tokio::select! {
            result = engine.run(&open.channel, file, &ctx.cancel) => result,
            reason = peer_failure(&mut ctx.events) => Err(RiftError::PeerConnection(reason)),
        };

        if result.is_ok() {
            // Relay is no longer needed once everything is queued
            signaling.close();
            linger(&mut open, &ctx.config, &ctx.cancel).await;
        }
        close_channel(&open).await;
        result
    }
}

/// Resolves with the reason once the connection reports failure; never
/// resolves if the event inbox ends first.
async fn peer_failure<C>(events: &mut PeerEvents<C>) -> String {
    loop {
        match events.recv().await {
            Some(PeerEvent::Failed(reason)) => return reason,
            Some(_) => {}
            None => return std::future::pending().await,
        }
    }
}

/// Give the receiver a chance to drain and close the channel itself.
async fn linger<C: DataChannel>(
    open: &mut OpenChannel<C>,
    config: &RiftConfig,
    cancel: &CancellationToken,
) {
    let closed_by_receiver = async {
        while open.messages.recv().await.is_some() {}
    };
    tokio::select! {
        _ = cancel.cancelled() => tracing::debug!("linger cancelled"),
        waited = tokio::time::timeout(config.sender_linger(), closed_by_receiver) => match waited {
            Ok(()) => tracing::debug!("receiver closed the channel"),
            Err(_) => tracing::debug!("linger elapsed, closing channel"),
        },
    }
}

/// Fetches one file from the sender holding a passphrase.
pub struct ReceiverSession<P: PeerConnection> {
    ctx: Context<P>,
}

impl<P: PeerConnection> ReceiverSession<P> {
    pub fn new(
        config: RiftConfig,
        peer: P,
        events: PeerEvents<P::Channel>,
        event_tx: mpsc::Sender<TransferEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx: Context {
                config,
                peer,
                events,
                event_tx,
                cancel,
            },
        }
    }

    /// Connect to the configured relay and receive into `sink`.
    pub async fn run<S: FileSink>(self, passphrase: &Passphrase, sink: S) -> Result<ReceivedFile> {
        self.ctx
            .emit(TransferEvent::Status(Status::Initializing))
            .await;
        let signaling = match self.ctx.connect().await {
            Ok(signaling) => signaling,
            Err(e) => {
                let result = Err(e);
                self.ctx.report(&result).await;
                return result;
            }
        };
        self.run_with(signaling, passphrase, sink).await
    }

    pub async fn run_with<S: FileSink>(
        mut self,
        mut signaling: SignalingChannel,
        passphrase: &Passphrase,
        sink: S,
    ) -> Result<ReceivedFile> {
        let mut negotiation = ReceiverNegotiation::new(passphrase, self.ctx.event_tx.clone());
        let result = self
            .transfer(&mut negotiation, &mut signaling, sink)
            .await;

        negotiation.finish(if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Aborted
        });
        self.ctx.teardown(&signaling).await;
        self.ctx.report(&result).await;

        if let Ok(file) = &result {
            self.ctx.emit(TransferEvent::Received(file.clone())).await;
            self.ctx.emit(TransferEvent::Status(Status::Complete)).await;
        }
        result
    }

    async fn transfer<S: FileSink>(
        &mut self,
        negotiation: &mut ReceiverNegotiation,
        signaling: &mut SignalingChannel,
        sink: S,
    ) -> Result<ReceivedFile> {
        let ctx = &mut self.ctx;
        let mut open = negotiation
            .run(&ctx.peer, &mut ctx.events, signaling, &ctx.cancel)
            .await?;

        let mut engine = ReceiverEngine::new(
            sink,
            ctx.config.receive_idle_timeout(),
            ctx.event_tx.clone(),
        );
        let result = tokio::select! {
            result = engine.run(&mut open.messages, Some(signaling), &ctx.cancel) => result,
            reason = peer_failure(&mut ctx.events) => Err(RiftError::PeerConnection(reason)),
        };

        // Closing tells a lingering sender we are done
        close_channel(&open).await;
        result
    }
}
