use super::messages::SignalingMessage;
use crate::error::{Result, RiftError};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Close code sent on an orderly shutdown
pub const NORMAL_CLOSURE: u16 = 1000;

/// What the owning state machine sees from the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Message(SignalingMessage),
    Closed { code: Option<u16>, reason: String },
}

impl SignalingEvent {
    pub fn is_normal_closure(&self) -> bool {
        matches!(self, SignalingEvent::Closed { code: Some(NORMAL_CLOSURE), .. })
    }
}

#[derive(Debug)]
enum Outbound {
    Message(SignalingMessage),
    Close,
}

/// Duplex JSON channel to the relay.
///
/// A writer task owns the socket sink and a reader task feeds the inbox, so
/// callers never block on the socket. Dropping the channel closes the socket.
#[derive(Debug)]
pub struct SignalingChannel {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::UnboundedReceiver<SignalingEvent>,
}

impl SignalingChannel {
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::debug!(url, "connecting to relay");
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| RiftError::signaling_lost(None, format!("connect {}: {}", url, e)))?;
        tracing::info!(url, "relay connected");
        Ok(Self::from_stream(ws))
    }

    /// Wrap an already-upgraded socket (client or server side).
    pub fn from_stream<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (mut sink, mut stream) = ws.split();

        tokio::spawn(async move {
            while let Some(outbound) = out_rx.recv().await {
                match outbound {
                    Outbound::Message(message) => {
                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!(error = %e, "failed to encode signaling message");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            tracing::debug!(error = %e, "relay write failed");
                            return;
                        }
                    }
                    Outbound::Close => break,
                }
            }
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            let _ = sink.send(Message::Close(Some(frame))).await;
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            let closed = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SignalingMessage>(text.as_str()) {
                            Ok(message) => {
                                if in_tx.send(SignalingEvent::Message(message)).is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "skipping unparsable signaling frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => SignalingEvent::Closed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.to_string(),
                            },
                            None => SignalingEvent::Closed {
                                code: None,
                                reason: "closed without status".to_string(),
                            },
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break SignalingEvent::Closed {
                            code: None,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        break SignalingEvent::Closed {
                            code: None,
                            reason: "connection ended".to_string(),
                        };
                    }
                }
            };
            let _ = in_tx.send(closed);
        });

        Self {
            outbound: out_tx,
            inbound: in_rx,
        }
    }

    /// Two channels wired back to back without a socket.
    ///
    /// Whatever one end sends arrives at the other; `close()` on one end
    /// delivers a normal closure to the other.
    pub fn pair() -> (Self, Self) {
        let (a_out_tx, a_out_rx) = mpsc::unbounded_channel();
        let (b_out_tx, b_out_rx) = mpsc::unbounded_channel();
        let (a_in_tx, a_in_rx) = mpsc::unbounded_channel();
        let (b_in_tx, b_in_rx) = mpsc::unbounded_channel();

        tokio::spawn(forward_in_memory(a_out_rx, b_in_tx));
        tokio::spawn(forward_in_memory(b_out_rx, a_in_tx));

        (
            Self {
                outbound: a_out_tx,
                inbound: a_in_rx,
            },
            Self {
                outbound: b_out_tx,
                inbound: b_in_rx,
            },
        )
    }

    pub fn send(&self, message: SignalingMessage) -> Result<()> {
        tracing::debug!(kind = message.kind(), "signaling send");
        self.outbound
            .send(Outbound::Message(message))
            .map_err(|_| RiftError::signaling_lost(None, "relay writer stopped"))
    }

    /// Next relay event. After the socket is gone this keeps returning `Closed`.
    pub async fn recv(&mut self) -> SignalingEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or_else(|| SignalingEvent::Closed {
                code: None,
                reason: "signaling channel already closed".to_string(),
            })
    }

    /// Send a normal-closure frame and stop writing.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

async fn forward_in_memory(
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    peer_inbox: mpsc::UnboundedSender<SignalingEvent>,
) {
    let closed = loop {
        match outbound.recv().await {
            Some(Outbound::Message(message)) => {
                if peer_inbox.send(SignalingEvent::Message(message)).is_err() {
                    return;
                }
            }
            Some(Outbound::Close) => {
                break SignalingEvent::Closed {
                    code: Some(NORMAL_CLOSURE),
                    reason: String::new(),
                };
            }
            None => {
                break SignalingEvent::Closed {
                    code: None,
                    reason: "peer dropped".to_string(),
                };
            }
        }
    };
    let _ = peer_inbox.send(closed);
}
