//! Authenticated, ordered signaling channel to the relay.
//!
//! [`SignalChannel`] wraps a [`Transport`] with the typed message
//! vocabulary: outbound messages are encoded to JSON frames, inbound frames
//! are decoded on a pump task and surfaced as [`ChannelEvent`]s. Frames sent
//! after connect reach the relay in send order; delivery to the remote peer
//! is best-effort and never acknowledged.

pub mod error;
pub mod transport;

pub use error::{Result, SocketError};
pub use transport::{Transport, TransportEvent, TransportFactory, WebSocketTransportFactory};

use log::{debug, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::auth::Credential;
use crate::signaling::SignalingMessage;
use crate::types::RoomId;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// An event surfaced to the session's event loop.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(SignalingMessage),
    Disconnected,
}

/// The room-scoped signaling connection, owned by exactly one session.
pub struct SignalChannel {
    transport: Arc<dyn Transport>,
    room_id: RoomId,
    closed: AtomicBool,
}

impl SignalChannel {
    /// Dials the relay and starts the decode pump.
    ///
    /// Fails with [`SocketError::ConnectionRefused`] on a bad credential or
    /// transport failure.
    pub async fn connect(
        factory: &dyn TransportFactory,
        url: &str,
        credential: &Credential,
        room_id: RoomId,
    ) -> Result<(Arc<Self>, mpsc::Receiver<ChannelEvent>)> {
        let (transport, raw_rx) = factory
            .connect(url, credential)
            .await
            .map_err(|e| SocketError::ConnectionRefused(e.to_string()))?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(Self::decode_pump(raw_rx, events_tx));

        let channel = Arc::new(Self {
            transport,
            room_id,
            closed: AtomicBool::new(false),
        });
        Ok((channel, events_rx))
    }

    async fn decode_pump(
        mut raw_rx: mpsc::Receiver<TransportEvent>,
        events_tx: mpsc::Sender<ChannelEvent>,
    ) {
        loop {
            match raw_rx.recv().await {
                Some(TransportEvent::Connected) => {
                    trace!("signaling transport connected");
                }
                Some(TransportEvent::FrameReceived(frame)) => {
                    match SignalingMessage::from_frame(&frame) {
                        Ok(msg) => {
                            debug!("<-- signaling: {}", msg.kind());
                            if events_tx.send(ChannelEvent::Message(msg)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            // A malformed frame is the relay's problem, not a
                            // reason to drop the call.
                            warn!("ignoring unparseable signaling frame: {e}");
                        }
                    }
                }
                Some(TransportEvent::Disconnected) | None => {
                    let _ = events_tx.send(ChannelEvent::Disconnected).await;
                    break;
                }
            }
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Encodes and sends one message. Send order is preserved.
    pub async fn send(&self, msg: &SignalingMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SocketError::SocketClosed);
        }
        let frame = msg.to_frame()?;
        debug!("--> signaling: {}", msg.kind());
        self.transport
            .send_frame(&frame)
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))
    }

    /// Closes the channel and its transport. Idempotent; subscriptions are
    /// released when the pump observes the disconnect.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.transport.disconnect().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingTransport {
        sent: AtomicUsize,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send_frame(&self, _frame: &str) -> std::result::Result<(), anyhow::Error> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn channel_with_counter() -> (Arc<SignalChannel>, Arc<CountingTransport>) {
        let transport = Arc::new(CountingTransport {
            sent: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        });
        let channel = Arc::new(SignalChannel {
            transport: transport.clone(),
            room_id: RoomId::from("room-1"),
            closed: AtomicBool::new(false),
        });
        (channel, transport)
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (channel, transport) = channel_with_counter();

        channel.close().await;
        channel.close().await;

        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let (channel, transport) = channel_with_counter();
        channel.close().await;

        let result = channel
            .send(&SignalingMessage::PeerReady {
                room_id: RoomId::from("room-1"),
            })
            .await;

        assert!(matches!(result, Err(SocketError::SocketClosed)));
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
    }
}
