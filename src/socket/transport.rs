//! Transport seam for the signaling connection.
//!
//! The transport is a dumb pipe for text frames with no knowledge of the
//! signaling vocabulary. The default implementation dials the relay over
//! WebSocket with the credential as a query parameter and pumps incoming
//! frames into an event channel.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::auth::Credential;

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text frame has been received from the relay.
    FrameReceived(String),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active signaling connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a text frame to the relay.
    async fn send_frame(&self, frame: &str) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Dials the relay and returns the transport with its event stream.
    async fn connect(
        &self,
        url: &str,
        credential: &Credential,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

/// WebSocket transport over tokio-tungstenite.
pub struct WebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
    is_connected: Arc<Mutex<bool>>,
}

impl WebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
            is_connected: Arc::new(Mutex::new(true)),
        }
    }

    async fn read_pump(mut stream: WsStream, events_tx: mpsc::Sender<TransportEvent>) {
        // Guarantees the disconnect notification even if the pump exits on
        // an error path.
        let _disconnect_guard = scopeguard::guard(events_tx.clone(), |tx| {
            let _ = tx.try_send(TransportEvent::Disconnected);
        });

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(txt))) => {
                    trace!("<-- frame: {} bytes", txt.len());
                    if events_tx
                        .send(TransportEvent::FrameReceived(txt.to_string()))
                        .await
                        .is_err()
                    {
                        warn!("frame receiver dropped, closing read pump");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    trace!("received close frame");
                    break;
                }
                Some(Ok(_)) => {
                    // Binary/ping/pong frames carry no signaling payload.
                }
                Some(Err(e)) => {
                    error!("error reading from websocket: {e}");
                    break;
                }
                None => {
                    trace!("websocket stream ended");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_frame(&self, frame: &str) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("socket is closed"))?;

        debug!("--> frame: {} bytes", frame.len());
        sink.send(Message::text(frame.to_string()))
            .await
            .map_err(|e| anyhow::anyhow!("websocket send error: {e}"))?;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut is_connected = self.is_connected.lock().await;
        if *is_connected {
            *is_connected = false;
            let mut sink_guard = self.ws_sink.lock().await;
            if let Some(sink) = sink_guard.as_mut() {
                let _ = sink.send(Message::Close(None)).await;
            }
            *sink_guard = None;
        }
    }
}

/// Default factory dialing the relay over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransportFactory;

impl WebSocketTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn connect(
        &self,
        url: &str,
        credential: &Credential,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let dial_url = format!(
            "{}?token={}",
            url,
            urlencoding::encode(credential.expose())
        );

        info!("dialing signaling relay at {url}");
        let (ws, _response) = connect_async(&dial_url).await?;
        let (sink, stream) = ws.split();

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let _ = events_tx.send(TransportEvent::Connected).await;
        tokio::spawn(WebSocketTransport::read_pump(stream, events_tx));

        Ok((Arc::new(WebSocketTransport::new(sink)), events_rx))
    }
}
