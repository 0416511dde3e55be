//! Capability seam over the external WebRTC engine.
//!
//! The crate drives negotiation through this trait and never touches
//! ICE/DTLS/SRTP internals. An integrator binds a concrete engine by
//! implementing [`PeerConnectionFactory`]; tests script a mock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::media::MediaTrack;

/// SDP payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A possible network path descriptor exchanged to establish connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u16>,
}

/// Negotiation lifecycle of the peer connection, mirrored by the
/// negotiation coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Connected,
    Closed,
}

/// An event produced by the peer-connection engine.
#[derive(Debug, Clone)]
pub enum PeerConnectionEvent {
    /// The engine gathered a local ICE candidate to relay to the peer.
    IceCandidate(IceCandidate),
    /// The underlying transport changed state.
    StateChanged(PeerConnectionState),
    /// The engine failed in a way negotiation cannot recover from.
    Failed { reason: String },
}

/// Negotiation primitives of the media transport.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, anyhow::Error>;

    async fn create_answer(&self) -> Result<SessionDescription, anyhow::Error>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), anyhow::Error>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), anyhow::Error>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), anyhow::Error>;

    /// Feeds a local media track into the transport. Never triggers
    /// renegotiation on its own.
    async fn add_track(&self, track: MediaTrack) -> Result<(), anyhow::Error>;

    /// Closes the transport and releases engine resources. Idempotent.
    async fn close(&self);
}

/// A factory responsible for creating new peer connections.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Creates a connection and returns it along with its event stream.
    async fn create(
        &self,
        ice_servers: &[String],
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::Receiver<PeerConnectionEvent>), anyhow::Error>;
}
