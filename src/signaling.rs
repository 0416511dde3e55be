//! Wire format of the relay-scoped signaling messages.
//!
//! Frames are JSON objects `{"event": <kind>, "data": <payload>}`, matching
//! the relay's event vocabulary. All messages are implicitly scoped to the
//! room the channel joined; the relay handles fan-out to the other member.

use serde::{Deserialize, Serialize};

use crate::peer::IceCandidate;
use crate::types::RoomId;

/// One signaling frame.
///
/// The `tag` on `offer` is the sender's per-session identity; it lets the
/// receiver of a crossing offer resolve negotiation glare with the same
/// total order the sender computed (see `negotiation::yields_to_remote`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SignalingMessage {
    #[serde(rename_all = "camelCase")]
    Offer {
        room_id: RoomId,
        sdp: String,
        tag: String,
    },
    #[serde(rename_all = "camelCase")]
    Answer { room_id: RoomId, sdp: String },
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        room_id: RoomId,
        candidate: IceCandidate,
    },
    /// Announces local readiness to negotiate; whoever receives the other
    /// side's announcement first becomes the offerer.
    #[serde(rename_all = "camelCase")]
    PeerReady { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    JoinVideoRoom { room_id: RoomId, password: String },
    JoinError { message: String },
    #[serde(rename_all = "camelCase")]
    EndCall { room_id: RoomId },
    CallEnded,
    SelfIdentity { name: String },
    PeerIdentity { name: String },
}

impl SignalingMessage {
    /// Short kind label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice-candidate",
            SignalingMessage::PeerReady { .. } => "peer-ready",
            SignalingMessage::JoinVideoRoom { .. } => "join-video-room",
            SignalingMessage::JoinError { .. } => "join-error",
            SignalingMessage::EndCall { .. } => "end-call",
            SignalingMessage::CallEnded => "call-ended",
            SignalingMessage::SelfIdentity { .. } => "self-identity",
            SignalingMessage::PeerIdentity { .. } => "peer-identity",
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}
