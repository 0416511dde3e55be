//! Session-level error taxonomy.

use thiserror::Error;

use crate::auth::AuthError;
use crate::media::MediaError;
use crate::negotiation::NegotiationError;
use crate::room::RoomError;
use crate::socket::SocketError;

/// Terminal failures surfaced to the calling boundary.
///
/// None of these are retried inside the crate; recovery is a user-initiated
/// new attempt with a fresh [`crate::session::CallSession`].
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// No or invalid credential. Fatal to session start.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Signaling transport unreachable or rejected the credential.
    #[error("signaling connection refused: {0}")]
    ConnectionRefused(String),

    /// The room service rejected creation. Never retried automatically.
    #[error("room creation failed: {0}")]
    RoomCreationFailed(String),

    /// The relay answered the join attempt with a `join-error`.
    #[error("room join rejected: {0}")]
    RoomJoinRejected(String),

    /// Camera/microphone permission refused or acquisition failed.
    #[error("media access denied: {0}")]
    MediaAccessDenied(String),

    /// Malformed description, engine failure, or total ICE failure.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The signaling channel failed mid-operation.
    #[error("signaling channel error: {0}")]
    Channel(String),

    /// The requested operation is not valid in the session's current state.
    #[error("operation not valid in state {0}")]
    InvalidState(String),
}

impl From<AuthError> for CallError {
    fn from(err: AuthError) -> Self {
        CallError::Unauthenticated(err.to_string())
    }
}

impl From<RoomError> for CallError {
    fn from(err: RoomError) -> Self {
        CallError::RoomCreationFailed(err.to_string())
    }
}

impl From<MediaError> for CallError {
    fn from(err: MediaError) -> Self {
        CallError::MediaAccessDenied(err.to_string())
    }
}

impl From<NegotiationError> for CallError {
    fn from(err: NegotiationError) -> Self {
        CallError::NegotiationFailed(err.to_string())
    }
}

impl From<SocketError> for CallError {
    fn from(err: SocketError) -> Self {
        CallError::Channel(err.to_string())
    }
}

/// Why a session reached `Ended`.
///
/// A remote hangup is a graceful termination, not an error.
#[derive(Debug, Clone)]
pub enum EndReason {
    /// `end_call()` was invoked locally.
    LocalHangup,
    /// The peer sent `call-ended`.
    RemoteHangup,
    /// The session was torn down by a terminal failure.
    Failed(CallError),
}

impl EndReason {
    pub fn is_error(&self) -> bool {
        matches!(self, EndReason::Failed(_))
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::LocalHangup => f.write_str("ended locally"),
            EndReason::RemoteHangup => f.write_str("ended by peer"),
            EndReason::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}
