//! Call negotiation and session lifecycle for two-party room calls.
//!
//! A [`session::CallSession`] coordinates the pieces needed to get two peers
//! admitted into a password-protected room and connected over a direct media
//! path:
//!
//! - [`auth`]: obtains the opaque signaling credential from the auth boundary
//! - [`socket`]: the authenticated WebSocket signaling channel to the relay
//! - [`room`]: room creation and the fire-and-forget join handshake
//! - [`negotiation`]: the offer/answer/ICE state machine, including the
//!   peer-ready role handshake and deterministic glare resolution
//! - [`peer`]: the capability seam over the external WebRTC engine
//! - [`media`]: local track acquisition and mute/unmute toggles
//!
//! The media engine itself is not implemented here; integrators supply a
//! [`peer::PeerConnectionFactory`] binding their engine of choice.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod negotiation;
pub mod net;
pub mod peer;
pub mod room;
pub mod session;
pub mod signaling;
pub mod socket;
pub mod types;

pub use config::SessionConfig;
pub use error::{CallError, EndReason};
pub use session::{CallSession, SessionState};
pub use signaling::SignalingMessage;
pub use types::RoomId;
