//! Typed session event bus.
//!
//! One broadcast channel per event type; observers subscribe to exactly the
//! events they care about and late subscribers never block the session.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::EndReason;
use crate::media::TrackKind;
use crate::negotiation::NegotiationRole;
use crate::types::RoomId;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// The media transport reached connectivity.
#[derive(Debug, Clone)]
pub struct CallConnected {
    pub room_id: RoomId,
    pub role: NegotiationRole,
}

/// A display name reported by the relay.
#[derive(Debug, Clone)]
pub struct IdentityUpdate {
    pub name: String,
}

/// A local track was muted or unmuted.
#[derive(Debug, Clone)]
pub struct MediaToggled {
    pub kind: TrackKind,
    pub enabled: bool,
}

/// Terminal lifecycle notification. Emitted exactly once per session.
#[derive(Debug, Clone)]
pub struct SessionEnded {
    pub reason: EndReason,
    /// Wall-clock seconds between connectivity and teardown, when the call
    /// got that far.
    pub duration_secs: Option<i64>,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with a separate broadcast channel per event type.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    (connected, Arc<CallConnected>),
    (self_identity, Arc<IdentityUpdate>),
    (peer_identity, Arc<IdentityUpdate>),
    (media_toggled, Arc<MediaToggled>),
    (session_ended, Arc<SessionEnded>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
