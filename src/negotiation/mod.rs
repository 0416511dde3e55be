//! Offer/answer/ICE negotiation.
//!
//! [`state`] holds the pure state machine: negotiation states, the role
//! resolved by the peer-ready handshake, and the deterministic glare
//! comparator. [`coordinator`] drives the peer connection through those
//! states over the signaling channel, buffering early ICE candidates and
//! ignoring events that arrive after teardown.

pub mod coordinator;
pub mod state;

pub use coordinator::{NegotiationCoordinator, NegotiationError, NegotiationProgress};
pub use state::{
    InvalidTransition, Negotiation, NegotiationRole, NegotiationState, NegotiationTransition,
    yields_to_remote,
};
