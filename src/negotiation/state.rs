//! Negotiation state machine.

use crate::types::RoomId;

/// Which side of the offer/answer exchange this peer is.
///
/// Resolved exactly once per session by the peer-ready handshake (or its
/// glare tie-break); never re-resolved without a full session reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationRole {
    #[default]
    Undetermined,
    Offerer,
    Answerer,
}

/// Current negotiation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    /// Not yet announced to the room.
    Idle,
    /// `peer-ready` emitted, waiting for the role to resolve.
    AwaitingRole,
    /// Offer emitted, waiting for the answer.
    Offering,
    /// Answer emitted; signaling is complete on this side.
    Answering,
    /// Both descriptions applied.
    Stable,
    /// The underlying transport reports connectivity.
    Connected,
    /// Torn down cleanly.
    Ended,
    /// Torn down by a negotiation failure. Absorbing; never auto-retried.
    Errored { reason: String },
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Errored { .. })
    }
}

impl Default for NegotiationState {
    fn default() -> Self {
        Self::Idle
    }
}

/// State transitions applied by the coordinator after the corresponding
/// side effect succeeded.
#[derive(Debug, Clone)]
pub enum NegotiationTransition {
    ReadyAnnounced,
    OfferEmitted,
    AnswerEmitted,
    AnswerApplied,
    TransportConnected,
    Ended,
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// The pure negotiation machine: state plus resolved role.
#[derive(Debug, Clone, Default)]
pub struct Negotiation {
    state: NegotiationState,
    role: NegotiationRole,
}

impl Negotiation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Applies a transition. Returns an error if it is invalid in the
    /// current state; terminal states absorb everything.
    pub fn apply(&mut self, transition: NegotiationTransition) -> Result<(), InvalidTransition> {
        let (next_state, next_role) = match (&self.state, &transition) {
            (NegotiationState::Idle, NegotiationTransition::ReadyAnnounced) => {
                (NegotiationState::AwaitingRole, self.role)
            }
            // Receiving the remote peer-ready first makes this side the
            // offerer.
            (NegotiationState::AwaitingRole, NegotiationTransition::OfferEmitted) => {
                (NegotiationState::Offering, NegotiationRole::Offerer)
            }
            // Either a direct answer (offer received while undetermined) or
            // a glare yield (offer received while offering, lost tie-break).
            (
                NegotiationState::AwaitingRole | NegotiationState::Offering,
                NegotiationTransition::AnswerEmitted,
            ) => (NegotiationState::Answering, NegotiationRole::Answerer),
            (NegotiationState::Offering, NegotiationTransition::AnswerApplied) => {
                (NegotiationState::Stable, self.role)
            }
            // The answerer has no explicit edge into Stable; its signaling
            // is already settled, so connectivity is accepted from both.
            (
                NegotiationState::Stable | NegotiationState::Answering,
                NegotiationTransition::TransportConnected,
            ) => (NegotiationState::Connected, self.role),
            (state, NegotiationTransition::Ended) if !state.is_terminal() => {
                (NegotiationState::Ended, self.role)
            }
            (state, NegotiationTransition::Failed { reason }) if !state.is_terminal() => (
                NegotiationState::Errored {
                    reason: reason.clone(),
                },
                self.role,
            ),
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{current:?}"),
                    attempted: format!("{transition:?}"),
                });
            }
        };
        self.state = next_state;
        self.role = next_role;
        Ok(())
    }
}

/// Glare tie-break: both sides sent offers, exactly one must yield.
///
/// The order is lexicographic over `"<room>:<tag>"`; since both peers know
/// both tags (their own, and the one carried by the incoming offer), they
/// compute the same total order and the lower side yields to answerer.
pub fn yields_to_remote(room_id: &RoomId, local_tag: &str, remote_tag: &str) -> bool {
    format!("{room_id}:{local_tag}") < format!("{room_id}:{remote_tag}")
}
