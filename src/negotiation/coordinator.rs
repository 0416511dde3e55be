//! Drives the peer connection through negotiation over the signaling
//! channel.
//!
//! The coordinator is the only owner of [`PeerConnectionState`]; the
//! session routes every inbound signaling message and peer-connection event
//! through it. All handlers serialize on one lock, so transitions are
//! applied in arrival order even while an earlier asynchronous primitive is
//! still pending. After teardown every handler degrades to a no-op.

use log::{debug, info, warn};
use rand::Rng;
use rand::distr::Alphanumeric;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

use super::state::{
    InvalidTransition, Negotiation, NegotiationRole, NegotiationState, NegotiationTransition,
    yields_to_remote,
};
use crate::peer::{
    IceCandidate, PeerConnection, PeerConnectionEvent, PeerConnectionState, SessionDescription,
};
use crate::signaling::SignalingMessage;
use crate::socket::{SignalChannel, SocketError};
use crate::types::RoomId;

const SESSION_TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("invalid negotiation transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("peer connection failure: {0}")]
    Peer(String),

    #[error("signaling channel failure: {0}")]
    Channel(#[from] SocketError),
}

/// What a handled event meant for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationProgress {
    /// Nothing the session needs to react to.
    Unchanged,
    /// The media transport just reached connectivity.
    Connected,
    /// The peer ended the call; the session must tear down without
    /// re-emitting an end signal.
    Ended,
}

struct CoordinatorInner {
    negotiation: Negotiation,
    pc_state: PeerConnectionState,
    /// True once the remote description is applied; candidates arriving
    /// earlier are buffered, never dropped.
    remote_description_set: bool,
    pending_remote_candidates: Vec<IceCandidate>,
}

pub struct NegotiationCoordinator {
    room_id: RoomId,
    /// Per-session identity used only for the glare total order.
    local_tag: String,
    channel: Arc<SignalChannel>,
    pc: Arc<dyn PeerConnection>,
    inner: Mutex<CoordinatorInner>,
    closed: AtomicBool,
}

impl NegotiationCoordinator {
    pub fn new(room_id: RoomId, channel: Arc<SignalChannel>, pc: Arc<dyn PeerConnection>) -> Self {
        let tag: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_TAG_LEN)
            .map(char::from)
            .collect();
        Self::with_tag(room_id, channel, pc, tag)
    }

    /// Like [`Self::new`] with an explicit session tag. Glare resolution is
    /// deterministic in the pair of tags, which tests rely on.
    pub fn with_tag(
        room_id: RoomId,
        channel: Arc<SignalChannel>,
        pc: Arc<dyn PeerConnection>,
        local_tag: String,
    ) -> Self {
        Self {
            room_id,
            local_tag,
            channel,
            pc,
            inner: Mutex::new(CoordinatorInner {
                negotiation: Negotiation::new(),
                pc_state: PeerConnectionState::New,
                remote_description_set: false,
                pending_remote_candidates: Vec::new(),
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn local_tag(&self) -> &str {
        &self.local_tag
    }

    pub async fn state(&self) -> NegotiationState {
        self.inner.lock().await.negotiation.state().clone()
    }

    pub async fn role(&self) -> NegotiationRole {
        self.inner.lock().await.negotiation.role()
    }

    pub async fn pc_state(&self) -> PeerConnectionState {
        self.inner.lock().await.pc_state
    }

    /// Number of remote candidates currently held back.
    pub async fn buffered_candidates(&self) -> usize {
        self.inner.lock().await.pending_remote_candidates.len()
    }

    /// Announces local readiness to the room and starts waiting for the
    /// role to resolve.
    pub async fn announce_ready(&self) -> Result<(), NegotiationError> {
        let mut inner = self.inner.lock().await;
        self.channel
            .send(&SignalingMessage::PeerReady {
                room_id: self.room_id.clone(),
            })
            .await?;
        inner.negotiation.apply(NegotiationTransition::ReadyAnnounced)?;
        Ok(())
    }

    /// Routes one inbound signaling message.
    ///
    /// Messages that are not negotiation concerns report `Unchanged`.
    pub async fn handle_message(
        &self,
        msg: &SignalingMessage,
    ) -> Result<NegotiationProgress, NegotiationError> {
        if self.closed.load(Ordering::SeqCst) {
            debug!("ignoring {} after teardown", msg.kind());
            return Ok(NegotiationProgress::Unchanged);
        }

        match msg {
            SignalingMessage::PeerReady { .. } => self.handle_peer_ready().await,
            SignalingMessage::Offer { sdp, tag, .. } => self.handle_offer(sdp, tag).await,
            SignalingMessage::Answer { sdp, .. } => self.handle_answer(sdp).await,
            SignalingMessage::IceCandidate { candidate, .. } => {
                self.handle_remote_candidate(candidate.clone()).await
            }
            SignalingMessage::CallEnded => {
                self.mark_ended().await;
                Ok(NegotiationProgress::Ended)
            }
            other => {
                debug!("{} is not a negotiation concern", other.kind());
                Ok(NegotiationProgress::Unchanged)
            }
        }
    }

    /// Routes one event from the peer-connection engine.
    pub async fn handle_peer_event(
        &self,
        event: PeerConnectionEvent,
    ) -> Result<NegotiationProgress, NegotiationError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(NegotiationProgress::Unchanged);
        }

        match event {
            PeerConnectionEvent::IceCandidate(candidate) => {
                self.channel
                    .send(&SignalingMessage::IceCandidate {
                        room_id: self.room_id.clone(),
                        candidate,
                    })
                    .await?;
                Ok(NegotiationProgress::Unchanged)
            }
            PeerConnectionEvent::StateChanged(PeerConnectionState::Connected) => {
                let mut inner = self.inner.lock().await;
                match inner.negotiation.state() {
                    NegotiationState::Stable | NegotiationState::Answering => {
                        inner
                            .negotiation
                            .apply(NegotiationTransition::TransportConnected)?;
                        inner.pc_state = PeerConnectionState::Connected;
                        info!("media transport connected for room {}", self.room_id);
                        Ok(NegotiationProgress::Connected)
                    }
                    state => {
                        debug!("transport connected while negotiation is {state:?}");
                        Ok(NegotiationProgress::Unchanged)
                    }
                }
            }
            PeerConnectionEvent::StateChanged(state) => {
                self.inner.lock().await.pc_state = state;
                Ok(NegotiationProgress::Unchanged)
            }
            PeerConnectionEvent::Failed { reason } => {
                self.fail(&reason).await;
                Err(NegotiationError::Peer(reason))
            }
        }
    }

    /// Receiving the remote announcement first makes this side the offerer.
    async fn handle_peer_ready(&self) -> Result<NegotiationProgress, NegotiationError> {
        let mut inner = self.inner.lock().await;
        if inner.negotiation.role() != NegotiationRole::Undetermined
            || inner.negotiation.state() != &NegotiationState::AwaitingRole
        {
            debug!(
                "ignoring peer-ready (role {:?}, state {:?})",
                inner.negotiation.role(),
                inner.negotiation.state()
            );
            return Ok(NegotiationProgress::Unchanged);
        }

        let result = self.emit_offer(&mut inner).await;
        self.absorb_failure(&mut inner, result).await?;
        info!("assumed offerer role for room {}", self.room_id);
        Ok(NegotiationProgress::Unchanged)
    }

    async fn emit_offer(&self, inner: &mut CoordinatorInner) -> Result<(), NegotiationError> {
        let offer = self
            .pc
            .create_offer()
            .await
            .map_err(|e| NegotiationError::Peer(e.to_string()))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| NegotiationError::Peer(e.to_string()))?;
        inner.pc_state = PeerConnectionState::HaveLocalOffer;

        self.channel
            .send(&SignalingMessage::Offer {
                room_id: self.room_id.clone(),
                sdp: offer.sdp,
                tag: self.local_tag.clone(),
            })
            .await?;
        inner.negotiation.apply(NegotiationTransition::OfferEmitted)?;
        Ok(())
    }

    async fn handle_offer(
        &self,
        sdp: &str,
        remote_tag: &str,
    ) -> Result<NegotiationProgress, NegotiationError> {
        let mut inner = self.inner.lock().await;
        match inner.negotiation.role() {
            NegotiationRole::Undetermined => {
                if inner.negotiation.state() != &NegotiationState::AwaitingRole {
                    debug!(
                        "ignoring offer in state {:?}",
                        inner.negotiation.state()
                    );
                    return Ok(NegotiationProgress::Unchanged);
                }
                let result = self.emit_answer(&mut inner, sdp).await;
                self.absorb_failure(&mut inner, result).await?;
                info!("assumed answerer role for room {}", self.room_id);
            }
            NegotiationRole::Offerer => {
                // Glare: both sides sent offers. The lower tag yields and
                // discards its in-flight offer; the higher side ignores the
                // incoming offer and keeps its own outstanding.
                if yields_to_remote(&self.room_id, &self.local_tag, remote_tag) {
                    info!(
                        "offer glare in room {}: yielding to remote offer",
                        self.room_id
                    );
                    let result = self.emit_answer(&mut inner, sdp).await;
                    self.absorb_failure(&mut inner, result).await?;
                } else {
                    info!(
                        "offer glare in room {}: keeping our offer, ignoring remote",
                        self.room_id
                    );
                }
            }
            NegotiationRole::Answerer => {
                debug!("ignoring duplicate offer");
            }
        }
        Ok(NegotiationProgress::Unchanged)
    }

    async fn emit_answer(
        &self,
        inner: &mut CoordinatorInner,
        offer_sdp: &str,
    ) -> Result<(), NegotiationError> {
        self.pc
            .set_remote_description(SessionDescription::offer(offer_sdp))
            .await
            .map_err(|e| NegotiationError::Peer(e.to_string()))?;
        inner.remote_description_set = true;
        inner.pc_state = PeerConnectionState::HaveRemoteOffer;
        self.drain_pending_candidates(inner).await;

        let answer = self
            .pc
            .create_answer()
            .await
            .map_err(|e| NegotiationError::Peer(e.to_string()))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| NegotiationError::Peer(e.to_string()))?;
        inner.pc_state = PeerConnectionState::Stable;

        self.channel
            .send(&SignalingMessage::Answer {
                room_id: self.room_id.clone(),
                sdp: answer.sdp,
            })
            .await?;
        inner.negotiation.apply(NegotiationTransition::AnswerEmitted)?;
        Ok(())
    }

    async fn handle_answer(&self, sdp: &str) -> Result<NegotiationProgress, NegotiationError> {
        let mut inner = self.inner.lock().await;
        if inner.negotiation.state() != &NegotiationState::Offering {
            debug!(
                "ignoring stale answer in state {:?}",
                inner.negotiation.state()
            );
            return Ok(NegotiationProgress::Unchanged);
        }

        let result = self.apply_answer(&mut inner, sdp).await;
        self.absorb_failure(&mut inner, result).await?;
        Ok(NegotiationProgress::Unchanged)
    }

    async fn apply_answer(
        &self,
        inner: &mut CoordinatorInner,
        sdp: &str,
    ) -> Result<(), NegotiationError> {
        self.pc
            .set_remote_description(SessionDescription::answer(sdp))
            .await
            .map_err(|e| NegotiationError::Peer(e.to_string()))?;
        inner.remote_description_set = true;
        inner.pc_state = PeerConnectionState::Stable;
        self.drain_pending_candidates(inner).await;
        inner.negotiation.apply(NegotiationTransition::AnswerApplied)?;
        Ok(())
    }

    /// Candidates must never be dropped merely because they arrive before
    /// the descriptions are in place.
    async fn handle_remote_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<NegotiationProgress, NegotiationError> {
        let mut inner = self.inner.lock().await;
        if inner.negotiation.is_terminal() {
            return Ok(NegotiationProgress::Unchanged);
        }

        if inner.remote_description_set {
            // A single rejected candidate does not abort the negotiation.
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!("peer connection rejected ICE candidate: {e}");
            }
        } else {
            debug!(
                "buffering early ICE candidate ({} pending)",
                inner.pending_remote_candidates.len() + 1
            );
            inner.pending_remote_candidates.push(candidate);
        }
        Ok(NegotiationProgress::Unchanged)
    }

    async fn drain_pending_candidates(&self, inner: &mut CoordinatorInner) {
        if inner.pending_remote_candidates.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut inner.pending_remote_candidates);
        debug!("applying {} buffered ICE candidate(s)", pending.len());
        for candidate in pending {
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!("peer connection rejected buffered ICE candidate: {e}");
            }
        }
    }

    /// On a failed negotiation step: enter `Errored`, close resources, and
    /// propagate the failure so the session can notify its boundary.
    async fn absorb_failure(
        &self,
        inner: &mut CoordinatorInner,
        result: Result<(), NegotiationError>,
    ) -> Result<(), NegotiationError> {
        if let Err(err) = result {
            // Channel failures mid-teardown are indistinguishable from the
            // peer having left; either way this negotiation is over.
            let reason = err.to_string();
            if !inner.negotiation.is_terminal() {
                let _ = inner
                    .negotiation
                    .apply(NegotiationTransition::Failed { reason });
            }
            self.closed.store(true, Ordering::SeqCst);
            self.pc.close().await;
            inner.pc_state = PeerConnectionState::Closed;
            return Err(err);
        }
        Ok(())
    }

    async fn fail(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        if !inner.negotiation.is_terminal() {
            let _ = inner.negotiation.apply(NegotiationTransition::Failed {
                reason: reason.to_string(),
            });
        }
        self.closed.store(true, Ordering::SeqCst);
        self.pc.close().await;
        inner.pc_state = PeerConnectionState::Closed;
    }

    async fn mark_ended(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock().await;
        if !inner.negotiation.is_terminal() {
            let _ = inner.negotiation.apply(NegotiationTransition::Ended);
        }
        self.pc.close().await;
        inner.pc_state = PeerConnectionState::Closed;
    }

    /// Closes the peer connection and enters `Ended`. Idempotent; called by
    /// the session on every teardown path.
    pub async fn shutdown(&self) {
        self.mark_ended().await;
    }
}
