//! The call session aggregate.
//!
//! A [`CallSession`] owns the signaling channel, the peer connection (via
//! the negotiation coordinator), and the local media for exactly one call.
//! It is the single source of truth for lifecycle state; the other
//! components report events upward and never mutate each other. A session
//! that ends is never resumed — a new call requires a new session.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use crate::auth::{CredentialProvider, HttpCredentialProvider};
use crate::config::SessionConfig;
use crate::error::{CallError, EndReason};
use crate::events::{CallConnected, EventBus, IdentityUpdate, MediaToggled, SessionEnded};
use crate::media::{LocalMediaState, MediaSource, MediaTrackController, TrackKind};
use crate::negotiation::{NegotiationCoordinator, NegotiationProgress, NegotiationRole};
use crate::net::HttpClient;
use crate::peer::{PeerConnectionEvent, PeerConnectionFactory, PeerConnectionState};
use crate::room::{RoomAdmission, RoomCredentials};
use crate::signaling::SignalingMessage;
use crate::socket::{ChannelEvent, SignalChannel, TransportFactory};
use crate::types::RoomId;

/// Session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Resolving the signaling credential.
    Authenticating,
    /// Room created and/or join emitted; waiting for relay evidence of
    /// membership (join success has no direct ack).
    RoomPending { created: bool, joined: bool },
    InCall { joined_at: DateTime<Utc> },
    Ended { at: DateTime<Utc> },
}

impl SessionState {
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended { .. })
    }
}

pub struct CallSession {
    room_id: RoomId,
    config: SessionConfig,
    credentials: Arc<dyn CredentialProvider>,
    transport_factory: Arc<dyn TransportFactory>,
    peer_factory: Arc<dyn PeerConnectionFactory>,
    media_source: Arc<dyn MediaSource>,
    admission: RoomAdmission,

    state: Mutex<SessionState>,
    channel: Mutex<Option<Arc<SignalChannel>>>,
    coordinator: Mutex<Option<Arc<NegotiationCoordinator>>>,
    media: Mutex<Option<MediaTrackController>>,
    connected_at: Mutex<Option<DateTime<Utc>>>,
    self_name: Mutex<Option<String>>,
    peer_name: Mutex<Option<String>>,
    events: EventBus,
}

impl CallSession {
    pub fn new(
        room_id: RoomId,
        config: SessionConfig,
        http: Arc<dyn HttpClient>,
        transport_factory: Arc<dyn TransportFactory>,
        peer_factory: Arc<dyn PeerConnectionFactory>,
        media_source: Arc<dyn MediaSource>,
    ) -> Arc<Self> {
        let credentials: Arc<dyn CredentialProvider> = Arc::new(HttpCredentialProvider::new(
            http.clone(),
            config.token_url.clone(),
        ));
        let admission = RoomAdmission::new(http, config.room_create_url.clone());
        Arc::new(Self {
            room_id,
            config,
            credentials,
            transport_factory,
            peer_factory,
            media_source,
            admission,
            state: Mutex::new(SessionState::Idle),
            channel: Mutex::new(None),
            coordinator: Mutex::new(None),
            media: Mutex::new(None),
            connected_at: Mutex::new(None),
            self_name: Mutex::new(None),
            peer_name: Mutex::new(None),
            events: EventBus::new(),
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    pub async fn negotiation_role(&self) -> NegotiationRole {
        match self.coordinator.lock().await.as_ref() {
            Some(coordinator) => coordinator.role().await,
            None => NegotiationRole::Undetermined,
        }
    }

    /// Peer-connection negotiation state, for observers. `Closed` once the
    /// session has ended or before it started.
    pub async fn peer_connection_state(&self) -> PeerConnectionState {
        match self.coordinator.lock().await.as_ref() {
            Some(coordinator) => coordinator.pc_state().await,
            None => PeerConnectionState::Closed,
        }
    }

    pub async fn self_name(&self) -> Option<String> {
        self.self_name.lock().await.clone()
    }

    pub async fn peer_name(&self) -> Option<String> {
        self.peer_name.lock().await.clone()
    }

    pub async fn local_media(&self) -> Option<LocalMediaState> {
        self.media.lock().await.as_ref().map(|m| m.state())
    }

    /// Creates the room on the admission service.
    ///
    /// A rejection is user-facing and leaves the session alive so the user
    /// can retry with corrected input; it is never retried automatically.
    pub async fn create_room(&self, password: &str) -> Result<(), CallError> {
        if password.trim().is_empty() {
            return Err(CallError::RoomCreationFailed("password required".into()));
        }
        {
            let state = self.state.lock().await;
            match &*state {
                SessionState::Idle | SessionState::RoomPending { joined: false, .. } => {}
                other => return Err(CallError::InvalidState(format!("{other:?}"))),
            }
        }

        self.admission
            .create_room(&RoomCredentials {
                room_id: self.room_id.clone(),
                password: password.to_string(),
            })
            .await?;

        let mut state = self.state.lock().await;
        if matches!(
            *state,
            SessionState::Idle | SessionState::RoomPending { .. }
        ) {
            *state = SessionState::RoomPending {
                created: true,
                joined: false,
            };
        }
        Ok(())
    }

    /// Joins the call: resolves the credential, connects the signaling
    /// channel, acquires local media, emits the join request, and announces
    /// readiness to negotiate.
    ///
    /// Any failure along the way ends the session with a terminal reason;
    /// retrying means creating a new session.
    pub async fn join_call(self: &Arc<Self>, password: &str) -> Result<(), CallError> {
        if password.trim().is_empty() {
            return Err(CallError::RoomJoinRejected("password required".into()));
        }

        let created = {
            let mut state = self.state.lock().await;
            let created = match &*state {
                SessionState::Idle => false,
                SessionState::RoomPending {
                    created,
                    joined: false,
                } => *created,
                other => return Err(CallError::InvalidState(format!("{other:?}"))),
            };
            *state = SessionState::Authenticating;
            created
        };

        // Credential first: without it the channel is never dialed.
        let credential = match self.credentials.acquire().await {
            Ok(credential) => credential,
            Err(e) => return Err(self.fail_start(e.into()).await),
        };

        let connect = SignalChannel::connect(
            self.transport_factory.as_ref(),
            &self.config.signal_url,
            &credential,
            self.room_id.clone(),
        )
        .await;
        let (channel, channel_rx) = match connect {
            Ok(pair) => pair,
            Err(e) => {
                let err = CallError::ConnectionRefused(e.to_string());
                return Err(self.fail_start(err).await);
            }
        };
        *self.channel.lock().await = Some(channel.clone());

        let (pc, pc_rx) = match self.peer_factory.create(&self.config.ice_servers).await {
            Ok(pair) => pair,
            Err(e) => {
                let err = CallError::NegotiationFailed(format!("peer connection setup: {e}"));
                return Err(self.fail_start(err).await);
            }
        };

        // Local media before the join request: a denied capture must not
        // leave a half-joined room behind.
        let controller =
            match MediaTrackController::acquire(self.media_source.as_ref(), &self.config.media)
                .await
            {
                Ok(controller) => controller,
                Err(e) => {
                    pc.close().await;
                    return Err(self.fail_start(e.into()).await);
                }
            };
        if let Err(e) = controller.attach(pc.as_ref()).await {
            pc.close().await;
            let err = CallError::NegotiationFailed(format!("track attach: {e}"));
            return Err(self.fail_start(err).await);
        }
        *self.media.lock().await = Some(controller);

        let coordinator = Arc::new(NegotiationCoordinator::new(
            self.room_id.clone(),
            channel.clone(),
            pc,
        ));
        *self.coordinator.lock().await = Some(coordinator.clone());

        let join = self
            .admission
            .join_room(
                &RoomCredentials {
                    room_id: self.room_id.clone(),
                    password: password.to_string(),
                },
                &channel,
            )
            .await;
        if let Err(e) = join {
            return Err(self.fail_start(CallError::from(e)).await);
        }

        if let Err(e) = coordinator.announce_ready().await {
            return Err(self.fail_start(CallError::from(e)).await);
        }

        // end_call() may race the join; an ended session must stay ended.
        let ended_meanwhile = {
            let mut state = self.state.lock().await;
            if state.is_ended() {
                true
            } else {
                *state = SessionState::RoomPending {
                    created,
                    joined: true,
                };
                false
            }
        };
        if ended_meanwhile {
            if let Some(coordinator) = self.coordinator.lock().await.take() {
                coordinator.shutdown().await;
            }
            if let Some(mut controller) = self.media.lock().await.take() {
                controller.release();
            }
            if let Some(channel) = self.channel.lock().await.take() {
                channel.close().await;
            }
            return Err(CallError::InvalidState("session already ended".into()));
        }
        info!("join emitted for room {}; awaiting relay", self.room_id);

        tokio::spawn(Self::run_event_loop(
            self.clone(),
            coordinator,
            channel_rx,
            pc_rx,
        ));
        Ok(())
    }

    /// Flips the microphone without renegotiation.
    pub async fn toggle_mic(&self) -> Result<bool, CallError> {
        let mut media = self.media.lock().await;
        let controller = media
            .as_mut()
            .ok_or_else(|| CallError::InvalidState("no local media".into()))?;
        let enabled = controller.toggle_audio();
        let _ = self.events.media_toggled.send(Arc::new(MediaToggled {
            kind: TrackKind::Audio,
            enabled,
        }));
        Ok(enabled)
    }

    /// Flips the camera without renegotiation.
    pub async fn toggle_camera(&self) -> Result<bool, CallError> {
        let mut media = self.media.lock().await;
        let controller = media
            .as_mut()
            .ok_or_else(|| CallError::InvalidState("no local media".into()))?;
        let enabled = controller.toggle_video();
        let _ = self.events.media_toggled.send(Arc::new(MediaToggled {
            kind: TrackKind::Video,
            enabled,
        }));
        Ok(enabled)
    }

    /// The only clean exit. Signals the peer, closes the peer connection,
    /// releases local media, and closes the channel. Safe from any state;
    /// repeated calls are no-ops.
    pub async fn end_call(&self) {
        self.teardown(EndReason::LocalHangup, true).await;
    }

    async fn fail_start(&self, err: CallError) -> CallError {
        self.teardown(EndReason::Failed(err.clone()), false).await;
        err
    }

    /// Tears everything down exactly once. A remote `call-ended` reaches
    /// this with `emit_end_signal = false` so the signal is not echoed back.
    async fn teardown(&self, reason: EndReason, emit_end_signal: bool) {
        {
            let mut state = self.state.lock().await;
            if state.is_ended() {
                debug!("ignoring duplicate teardown ({reason})");
                return;
            }
            *state = SessionState::Ended { at: Utc::now() };
        }
        info!("session for room {} ending: {}", self.room_id, reason);

        if emit_end_signal
            && let Some(channel) = self.channel.lock().await.as_ref()
        {
            // Best-effort: the peer may already be gone.
            let _ = channel
                .send(&SignalingMessage::EndCall {
                    room_id: self.room_id.clone(),
                })
                .await;
        }

        if let Some(coordinator) = self.coordinator.lock().await.take() {
            coordinator.shutdown().await;
        }
        if let Some(mut controller) = self.media.lock().await.take() {
            controller.release();
        }
        if let Some(channel) = self.channel.lock().await.take() {
            channel.close().await;
        }

        let duration_secs = self
            .connected_at
            .lock()
            .await
            .map(|t| Utc::now().signed_duration_since(t).num_seconds());
        let _ = self.events.session_ended.send(Arc::new(SessionEnded {
            reason,
            duration_secs,
        }));
    }

    /// Join success has no ack; the first relay evidence of membership
    /// moves the session into `InCall`.
    async fn mark_in_call(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, SessionState::RoomPending { joined: true, .. }) {
            *state = SessionState::InCall {
                joined_at: Utc::now(),
            };
            info!("room {} confirmed; in call", self.room_id);
        }
    }

    /// Returns true when the event loop should stop.
    async fn handle_progress(&self, progress: NegotiationProgress) -> bool {
        match progress {
            NegotiationProgress::Unchanged => false,
            NegotiationProgress::Connected => {
                *self.connected_at.lock().await = Some(Utc::now());
                let role = self.negotiation_role().await;
                let _ = self.events.connected.send(Arc::new(CallConnected {
                    room_id: self.room_id.clone(),
                    role,
                }));
                false
            }
            NegotiationProgress::Ended => {
                self.teardown(EndReason::RemoteHangup, false).await;
                true
            }
        }
    }

    /// Returns true when the event loop should stop.
    async fn handle_signal(
        &self,
        coordinator: &NegotiationCoordinator,
        msg: SignalingMessage,
    ) -> bool {
        match msg {
            SignalingMessage::JoinError { message } => {
                // Must be surfaced, never swallowed.
                self.teardown(
                    EndReason::Failed(CallError::RoomJoinRejected(message)),
                    false,
                )
                .await;
                true
            }
            SignalingMessage::SelfIdentity { name } => {
                self.mark_in_call().await;
                *self.self_name.lock().await = Some(name.clone());
                let _ = self
                    .events
                    .self_identity
                    .send(Arc::new(IdentityUpdate { name }));
                false
            }
            SignalingMessage::PeerIdentity { name } => {
                self.mark_in_call().await;
                *self.peer_name.lock().await = Some(name.clone());
                let _ = self
                    .events
                    .peer_identity
                    .send(Arc::new(IdentityUpdate { name }));
                false
            }
            other => {
                self.mark_in_call().await;
                match coordinator.handle_message(&other).await {
                    Ok(progress) => self.handle_progress(progress).await,
                    Err(e) => {
                        self.teardown(EndReason::Failed(CallError::from(e)), false)
                            .await;
                        true
                    }
                }
            }
        }
    }

    async fn run_event_loop(
        session: Arc<Self>,
        coordinator: Arc<NegotiationCoordinator>,
        mut channel_rx: mpsc::Receiver<ChannelEvent>,
        mut pc_rx: mpsc::Receiver<PeerConnectionEvent>,
    ) {
        let mut channel_open = true;
        let mut pc_open = true;

        loop {
            if session.state.lock().await.is_ended() {
                break;
            }

            tokio::select! {
                ev = channel_rx.recv(), if channel_open => match ev {
                    Some(ChannelEvent::Message(msg)) => {
                        if session.handle_signal(&coordinator, msg).await {
                            break;
                        }
                    }
                    Some(ChannelEvent::Disconnected) | None => {
                        // Media flows peer-to-peer; losing the relay after
                        // setup is survivable.
                        warn!("signaling channel lost for room {}", session.room_id);
                        channel_open = false;
                    }
                },
                ev = pc_rx.recv(), if pc_open => match ev {
                    Some(event) => match coordinator.handle_peer_event(event).await {
                        Ok(progress) => {
                            if session.handle_progress(progress).await {
                                break;
                            }
                        }
                        Err(e) => {
                            session
                                .teardown(EndReason::Failed(CallError::from(e)), false)
                                .await;
                            break;
                        }
                    },
                    None => pc_open = false,
                },
                else => break,
            }
        }
        debug!("event loop for room {} exited", session.room_id);
    }
}
