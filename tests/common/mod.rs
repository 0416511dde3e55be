//! Shared test doubles: an in-memory signaling relay, a scripted
//! peer-connection engine, a fake media source, and a scripted HTTP client.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, mpsc};

use roomcall::auth::Credential;
use roomcall::media::{MediaConstraints, MediaError, MediaSource, MediaTrack, TrackKind};
use roomcall::net::{HttpClient, HttpRequest, HttpResponse};
use roomcall::peer::{
    IceCandidate, PeerConnection, PeerConnectionEvent, PeerConnectionFactory, PeerConnectionState,
    SessionDescription,
};
use roomcall::signaling::SignalingMessage;
use roomcall::socket::{Transport, TransportEvent, TransportFactory};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ==================== Signaling relay ====================

struct PeerSlot {
    name: String,
    tx: mpsc::Sender<TransportEvent>,
    joined: bool,
    connected: bool,
}

struct RelayInner {
    password: String,
    refuse_connections: std::sync::atomic::AtomicBool,
    connection_count: AtomicUsize,
    peers: Mutex<Vec<PeerSlot>>,
    received: Mutex<Vec<SignalingMessage>>,
}

/// In-memory stand-in for the signaling relay server: password-checked
/// joins, identity announcements, and room-scoped forwarding to the other
/// member. Delivery is best-effort — frames for an absent peer are dropped.
#[derive(Clone)]
pub struct MockRelay {
    inner: Arc<RelayInner>,
}

impl MockRelay {
    pub fn new(password: &str) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                password: password.to_string(),
                refuse_connections: std::sync::atomic::AtomicBool::new(false),
                connection_count: AtomicUsize::new(0),
                peers: Mutex::new(Vec::new()),
                received: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A transport factory registering under the given display name.
    pub fn factory(&self, display_name: &str) -> RelayTransportFactory {
        RelayTransportFactory {
            inner: self.inner.clone(),
            display_name: display_name.to_string(),
        }
    }

    pub fn refuse_connections(&self) {
        self.inner
            .refuse_connections
            .store(true, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connection_count.load(Ordering::SeqCst)
    }

    /// Every message the relay has received, in arrival order.
    pub async fn received(&self) -> Vec<SignalingMessage> {
        self.inner.received.lock().await.clone()
    }

    pub async fn count_received(&self, kind: &str) -> usize {
        self.inner
            .received
            .lock()
            .await
            .iter()
            .filter(|m| m.kind() == kind)
            .count()
    }
}

impl RelayInner {
    async fn deliver(&self, to: usize, msg: SignalingMessage) {
        let tx = {
            let peers = self.peers.lock().await;
            let slot = &peers[to];
            if !slot.connected {
                return;
            }
            slot.tx.clone()
        };
        let frame = msg.to_frame().expect("relay frames always encode");
        let _ = tx.send(TransportEvent::FrameReceived(frame)).await;
    }

    async fn other_joined(&self, from: usize) -> Option<usize> {
        let peers = self.peers.lock().await;
        peers
            .iter()
            .enumerate()
            .find(|(i, p)| *i != from && p.joined)
            .map(|(i, _)| i)
    }

    async fn handle_frame(&self, from: usize, frame: &str) {
        let msg = match SignalingMessage::from_frame(frame) {
            Ok(msg) => msg,
            Err(_) => return,
        };
        self.received.lock().await.push(msg.clone());

        match msg {
            SignalingMessage::JoinVideoRoom { password, .. } => {
                if password != self.password {
                    self.deliver(
                        from,
                        SignalingMessage::JoinError {
                            message: "Invalid room password".to_string(),
                        },
                    )
                    .await;
                    return;
                }

                let (self_name, other) = {
                    let mut peers = self.peers.lock().await;
                    peers[from].joined = true;
                    let self_name = peers[from].name.clone();
                    let other = peers
                        .iter()
                        .enumerate()
                        .find(|(i, p)| *i != from && p.joined)
                        .map(|(i, p)| (i, p.name.clone()));
                    (self_name, other)
                };

                self.deliver(
                    from,
                    SignalingMessage::SelfIdentity {
                        name: self_name.clone(),
                    },
                )
                .await;
                if let Some((other_idx, other_name)) = other {
                    self.deliver(from, SignalingMessage::PeerIdentity { name: other_name })
                        .await;
                    self.deliver(
                        other_idx,
                        SignalingMessage::PeerIdentity { name: self_name },
                    )
                    .await;
                }
            }
            SignalingMessage::EndCall { .. } => {
                if let Some(other) = self.other_joined(from).await {
                    self.deliver(other, SignalingMessage::CallEnded).await;
                }
            }
            forwarded @ (SignalingMessage::Offer { .. }
            | SignalingMessage::Answer { .. }
            | SignalingMessage::IceCandidate { .. }
            | SignalingMessage::PeerReady { .. }) => {
                if let Some(other) = self.other_joined(from).await {
                    self.deliver(other, forwarded).await;
                }
            }
            _ => {}
        }
    }
}

pub struct RelayTransportFactory {
    inner: Arc<RelayInner>,
    display_name: String,
}

#[async_trait]
impl TransportFactory for RelayTransportFactory {
    async fn connect(
        &self,
        _url: &str,
        _credential: &Credential,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        if self.inner.refuse_connections.load(Ordering::SeqCst) {
            anyhow::bail!("relay unreachable");
        }
        self.inner.connection_count.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(100);
        let id = {
            let mut peers = self.inner.peers.lock().await;
            peers.push(PeerSlot {
                name: self.display_name.clone(),
                tx: tx.clone(),
                joined: false,
                connected: true,
            });
            peers.len() - 1
        };
        let _ = tx.send(TransportEvent::Connected).await;

        Ok((
            Arc::new(RelayTransport {
                inner: self.inner.clone(),
                id,
            }),
            rx,
        ))
    }
}

struct RelayTransport {
    inner: Arc<RelayInner>,
    id: usize,
}

#[async_trait]
impl Transport for RelayTransport {
    async fn send_frame(&self, frame: &str) -> Result<(), anyhow::Error> {
        self.inner.handle_frame(self.id, frame).await;
        Ok(())
    }

    async fn disconnect(&self) {
        let tx = {
            let mut peers = self.inner.peers.lock().await;
            peers[self.id].connected = false;
            peers[self.id].joined = false;
            peers[self.id].tx.clone()
        };
        let _ = tx.send(TransportEvent::Disconnected).await;
    }
}

/// Factory that only records outbound frames, for driving a coordinator by
/// hand without a peer.
pub struct RecordingTransportFactory {
    sent: Arc<Mutex<Vec<SignalingMessage>>>,
    // Keeps the event channel open so the channel pump stays idle.
    keepalive: StdMutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl RecordingTransportFactory {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            keepalive: StdMutex::new(None),
        }
    }

    pub async fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn last_offer(&self) -> Option<SignalingMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|m| m.kind() == "offer")
            .cloned()
    }
}

#[async_trait]
impl TransportFactory for RecordingTransportFactory {
    async fn connect(
        &self,
        _url: &str,
        _credential: &Credential,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let (tx, rx) = mpsc::channel(100);
        *self.keepalive.lock().unwrap() = Some(tx);
        Ok((
            Arc::new(RecordingTransport {
                sent: self.sent.clone(),
            }),
            rx,
        ))
    }
}

struct RecordingTransport {
    sent: Arc<Mutex<Vec<SignalingMessage>>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_frame(&self, frame: &str) -> Result<(), anyhow::Error> {
        let msg = SignalingMessage::from_frame(frame)?;
        self.sent.lock().await.push(msg);
        Ok(())
    }

    async fn disconnect(&self) {}
}

// ==================== Peer connection engine ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    CreateOffer,
    CreateAnswer,
    SetRemoteDescription,
}

#[derive(Default)]
struct PcInner {
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    candidates: Vec<IceCandidate>,
    tracks: Vec<MediaTrack>,
    closed: bool,
    candidates_emitted: bool,
    connected_emitted: bool,
}

/// Scripted engine: hands out mock SDP, emits its planned local candidates
/// after the local description is set, and reports connectivity once both
/// descriptions are in place. Candidates whose payload contains
/// `"reject-me"` are refused, to exercise partial-failure tolerance.
pub struct MockPeerConnection {
    name: String,
    events_tx: mpsc::Sender<PeerConnectionEvent>,
    auto_connect: bool,
    candidate_count: usize,
    fail_point: Option<FailPoint>,
    inner: StdMutex<PcInner>,
}

impl MockPeerConnection {
    pub fn new(
        name: &str,
        events_tx: mpsc::Sender<PeerConnectionEvent>,
        auto_connect: bool,
        candidate_count: usize,
        fail_point: Option<FailPoint>,
    ) -> Self {
        Self {
            name: name.to_string(),
            events_tx,
            auto_connect,
            candidate_count,
            fail_point,
            inner: StdMutex::new(PcInner::default()),
        }
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.inner.lock().unwrap().candidates.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.inner.lock().unwrap().local_description.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.lock().unwrap().remote_description.clone()
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.inner.lock().unwrap().tracks.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    fn emit_candidates_and_maybe_connect(&self) {
        let mut inner = self.inner.lock().unwrap();

        if inner.local_description.is_some() && !inner.candidates_emitted {
            inner.candidates_emitted = true;
            for i in 0..self.candidate_count {
                let _ = self
                    .events_tx
                    .try_send(PeerConnectionEvent::IceCandidate(IceCandidate {
                        candidate: format!(
                            "candidate:{} {i} UDP 2122252543 198.51.100.1 4{i:04} typ host",
                            self.name
                        ),
                        sdp_mid: Some("0".to_string()),
                        sdp_m_line_index: Some(0),
                    }));
            }
        }

        if self.auto_connect
            && inner.local_description.is_some()
            && inner.remote_description.is_some()
            && !inner.connected_emitted
        {
            inner.connected_emitted = true;
            let _ = self
                .events_tx
                .try_send(PeerConnectionEvent::StateChanged(
                    PeerConnectionState::Connected,
                ));
        }
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, anyhow::Error> {
        if self.fail_point == Some(FailPoint::CreateOffer) {
            anyhow::bail!("create-offer failure injected");
        }
        Ok(SessionDescription::offer(format!(
            "v=0\r\no={} 0 0 IN IP4 198.51.100.1\r\n",
            self.name
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, anyhow::Error> {
        if self.fail_point == Some(FailPoint::CreateAnswer) {
            anyhow::bail!("create-answer failure injected");
        }
        Ok(SessionDescription::answer(format!(
            "v=0\r\no={} 0 1 IN IP4 198.51.100.1\r\n",
            self.name
        )))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), anyhow::Error> {
        self.inner.lock().unwrap().local_description = Some(desc);
        self.emit_candidates_and_maybe_connect();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), anyhow::Error> {
        if self.fail_point == Some(FailPoint::SetRemoteDescription) {
            anyhow::bail!("set-remote-description failure injected");
        }
        self.inner.lock().unwrap().remote_description = Some(desc);
        self.emit_candidates_and_maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), anyhow::Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            anyhow::bail!("peer connection is closed");
        }
        if candidate.candidate.contains("reject-me") {
            anyhow::bail!("unsupported candidate");
        }
        inner.candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: MediaTrack) -> Result<(), anyhow::Error> {
        self.inner.lock().unwrap().tracks.push(track);
        Ok(())
    }

    async fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }
}

pub struct MockPeerConnectionFactory {
    pub auto_connect: bool,
    pub candidate_count: usize,
    pub fail_point: Option<FailPoint>,
    counter: AtomicUsize,
    created: StdMutex<Vec<Arc<MockPeerConnection>>>,
}

impl Default for MockPeerConnectionFactory {
    fn default() -> Self {
        Self {
            auto_connect: true,
            candidate_count: 2,
            fail_point: None,
            counter: AtomicUsize::new(0),
            created: StdMutex::new(Vec::new()),
        }
    }
}

impl MockPeerConnectionFactory {
    pub fn last(&self) -> Option<Arc<MockPeerConnection>> {
        self.created.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerConnectionFactory {
    async fn create(
        &self,
        _ice_servers: &[String],
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::Receiver<PeerConnectionEvent>), anyhow::Error>
    {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(100);
        let pc = Arc::new(MockPeerConnection::new(
            &format!("pc-{n}"),
            tx,
            self.auto_connect,
            self.candidate_count,
            self.fail_point,
        ));
        self.created.lock().unwrap().push(pc.clone());
        Ok((pc, rx))
    }
}

// ==================== Media source ====================

#[derive(Default)]
pub struct MockMediaSource {
    pub deny: bool,
}

#[async_trait]
impl MediaSource for MockMediaSource {
    async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Vec<MediaTrack>, MediaError> {
        if self.deny {
            return Err(MediaError::AccessDenied("permission dismissed".into()));
        }
        let mut tracks = vec![MediaTrack::new("mic-0", TrackKind::Audio)];
        if constraints.video {
            tracks.push(MediaTrack::new("cam-0", TrackKind::Video));
        }
        Ok(tracks)
    }
}

// ==================== HTTP client ====================

/// Routes token and room-create requests to canned responses.
pub struct ScriptedHttpClient {
    pub token_response: (u16, String),
    pub create_response: (u16, String),
}

impl ScriptedHttpClient {
    /// Authenticated, room creation succeeds.
    pub fn ok() -> Self {
        Self {
            token_response: (200, r#"{"token":"tok-test"}"#.to_string()),
            create_response: (200, r#"{"success":true}"#.to_string()),
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            token_response: (401, r#"{"token":null}"#.to_string()),
            ..Self::ok()
        }
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        let (status, body) = if request.url.contains("token") {
            &self.token_response
        } else {
            &self.create_response
        };
        Ok(HttpResponse {
            status_code: *status,
            body: body.as_bytes().to_vec(),
        })
    }
}
