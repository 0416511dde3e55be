//! Local media acquisition and mute/unmute control.
//!
//! Toggling flips the track's enabled flag without renegotiation or
//! re-acquisition; the remote decoder observes silence/black frames, not
//! track removal.

use async_trait::async_trait;
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::peer::PeerConnection;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media access denied: {0}")]
    AccessDenied(String),

    #[error("local media already released")]
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Handle to one captured track. Clones share the same enabled flag, so a
/// toggle is observed immediately by every holder, including the transport.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Stops capture for good. A stopped track cannot be re-enabled.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Audio capture settings requested from the device layer.
#[derive(Debug, Clone)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub channel_count: u16,
    pub sample_rate: u32,
    /// Hint handed to the encoder ("speech" for voice calls).
    pub content_hint: Option<String>,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
            channel_count: 1,
            sample_rate: 48_000,
            content_hint: Some("speech".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: AudioConstraints,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: AudioConstraints::default(),
        }
    }
}

/// Device boundary that captures local tracks.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Vec<MediaTrack>, MediaError>;
}

/// Snapshot of the local mute state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMediaState {
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

/// Owns the captured tracks for one session and applies toggles to them.
///
/// Negotiation logic never mutates this; only explicit toggle calls do.
pub struct MediaTrackController {
    tracks: Vec<MediaTrack>,
    audio_enabled: bool,
    video_enabled: bool,
    released: bool,
}

impl MediaTrackController {
    pub async fn acquire(
        source: &dyn MediaSource,
        constraints: &MediaConstraints,
    ) -> Result<Self, MediaError> {
        let tracks = source.acquire(constraints).await?;
        debug!("acquired {} local media track(s)", tracks.len());
        Ok(Self {
            tracks,
            audio_enabled: true,
            video_enabled: true,
            released: false,
        })
    }

    /// Feeds every owned track into the peer connection.
    pub async fn attach(&self, pc: &dyn PeerConnection) -> Result<(), anyhow::Error> {
        for track in &self.tracks {
            pc.add_track(track.clone()).await?;
        }
        Ok(())
    }

    pub fn toggle_audio(&mut self) -> bool {
        self.audio_enabled = !self.audio_enabled;
        for track in self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio) {
            track.set_enabled(self.audio_enabled);
        }
        self.audio_enabled
    }

    pub fn toggle_video(&mut self) -> bool {
        self.video_enabled = !self.video_enabled;
        for track in self.tracks.iter().filter(|t| t.kind() == TrackKind::Video) {
            track.set_enabled(self.video_enabled);
        }
        self.video_enabled
    }

    pub fn state(&self) -> LocalMediaState {
        LocalMediaState {
            audio_enabled: self.audio_enabled,
            video_enabled: self.video_enabled,
        }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Stops every owned track. Safe to call more than once; only the first
    /// call has an effect.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for track in &self.tracks {
            track.stop();
        }
        debug!("released {} local media track(s)", self.tracks.len());
    }
}

impl Drop for MediaTrackController {
    fn drop(&mut self) {
        self.release();
    }
}
