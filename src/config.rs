use crate::media::MediaConstraints;

/// Static configuration for a call session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// WebSocket endpoint of the signaling relay.
    pub signal_url: String,
    /// HTTP endpoint returning the signaling credential for the ambient
    /// browser/service session.
    pub token_url: String,
    /// HTTP endpoint for room creation.
    pub room_create_url: String,
    /// ICE servers handed to the peer-connection engine.
    pub ice_servers: Vec<String>,
    /// Capture constraints for local media acquisition.
    pub media: MediaConstraints,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signal_url: String::new(),
            token_url: "/api/socket/token".to_string(),
            room_create_url: "/api/video/create".to_string(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            media: MediaConstraints::default(),
        }
    }
}
