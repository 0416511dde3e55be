//! Room admission: creation against the room service and the
//! fire-and-forget join over the signaling channel.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::net::{HttpClient, HttpRequest};
use crate::signaling::SignalingMessage;
use crate::socket::SignalChannel;
use crate::types::RoomId;

/// Identifies and guards one room. The password is used for the admission
/// call and never stored beyond it.
#[derive(Debug, Clone)]
pub struct RoomCredentials {
    pub room_id: RoomId,
    pub password: String,
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room creation failed: {0}")]
    CreationFailed(String),

    #[error("room service unreachable: {0}")]
    Http(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomBody<'a> {
    room_id: &'a RoomId,
    password: &'a str,
}

#[derive(Deserialize)]
struct AdmissionResponse {
    success: bool,
    message: Option<String>,
}

/// Client for the room admission boundary.
pub struct RoomAdmission {
    http: Arc<dyn HttpClient>,
    create_url: String,
}

impl RoomAdmission {
    pub fn new(http: Arc<dyn HttpClient>, create_url: impl Into<String>) -> Self {
        Self {
            http,
            create_url: create_url.into(),
        }
    }

    /// Creates the room on the external service ("create if absent" intent).
    ///
    /// Effectful; the caller must not retry automatically — the service may
    /// reject duplicate creation and the failure is user-facing.
    pub async fn create_room(&self, credentials: &RoomCredentials) -> Result<(), RoomError> {
        let body = serde_json::to_vec(&CreateRoomBody {
            room_id: &credentials.room_id,
            password: &credentials.password,
        })
        .map_err(|e| RoomError::Http(e.to_string()))?;

        let response = self
            .http
            .execute(HttpRequest::post(&self.create_url).with_json_body(body))
            .await
            .map_err(|e| RoomError::Http(e.to_string()))?;

        if !response.is_success() {
            return Err(RoomError::CreationFailed(format!(
                "room service returned status {}",
                response.status_code
            )));
        }

        let parsed: AdmissionResponse = response
            .json()
            .map_err(|e| RoomError::CreationFailed(format!("malformed admission response: {e}")))?;

        if !parsed.success {
            return Err(RoomError::CreationFailed(
                parsed.message.unwrap_or_else(|| "rejected".to_string()),
            ));
        }

        info!("room {} created", credentials.room_id);
        Ok(())
    }

    /// Emits the join request over the signaling channel.
    ///
    /// Fire-and-forget by protocol design: there is no success ack. Success
    /// is confirmed implicitly by later negotiation or identity messages;
    /// failure arrives as a `join-error` frame. Callers must not block
    /// waiting for an acknowledgment.
    pub async fn join_room(
        &self,
        credentials: &RoomCredentials,
        channel: &SignalChannel,
    ) -> Result<(), crate::socket::SocketError> {
        debug!("joining room {}", credentials.room_id);
        channel
            .send(&SignalingMessage::JoinVideoRoom {
                room_id: credentials.room_id.clone(),
                password: credentials.password.clone(),
            })
            .await
    }
}
