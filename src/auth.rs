//! Credential acquisition for the signaling channel.
//!
//! The auth service is a black box: one request with the ambient session
//! cookie either yields an opaque token or fails closed. The crate never
//! retries; an unauthenticated session cannot be started.

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::net::{HttpClient, HttpRequest};

/// Opaque signaling credential. Never persisted, never logged.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("auth service unreachable: {0}")]
    Http(String),
}

/// Resolves the signaling credential exactly once per session.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self) -> Result<Credential, AuthError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

/// Fetches the credential from the token endpoint with the ambient cookie.
pub struct HttpCredentialProvider {
    http: Arc<dyn HttpClient>,
    token_url: String,
    cookie: Option<String>,
}

impl HttpCredentialProvider {
    pub fn new(http: Arc<dyn HttpClient>, token_url: impl Into<String>) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            cookie: None,
        }
    }

    /// Attaches a session cookie forwarded with the token request.
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn acquire(&self) -> Result<Credential, AuthError> {
        let mut request = HttpRequest::get(&self.token_url);
        if let Some(cookie) = &self.cookie {
            request = request.with_header("Cookie", cookie.clone());
        }

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;

        if !response.is_success() {
            return Err(AuthError::Unauthenticated(format!(
                "token endpoint returned status {}",
                response.status_code
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .map_err(|e| AuthError::Unauthenticated(format!("malformed token response: {e}")))?;

        match parsed.token {
            Some(token) if !token.is_empty() => {
                debug!("acquired signaling credential");
                Ok(Credential::new(token))
            }
            _ => Err(AuthError::Unauthenticated(
                "no session token present".to_string(),
            )),
        }
    }
}
