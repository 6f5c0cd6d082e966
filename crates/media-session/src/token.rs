//! Access token retrieval
//!
//! The HTTP provider speaks the sandbox token-server protocol: one
//! `POST {endpoint}?roomName={room}` with an empty JSON object as body and an
//! optional `X-Sandbox-ID` header. The response carries `participantToken` and
//! optionally the `serverUrl` to connect to.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};

pub const SANDBOX_HEADER: &str = "X-Sandbox-ID";

/// What the token server hands back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    pub participant_token: String,
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub participant_name: Option<String>,
}

impl ConnectionDetails {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            participant_token: token.into(),
            server_url: None,
            room_name: None,
            participant_name: None,
        }
    }
}

/// Source of room access tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn retrieve_token(&self, room_name: &str) -> SessionResult<ConnectionDetails>;
}

/// Token server over HTTP
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
    client: reqwest::Client,
    endpoint: String,
    sandbox_id: Option<String>,
}

impl HttpTokenProvider {
    pub fn new(
        endpoint: impl Into<String>,
        sandbox_id: Option<String>,
        timeout: Duration,
    ) -> SessionResult<Self> {
        let endpoint = endpoint.into();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(SessionError::invalid_config(
                "token_server_url",
                format!("expected http:// or https:// url, got {:?}", endpoint),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            sandbox_id,
        })
    }

    pub fn from_config(config: &SessionConfig) -> SessionResult<Self> {
        Self::new(
            config.token_server_url.clone(),
            config.sandbox_id.clone(),
            config.token_timeout(),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn retrieve_token(&self, room_name: &str) -> SessionResult<ConnectionDetails> {
        debug!(endpoint = %self.endpoint, room = room_name, "Requesting access token");

        let mut request = self
            .client
            .post(&self.endpoint)
            .query(&[("roomName", room_name)])
            .header(CONTENT_TYPE, "application/json")
            .body("{}");
        if let Some(sandbox_id) = &self.sandbox_id {
            request = request.header(SANDBOX_HEADER, sandbox_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::token_retrieval(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "Token server returned an error");
            return Err(SessionError::token_retrieval(format!(
                "token server returned {}",
                status
            )));
        }

        let details: ConnectionDetails = response
            .json()
            .await
            .map_err(|e| SessionError::token_retrieval(format!("malformed response: {}", e)))?;
        if details.participant_token.is_empty() {
            return Err(SessionError::token_retrieval("empty participantToken"));
        }

        info!(room = room_name, server_url = ?details.server_url, "Access token retrieved");
        Ok(details)
    }
}

/// Fixed token, e.g. from the command line
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    details: ConnectionDetails,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            details: ConnectionDetails::new(token),
        }
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.details.server_url = Some(url.into());
        self
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn retrieve_token(&self, _room_name: &str) -> SessionResult<ConnectionDetails> {
        if self.details.participant_token.is_empty() {
            return Err(SessionError::token_retrieval("no token configured"));
        }
        Ok(self.details.clone())
    }
}
