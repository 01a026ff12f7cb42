//! Identity verification at the connection boundary.
//!
//! Every inbound connection carries a bearer credential that must be
//! verified against the identity service before any session state exists.
//! The service is an external collaborator; this module defines the
//! interface and the HTTP client used in production.

use async_trait::async_trait;
use serde::Deserialize;

/// The authenticated principal behind a connection or request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired credential")]
    InvalidToken,
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

/// Verifies bearer credentials against the identity service.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Identity-service client that validates tokens over HTTP.
pub struct HttpTokenVerifier {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTokenVerifier {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct IdentityResponse {
    user_id: String,
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let response = self
            .http
            .get(format!("{}/v1/identity", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidToken);
        }

        let body: IdentityResponse = response
            .error_for_status()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        Ok(Identity {
            user_id: body.user_id,
        })
    }
}
