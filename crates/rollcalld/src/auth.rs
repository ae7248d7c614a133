//! Caller identity verification seam.
//!
//! Token verification itself is an external concern; the daemon only
//! needs claims back. Two bindings: a remote verifier service and a
//! static shared secret for single-box deployments.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid or expired token")]
    Invalid,
    #[error("token verifier unavailable: {0}")]
    Unavailable(String),
}

/// Claims extracted from a verified bearer token.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// Verifies tokens against an external verifier endpoint.
///
/// Expects the endpoint to answer `POST {url}` with `{"token": ...}` and
/// return claims JSON on 200, anything else meaning invalid.
pub struct HttpTokenVerifier {
    client: reqwest::Client,
    verify_url: String,
}

impl HttpTokenVerifier {
    pub fn new(verify_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            verify_url,
        }
    }
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let response = self
            .client
            .post(&self.verify_url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Invalid);
        }
        response
            .json::<Claims>()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))
    }
}

/// Compares the bearer token against a configured shared secret.
pub struct StaticTokenVerifier {
    token: String,
}

impl StaticTokenVerifier {
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        if token == self.token {
            Ok(Claims {
                uid: "local-operator".to_string(),
                email: None,
            })
        } else {
            Err(AuthError::Invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_verifier_accepts_matching_token() {
        let verifier = StaticTokenVerifier::new("s3cret".into());
        let claims = verifier.verify("s3cret").await.unwrap();
        assert_eq!(claims.uid, "local-operator");
    }

    #[tokio::test]
    async fn test_static_verifier_rejects_wrong_token() {
        let verifier = StaticTokenVerifier::new("s3cret".into());
        assert!(matches!(
            verifier.verify("nope").await,
            Err(AuthError::Invalid)
        ));
    }
}
