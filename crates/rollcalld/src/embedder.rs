//! Binding to the external face-embedding service.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use rollcall_core::store::{EmbedError, EmbeddingProvider};
use rollcall_core::Embedding;

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    error: Option<String>,
}

/// Talks to a sidecar embedding service: `POST {base}/embed` with
/// `{"image": "<base64>"}`, answered by `{"embedding": [..]}` or an
/// error body naming `no_face_detected`.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEmbedder {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, image: &[u8]) -> Result<Embedding, EmbedError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&serde_json::json!({ "image": encoded }))
            .send()
            .await
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;

        if let Some(values) = body.embedding {
            return Ok(Embedding::new(values));
        }
        match body.error.as_deref() {
            Some("no_face_detected") => Err(EmbedError::NoFace),
            Some(other) => Err(EmbedError::Unavailable(other.to_string())),
            None => Err(EmbedError::Unavailable(format!(
                "embedding service returned {status} without a vector"
            ))),
        }
    }
}
