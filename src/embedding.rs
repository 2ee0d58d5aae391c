//! Embedding provider abstraction.
//!
//! The pipeline treats embedding as an opaque capability: 1..N image paths go
//! in, one fixed-dimension vector per path comes out, order preserved. The
//! HTTP provider posts base64-encoded image bytes to a remote model endpoint.
//! Providers make a single attempt per call; retry policy lives in the queue
//! module, which classifies failures through [`EmbedError::is_retryable`].

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbeddingConfig;

/// HTTP statuses treated as transient by the retry state machine.
const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding API error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("embedding request failed: {0}")]
    Network(String),
    #[error("embedding provider error: {0}")]
    Provider(String),
}

impl EmbedError {
    /// Transient failures are retried with backoff by the queue; everything
    /// else goes straight to `failed_permanent`.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbedError::Http { status, .. } => RETRYABLE_STATUS_CODES.contains(status),
            EmbedError::Network(_) => true,
            EmbedError::Provider(_) => false,
        }
    }

    /// Short machine-readable code stored on the image row.
    pub fn code(&self) -> String {
        match self {
            EmbedError::Http { status, .. } => format!("http_{}", status),
            EmbedError::Network(_) => "network".to_string(),
            EmbedError::Provider(_) => "provider".to_string(),
        }
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded on each embedding row.
    fn model_name(&self) -> &str;
    /// Vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of image files, one vector per input, in input order.
    async fn embed_batch(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Build the embedder named by the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        "http" => Ok(Box::new(HttpEmbedder::new(config)?)),
        other => anyhow::bail!("Unknown embedding provider: '{}'", other),
    }
}

/// No-op provider used when embeddings are not configured.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Provider(
            "Embedding provider is disabled".to_string(),
        ))
    }
}

/// Provider calling a remote embedding endpoint with base64 image payloads.
///
/// Request shape: `{"model": ..., "input": [{"image": "<b64>"}, ...]}`.
/// Response shape: `{"data": [{"embedding": [...]}, ...]}` in input order.
/// The API key is read from `PIXARC_EMBED_API_KEY` when present.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for http provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for http provider"))?;
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.endpoint required for http provider"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            model,
            dims,
            api_key: std::env::var("PIXARC_EMBED_API_KEY").ok(),
        })
    }

    fn encode_image(path: &Path) -> Result<String, EmbedError> {
        let bytes = std::fs::read(path)
            .map_err(|e| EmbedError::Provider(format!("read {}: {}", path.display(), e)))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut inputs = Vec::with_capacity(paths.len());
        for path in paths {
            inputs.push(serde_json::json!({ "image": Self::encode_image(path)? }));
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbedError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;

        parse_response(&json, paths.len(), self.dims)
    }
}

fn parse_response(
    json: &serde_json::Value,
    expected_count: usize,
    expected_dims: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Provider("response missing 'data' array".to_string()))?;

    if data.len() != expected_count {
        return Err(EmbedError::Provider(format!(
            "expected {} embeddings, got {}",
            expected_count,
            data.len()
        )));
    }

    let mut vectors = Vec::with_capacity(data.len());
    for item in data {
        let vector: Vec<f32> = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::Provider("item missing 'embedding'".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if vector.len() != expected_dims {
            return Err(EmbedError::Provider(format!(
                "expected {}-dim vector, got {}",
                expected_dims,
                vector.len()
            )));
        }
        vectors.push(vector);
    }

    Ok(vectors)
}
