//! Embedding providers and vector codecs.
//!
//! Defines the [`VectorEmbedder`] trait and concrete implementations:
//! - **[`OpenAiEmbedder`]** — `POST /v1/embeddings` with the configured model.
//! - **[`OllamaEmbedder`]** — a local Ollama instance's `/api/embed` endpoint.
//!
//! Providers make exactly one attempt per call; the scheduler owns retries
//! and backoff. Embedding has no heuristic fallback: when retries are
//! exhausted the scheduler substitutes a zero vector and flags the record
//! degraded so downstream search can exclude it.
//!
//! Also provides the BLOB codecs used for SQLite storage:
//! [`vec_to_blob`] / [`blob_to_vec`] (little-endian f32 bytes).

use async_trait::async_trait;
use std::time::Duration;

use crate::analysis::read_api_response;
use crate::config::EmbeddingConfig;
use crate::error::PipelineError;

/// Produces a fixed-length vector for one text. One attempt per call.
#[async_trait]
pub trait VectorEmbedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError>;
}

/// Create the configured embedder.
///
/// Fails fast on missing credentials or incomplete provider configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Box<dyn VectorEmbedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

// ============ OpenAI provider ============

/// Embedder using an OpenAI-compatible embeddings API.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims: config.dims,
            url,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl VectorEmbedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Transient(format!("embedding request failed: {}", e)))?;

        let text_body = read_api_response(response, "embedding").await?;

        let json: serde_json::Value = serde_json::from_str(&text_body)
            .map_err(|e| PipelineError::InvalidResponse(format!("embedding response: {}", e)))?;

        let vector = json["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| {
                PipelineError::InvalidResponse("embedding response missing data array".into())
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect::<Vec<f32>>();

        check_dims(&vector, self.dims)?;
        Ok(vector)
    }
}

// ============ Ollama provider ============

/// Embedder using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims: config.dims,
            url,
            client,
        })
    }
}

#[async_trait]
impl VectorEmbedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let text_body = read_api_response(response, "embedding").await?;

        let json: serde_json::Value = serde_json::from_str(&text_body)
            .map_err(|e| PipelineError::InvalidResponse(format!("embedding response: {}", e)))?;

        let vector = json["embeddings"][0]
            .as_array()
            .ok_or_else(|| {
                PipelineError::InvalidResponse(
                    "embedding response missing embeddings array".into(),
                )
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect::<Vec<f32>>();

        check_dims(&vector, self.dims)?;
        Ok(vector)
    }
}

/// A vector of the wrong length would corrupt similarity search; treat it
/// as an invalid response, not something to retry.
fn check_dims(vector: &[f32], dims: usize) -> Result<(), PipelineError> {
    if vector.len() != dims {
        return Err(PipelineError::InvalidResponse(format!(
            "embedding has {} dims, expected {}",
            vector.len(),
            dims
        )));
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
