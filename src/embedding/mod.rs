//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`HashedProvider`]**: deterministic local feature hashing; no network, no model download.
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible `/embeddings` endpoint with batching, retry, and backoff.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust
//! # use docqa::config::EmbeddingConfig;
//! # use docqa::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "hashed"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "hashed-trigram");
//! ```
//!
//! Remote providers share the retry policy in [`crate::remote`].

mod hashed;

pub use hashed::HashedProvider;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use crate::remote::{self, RemoteError};

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding dimensionality, or 0 when only the backend knows it.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| RagError::embedding("empty embedding response"))
}

/// Instantiate the provider named by `config.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashed" => Ok(Arc::new(HashedProvider::new(
            config.dims.unwrap_or(hashed::DEFAULT_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => Err(RagError::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Cosine similarity of two vectors; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn remote_err(provider: &str, err: RemoteError) -> RagError {
    RagError::embedding(format!("{} embeddings: {}", provider, err))
}

fn check_count(provider: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(RagError::embedding(format!(
            "{} returned {} embeddings for {} inputs",
            provider, got, expected
        )));
    }
    Ok(())
}

fn parse_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

// ============ OpenAI Provider ============

/// Embedding provider for OpenAI-compatible APIs.
///
/// Calls `POST {url}/embeddings` (default `https://api.openai.com/v1`) with a
/// bearer token read from the environment variable named by
/// `embedding.api_key_env` (default `OPENAI_API_KEY`).
pub struct OpenAIProvider {
    model: String,
    dims: Option<usize>,
    url: String,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| RagError::Config("embedding.model required for OpenAI provider".into()))?;
        let api_key = remote::api_key_from_env(config.api_key_env.as_deref(), "OPENAI_API_KEY")
            .ok_or_else(|| {
                RagError::Config(format!(
                    "{} environment variable not set",
                    config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY")
                ))
            })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = remote::build_client(config.timeout_secs)
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            model,
            dims: config.dims,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims.unwrap_or(0)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        let endpoint = format!("{}/embeddings", self.url);

        for batch in texts.chunks(self.batch_size) {
            let mut body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            if let Some(dims) = self.dims {
                body["dimensions"] = serde_json::json!(dims);
            }

            let json = remote::send_json("openai embeddings", self.max_retries, || {
                self.client
                    .post(&endpoint)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            })
            .await
            .map_err(|e| remote_err("OpenAI", e))?;

            let vectors = parse_openai_response(&json)?;
            check_count("OpenAI", batch.len(), vectors.len())?;
            all.extend(vectors);
        }

        Ok(all)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::embedding("invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let vector = item
            .get("embedding")
            .and_then(parse_vector)
            .ok_or_else(|| RagError::embedding("invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
/// Requires an embedding model to be pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: Option<usize>,
    url: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| RagError::Config("embedding.model required for Ollama provider".into()))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = remote::build_client(config.timeout_secs)
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            model,
            dims: config.dims,
            url: url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims.unwrap_or(0)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        let endpoint = format!("{}/api/embed", self.url);

        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });

            let json = remote::send_json("ollama embeddings", self.max_retries, || {
                self.client.post(&endpoint).json(&body)
            })
            .await
            .map_err(|e| {
                RagError::embedding(format!(
                    "Ollama embeddings (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

            let vectors = parse_ollama_response(&json)?;
            check_count("Ollama", batch.len(), vectors.len())?;
            all.extend(vectors);
        }

        Ok(all)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| RagError::embedding("invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            parse_vector(e)
                .ok_or_else(|| RagError::embedding("invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_mismatched_or_zero_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn openai_response_sorted_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn openai_response_without_data_is_error() {
        let err = parse_openai_response(&serde_json::json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    #[test]
    fn ollama_response_parsed() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.5], [1.0, 0.0]]});
        let vectors = parse_ollama_response(&json).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![1.0, 0.0]);
    }

    #[test]
    fn unknown_provider_rejected() {
        let config = EmbeddingConfig {
            provider: "word2vec".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(create_provider(&config), Err(RagError::Config(_))));
    }

    #[test]
    fn default_provider_is_hashed() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "hashed-trigram");
        assert_eq!(provider.dims(), 1024);
    }
}
