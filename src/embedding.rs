//! Embedding providers and the batching, retrying [`EmbeddingAdapter`].
//!
//! Providers implement [`EmbeddingProvider`] from the core crate:
//! - **[`OllamaProvider`]**: `POST {url}/api/embed` on a local Ollama instance.
//! - **[`OpenAIProvider`]**: `POST {url}/v1/embeddings` with `OPENAI_API_KEY`.
//! - **[`HashingProvider`]**: offline feature hashing (core crate).
//!
//! # Retry Strategy
//!
//! The adapter retries a batch only when the failure is transient
//! ([`RagError::is_retryable`]): timeouts, network errors, HTTP 429 and 5xx.
//! Other errors fail immediately. Backoff doubles from `retry_base_ms`
//! (500ms, 1s, 2s, ... capped at 2^5) for at most `max_attempts` calls.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tracing::{debug, warn};

use ragbase_core::embedding::{EmbeddingProvider, HashingProvider};
use ragbase_core::{RagError, Result};

use crate::config::EmbeddingConfig;
use crate::upstream;

/// Instantiate the provider named by `embedding.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "hashing" => Ok(Arc::new(HashingProvider::new(config.dims_or_default()))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Single logical `embed` operation over any provider.
///
/// Validates input, splits it into provider-sized batches, retries transient
/// failures, and checks every response for count and dimensionality.
pub struct EmbeddingAdapter {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_attempts: u32,
    retry_base: Duration,
}

impl EmbeddingAdapter {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            batch_size: 64,
            max_attempts: 3,
            retry_base: Duration::from_millis(500),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        Ok(Self::new(create_provider(config)?)
            .with_batch_size(config.batch_size)
            .with_retry(
                config.max_attempts,
                Duration::from_millis(config.retry_base_ms),
            ))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_base = base;
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    /// Embed `texts`, returning one vector per text in input order.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidInput`] if any text is empty after trimming
    ///   (checked before any provider call).
    /// - [`RagError::DimensionMismatch`] if the provider returns a vector
    ///   of the wrong size.
    /// - The provider's last error once retries are exhausted.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some(i) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(RagError::InvalidInput(format!(
                "text at index {} is empty; nothing to embed",
                i
            )));
        }

        let batch_size = self.batch_size.min(self.provider.max_batch_size()).max(1);
        let dims = self.provider.dims();
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(batch_size) {
            let batch_vectors = self.embed_with_retry(batch).await?;
            if batch_vectors.len() != batch.len() {
                return Err(RagError::upstream(
                    self.provider.model_name(),
                    format!(
                        "expected {} vectors, got {}",
                        batch.len(),
                        batch_vectors.len()
                    ),
                ));
            }
            if let Some(bad) = batch_vectors.iter().find(|v| v.len() != dims) {
                return Err(RagError::DimensionMismatch {
                    expected: dims,
                    actual: bad.len(),
                });
            }
            vectors.extend(batch_vectors);
        }

        debug!(
            model = self.provider.model_name(),
            texts = texts.len(),
            batch_size,
            "embedded texts"
        );
        Ok(vectors)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            RagError::upstream(self.provider.model_name(), "empty embedding response")
        })
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_err = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                // Exponential backoff: base, 2×base, 4×base, ...
                let delay = self.retry_base * (1u32 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match self.provider.embed_batch(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() => {
                    warn!(
                        model = self.provider.model_name(),
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "embedding call failed"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            RagError::unavailable(self.provider.model_name(), "embedding failed after retries")
        }))
    }
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            client: upstream::client(timeout)?,
            model: config.model_or_default(),
            dims: config.dims_or_default(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            batch_size: config.batch_size,
            timeout,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = upstream::post_json(
            &self.client,
            "ollama",
            &format!("{}/api/embed", self.url.trim_end_matches('/')),
            &body,
            None,
            self.timeout,
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| RagError::upstream("ollama", "response is missing the embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            let values = embedding
                .as_array()
                .ok_or_else(|| RagError::upstream("ollama", "embedding is not an array"))?;
            to_f32("ollama", values)
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI embeddings API (or a compatible server).
pub struct OpenAIProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    batch_size: usize,
    timeout: Duration,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not set.
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            client: upstream::client(timeout)?,
            model: config.model_or_default(),
            dims: config.dims_or_default(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            batch_size: config.batch_size,
            timeout,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = upstream::post_json(
            &self.client,
            "openai",
            &format!("{}/v1/embeddings", self.url.trim_end_matches('/')),
            &body,
            Some(&self.api_key),
            self.timeout,
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::upstream("openai", "response is missing the data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::upstream("openai", "response item is missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(position as u64);
        indexed.push((index, to_f32("openai", embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn to_f32(service: &str, values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64().map(|x| x as f32).ok_or_else(|| {
                RagError::upstream(service, "embedding contains a non-numeric value")
            })
        })
        .collect()
}
