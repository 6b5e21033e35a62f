//! Embedding provider abstraction and HTTP implementations.
//!
//! Defines the [`Embedder`] trait and concrete adapters:
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama instance.
//! - **[`OpenAIEmbedder`]**: `POST {url}/v1/embeddings` (OpenAI or a compatible server).
//! - **[`DisabledEmbedder`]**: always fails; used when embeddings are turned off.
//!
//! Adapters own batching: callers pass any number of texts and get back one
//! vector per text, in input order. Every returned batch is checked for count
//! and dimension before it leaves the adapter.
//!
//! # Precondition
//!
//! The index must be queried with the same adapter and model that built it.
//! Vectors from different embedding spaces compare without error but the
//! scores are meaningless, and nothing here can detect that.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx, network errors, timeouts → retry
//! - other HTTP 4xx → fail immediately
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::EmbeddingProviderError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in the index metadata.
    fn model_name(&self) -> &str;

    /// Configured dimensionality, if known up front.
    fn dims(&self) -> Option<usize>;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingProviderError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingProviderError::InvalidResponse("empty response".to_string()))
    }
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> Option<usize> {
        None
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
        Err(EmbeddingProviderError::Disabled)
    }
}

// ============ Shared HTTP plumbing ============

struct HttpSettings {
    client: reqwest::Client,
    model: String,
    base_url: String,
    dims: Option<usize>,
    batch_size: usize,
    max_retries: u32,
    timeout: Duration,
}

impl HttpSettings {
    fn new(config: &EmbeddingConfig) -> Result<Self> {
        let timeout = config.timeout();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            model: config.model.clone(),
            base_url: config.base_url(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            timeout,
        })
    }

    async fn post_with_retry(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, EmbeddingProviderError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(url).json(body);
            if let Some(key) = bearer {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json().await.map_err(|e| {
                            EmbeddingProviderError::InvalidResponse(e.to_string())
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = EmbeddingProviderError::Status {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(attempt, %status, "embedding request failed, retrying");
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    warn!(attempt, error = %e, url, "embedding request error");
                    last_err = Some(if e.is_timeout() {
                        EmbeddingProviderError::Timeout(self.timeout)
                    } else {
                        EmbeddingProviderError::Request(e.to_string())
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            EmbeddingProviderError::Request("embedding failed after retries".to_string())
        }))
    }
}

/// Verify a provider response: one vector per input, one shared non-zero
/// dimension, matching the configured one when set.
pub fn check_vectors(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dims: Option<usize>,
) -> Result<(), EmbeddingProviderError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingProviderError::InvalidResponse(format!(
            "expected {} vectors, got {}",
            expected_count,
            vectors.len()
        )));
    }

    let Some(first) = vectors.first() else {
        return Ok(());
    };
    let width = dims.unwrap_or(first.len());
    if width == 0 {
        return Err(EmbeddingProviderError::InvalidResponse(
            "zero-length embedding".to_string(),
        ));
    }
    if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != width) {
        return Err(EmbeddingProviderError::InvalidResponse(format!(
            "vector {} has dimension {}, expected {}",
            i,
            v.len(),
            width
        )));
    }
    Ok(())
}

fn json_to_vector(value: &serde_json::Value) -> Result<Vec<f32>, EmbeddingProviderError> {
    value
        .as_array()
        .ok_or_else(|| {
            EmbeddingProviderError::InvalidResponse("embedding is not an array".to_string())
        })?
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                EmbeddingProviderError::InvalidResponse("non-numeric embedding value".to_string())
            })
        })
        .collect()
}

// ============ Ollama ============

/// Embedding adapter for a local Ollama instance.
///
/// Requires an embedding model to be pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    http: HttpSettings,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            http: HttpSettings::new(config)?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    fn dims(&self) -> Option<usize> {
        self.http.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
        let url = format!("{}/api/embed", self.http.base_url);
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.http.batch_size) {
            let body = serde_json::json!({
                "model": self.http.model,
                "input": batch,
            });
            let json = self.http.post_with_retry(&url, None, &body).await?;
            let vectors = parse_ollama_response(&json)?;
            check_vectors(&vectors, batch.len(), self.http.dims)?;
            debug!(batch = batch.len(), "embedded batch via ollama");
            out.extend(vectors);
        }

        check_vectors(&out, texts.len(), self.http.dims)?;
        Ok(out)
    }
}

fn parse_ollama_response(
    json: &serde_json::Value,
) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbeddingProviderError::InvalidResponse("missing embeddings array".to_string())
        })?
        .iter()
        .map(json_to_vector)
        .collect()
}

// ============ OpenAI-compatible ============

/// Embedding adapter for the OpenAI embeddings API or a compatible server.
///
/// The API key is read once, at construction, from the environment variable
/// named by `embedding.api_key_env`.
pub struct OpenAIEmbedder {
    http: HttpSettings,
    api_key: String,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };
        Ok(Self {
            http: HttpSettings::new(config)?,
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.http.model
    }

    fn dims(&self) -> Option<usize> {
        self.http.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
        let url = format!("{}/v1/embeddings", self.http.base_url);
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.http.batch_size) {
            let body = serde_json::json!({
                "model": self.http.model,
                "input": batch,
            });
            let json = self
                .http
                .post_with_retry(&url, Some(&self.api_key), &body)
                .await?;
            let vectors = parse_openai_response(&json)?;
            check_vectors(&vectors, batch.len(), self.http.dims)?;
            out.extend(vectors);
        }

        check_vectors(&out, texts.len(), self.http.dims)?;
        Ok(out)
    }
}

/// Extracts `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(
    json: &serde_json::Value,
) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbeddingProviderError::InvalidResponse("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item.get("embedding").ok_or_else(|| {
            EmbeddingProviderError::InvalidResponse("missing embedding".to_string())
        })?;
        indexed.push((index, json_to_vector(embedding)?));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Adapter |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
