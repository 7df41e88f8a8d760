//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: always fails; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: runs a model in-process via fastembed
//!   (feature `local-embeddings`).
//!
//! Also provides vector utilities used by the index:
//! - [`l2_distance`]: Euclidean distance between two vectors
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` encoding
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use rootcause::config::EmbeddingConfig;
//! # use rootcause::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! # Error Classification
//!
//! Providers do not retry on their own. They classify failures so that
//! [`Backoff`](crate::retry::Backoff) can decide:
//! - HTTP 429 (rate limited) and 5xx → [`EmbedError::RateLimited`]
//! - network errors → [`EmbedError::RateLimited`]
//! - anything else → [`EmbedError::Failed`]

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use thiserror::Error;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::retry::Backoff;

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Failure from a single embedding call.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// Transient: rate limited, overloaded, or unreachable. Worth retrying.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Permanent for this input.
    #[error("{0}")]
    Failed(String),
}

impl From<EmbedError> for Error {
    fn from(e: EmbedError) -> Self {
        Error::external("embedding provider", e.to_string())
    }
}

/// A text → vector capability.
///
/// Vectors from different models are not comparable, so the index records
/// [`model_name`](Embedder::model_name) at build time and refuses to be
/// queried through an embedder reporting a different one.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-ada-002"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed one text.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError>;
}

/// Embed `text` under the backoff policy and check the vector's length.
pub async fn embed_checked(
    embedder: &dyn Embedder,
    backoff: &Backoff,
    text: &str,
) -> Result<Vec<f32>> {
    let vector = backoff.run(|| embedder.embed(text)).await?;
    if vector.len() != embedder.dims() {
        return Err(Error::ConsistencyViolation(format!(
            "model '{}' returned a {}-dim vector, expected {}",
            embedder.model_name(),
            vector.len(),
            embedder.dims()
        )));
    }
    Ok(vector)
}

// ============ Disabled Provider ============

/// A no-op embedder that always returns errors.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Failed(
            "embedding provider is disabled; set [embedding] provider in config".into(),
        ))
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {url}/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Returns an error if `dims` is not set or `OPENAI_API_KEY` is missing.
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "text-embedding-ada-002".to_string());
        let dims = config.dims.unwrap_or(1536);
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string()),
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::RateLimited(format!("OpenAI request error: {}", e)))?;

        let json = read_json(response, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> std::result::Result<Vec<f32>, EmbedError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbedError::Failed("invalid OpenAI response: missing embedding".into()))?;
    Ok(to_f32_vec(embedding))
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST {url}/api/embed` (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string()),
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                EmbedError::RateLimited(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let json = read_json(response, "Ollama").await?;
        let embedding = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .and_then(|e| e.first())
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                EmbedError::Failed("invalid Ollama response: missing embeddings array".into())
            })?;
        Ok(to_f32_vec(embedding))
    }
}

/// Read a JSON body, classifying non-success statuses.
async fn read_json(
    response: reqwest::Response,
    provider: &str,
) -> std::result::Result<serde_json::Value, EmbedError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| EmbedError::Failed(format!("{} response decode error: {}", provider, e)));
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{} API error {}: {}", provider, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(EmbedError::RateLimited(message))
    } else {
        Err(EmbedError::Failed(message))
    }
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Local Provider (fastembed) ============

/// In-process embedding via fastembed. The model is downloaded from Hugging
/// Face on first use and cached; no network calls after that.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (kind, default_dims) = match model_name.as_str() {
            "all-minilm-l6-v2" => (fastembed::EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (fastembed::EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (fastembed::EmbeddingModel::BGEBaseENV15, 768),
            "bge-large-en-v1.5" => (fastembed::EmbeddingModel::BGELargeENV15, 1024),
            "nomic-embed-text-v1.5" => (fastembed::EmbeddingModel::NomicEmbedTextV15, 768),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
                 bge-large-en-v1.5, nomic-embed-text-v1.5",
                other
            ),
        };
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(kind).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name,
            dims: config.dims.unwrap_or(default_dims),
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbedError::Failed("local embedding model lock poisoned".into()))?;
            let mut vectors = model
                .embed(vec![text], None)
                .map_err(|e| EmbedError::Failed(format!("local embedding failed: {}", e)))?;
            vectors
                .pop()
                .ok_or_else(|| EmbedError::Failed("empty local embedding response".into()))
        })
        .await
        .map_err(|e| EmbedError::Failed(format!("local embedding task failed: {}", e)))?
    }
}

/// Create the [`Embedder`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings`) |
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Euclidean (L2) distance. Callers guarantee equal lengths.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Encode a float vector as little-endian `f32` bytes (`vec.len() × 4`).
///
/// ```rust
/// use rootcause::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbedder {
        dims: usize,
        out: Vec<f32>,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
            Ok(self.out.clone())
        }
    }

    #[test]
    fn test_l2_distance() {
        assert_eq!(l2_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(l2_distance(&[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_parse_openai_response() {
        let json = serde_json::json!({
            "data": [{ "index": 0, "embedding": [0.5, -1.0] }]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), vec![0.5, -1.0]);

        let bad = serde_json::json!({ "error": "nope" });
        assert!(matches!(
            parse_openai_response(&bad),
            Err(EmbedError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_embed_checked_rejects_wrong_dims() {
        let e = FixedEmbedder {
            dims: 3,
            out: vec![1.0, 2.0],
        };
        let err = embed_checked(&e, &Backoff::default(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConsistencyViolation(_)));
    }

    #[tokio::test]
    async fn test_disabled_fails() {
        let err = embed_checked(&DisabledEmbedder, &Backoff::default(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExternalService { .. }));
    }

    #[test]
    fn test_create_disabled() {
        let e = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(e.model_name(), "disabled");
    }

    #[test]
    fn test_create_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "bogus".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
