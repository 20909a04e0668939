//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] capability and concrete providers:
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: runs models in-process via fastembed (feature
//!   `local-embeddings`); no network calls after model download.
//!
//! Also provides vector utilities:
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` packing for SQLite BLOBs
//! - [`encode_vector_b64`] / [`decode_vector_b64`]: the same packing, base64 encoded,
//!   as written to embedding partition files
//! - [`l2_distance`]: Euclidean distance used for retrieval
//!
//! # Ordering
//!
//! Every provider returns vectors in input order and never more vectors
//! than inputs; `embed(&[])` returns an empty list without a network call.
//!
//! # Retry Strategy
//!
//! HTTP providers share [`crate::http::send_with_retry`]: 429 and 5xx
//! responses are retried after the `retry-after` hint, other failures are
//! returned immediately.

#[cfg(feature = "local-embeddings")]
mod local;

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::warn;

use crate::config::{require_env, EmbeddingConfig};
use crate::error::PipelineError;
use crate::http::send_with_retry;

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_DIMS: usize = 1536;
const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

/// A text embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Provider name. Scopes stored vectors and names the partition directory.
    fn name(&self) -> &str;

    /// Vector dimensionality.
    fn dim(&self) -> usize;

    /// Embed `texts`, returning one vector per input in input order. A
    /// shorter result means the trailing inputs were not embedded.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("{} returned no vector for the query", embedder.name()))
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API (`POST /v1/embeddings`).
///
/// Requires `OPENAI_API_KEY`. `embedding.url` points it at an
/// OpenAI-compatible gateway instead.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = require_env("OPENAI_API_KEY", "the openai embedding provider")?;
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            dims: config.dims.unwrap_or(DEFAULT_OPENAI_DIMS),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            max_retries: config.max_retries,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

#[derive(Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingItem>,
}

#[derive(Deserialize)]
struct OpenAIEmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn dim(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/v1/embeddings", self.base_url);

        let response = send_with_retry("openai", self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
        })
        .await?;
        let parsed: OpenAIEmbeddingResponse = response.json().await.map_err(|e| {
            PipelineError::Provider {
                provider: "openai".into(),
                status: None,
                message: format!("invalid embeddings response: {}", e),
            }
        })?;
        Ok(order_by_index(parsed.data, texts.len()))
    }
}

/// Restore input order from the response `index` field. Stops at the first
/// missing index: slot `i` of the result always belongs to input `i`, and
/// inputs after a gap count as not embedded.
fn order_by_index(mut data: Vec<OpenAIEmbeddingItem>, inputs: usize) -> Vec<Vec<f32>> {
    data.sort_by_key(|item| item.index);
    data.dedup_by_key(|item| item.index);
    let vectors: Vec<Vec<f32>> = data
        .into_iter()
        .take(inputs)
        .enumerate()
        .take_while(|(position, item)| item.index == *position)
        .map(|(_, item)| item.embedding)
        .collect();
    if vectors.len() < inputs {
        warn!(
            requested = inputs,
            returned = vectors.len(),
            "embeddings response is missing an index; later inputs left unembedded"
        );
    }
    vectors
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance (`POST /api/embed`).
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| PipelineError::config("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| PipelineError::config("embedding.dims required for Ollama provider"))?;
        Ok(Self {
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_retries: config.max_retries,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    fn dim(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/api/embed", self.url);

        let response = send_with_retry("ollama", self.max_retries, || {
            self.client.post(&url).json(&body).send()
        })
        .await?;
        let mut parsed: OllamaEmbedResponse =
            response.json().await.map_err(|e| PipelineError::Provider {
                provider: "ollama".into(),
                status: None,
                message: format!("invalid embed response: {}", e),
            })?;
        parsed.embeddings.truncate(texts.len());
        Ok(parsed.embeddings)
    }
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings`) |
///
/// `"disabled"` and missing credentials are configuration errors.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(PipelineError::config(
            "Local embedding provider requires building with --features local-embeddings",
        )
        .into()),
        "disabled" => Err(PipelineError::config(
            "Embedding provider is disabled; set [embedding] provider in the config",
        )
        .into()),
        other => Err(PipelineError::config(format!("Unknown embedding provider: {}", other)).into()),
    }
}

/// Encode a float vector as little-endian `f32` bytes.
///
/// ```rust
/// use repo_context::embedding::{vec_to_blob, blob_to_vec};
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

/// Reverse of [`vec_to_blob`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub fn encode_vector_b64(vec: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(vec_to_blob(vec))
}

pub fn decode_vector_b64(encoded: &str) -> Result<Vec<f32>> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    if bytes.len() % 4 != 0 {
        anyhow::bail!("vector payload of {} bytes is not a whole number of f32s", bytes.len());
    }
    Ok(blob_to_vec(&bytes))
}

/// Euclidean distance. `None` when the dimensions differ.
pub fn l2_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum();
    Some(sum.sqrt())
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn openai(url: &str) -> OpenAIEmbedder {
        OpenAIEmbedder {
            model: DEFAULT_OPENAI_MODEL.into(),
            dims: 3,
            base_url: url.into(),
            api_key: "sk-test".into(),
            max_retries: 1,
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
        assert_eq!(decode_vector_b64(&encode_vector_b64(&vec)).unwrap(), vec);
    }

    #[test]
    fn test_b64_layout_is_little_endian_f32() {
        // 1.0f32 == 0x3f800000 -> bytes 00 00 80 3f
        assert_eq!(encode_vector_b64(&[1.0]), "AACAPw==");
        assert!(decode_vector_b64("AACA").is_err());
    }

    #[test]
    fn test_l2_distance() {
        assert_eq!(l2_distance(&[0.0, 0.0], &[3.0, 4.0]), Some(5.0));
        assert_eq!(l2_distance(&[1.0], &[1.0]), Some(0.0));
        assert_eq!(l2_distance(&[1.0], &[1.0, 2.0]), None);
    }

    #[test]
    fn test_order_by_index_restores_input_order() {
        let data = vec![
            OpenAIEmbeddingItem {
                index: 2,
                embedding: vec![2.0],
            },
            OpenAIEmbeddingItem {
                index: 0,
                embedding: vec![0.0],
            },
            OpenAIEmbeddingItem {
                index: 1,
                embedding: vec![1.0],
            },
        ];
        assert_eq!(order_by_index(data, 3), vec![vec![0.0], vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_order_by_index_stops_at_missing_index() {
        let data = vec![
            OpenAIEmbeddingItem {
                index: 0,
                embedding: vec![0.0],
            },
            OpenAIEmbeddingItem {
                index: 2,
                embedding: vec![2.0],
            },
        ];
        // Input 2's vector must never land in slot 1.
        assert_eq!(order_by_index(data, 3), vec![vec![0.0]]);
    }

    #[test]
    fn test_order_by_index_ignores_out_of_range_entries() {
        let data = vec![
            OpenAIEmbeddingItem {
                index: 0,
                embedding: vec![0.0],
            },
            OpenAIEmbeddingItem {
                index: 0,
                embedding: vec![9.0],
            },
            OpenAIEmbeddingItem {
                index: 1,
                embedding: vec![1.0],
            },
            OpenAIEmbeddingItem {
                index: 5,
                embedding: vec![5.0],
            },
        ];
        assert_eq!(order_by_index(data, 2), vec![vec![0.0], vec![1.0]]);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_request() {
        // No server listening: any request would fail.
        let embedder = openai("http://127.0.0.1:9");
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_openai_request_and_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(bearer_token("sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.4, 0.5, 0.6]},
                    {"index": 0, "embedding": [0.1, 0.2, 0.3]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let embedder = openai(&server.uri());
        let texts = vec!["a".to_string(), "b".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]);

        let requests = server.received_requests().await.unwrap();
        let sent: serde_json::Value = requests[0].body_json().unwrap();
        assert_eq!(sent["model"], DEFAULT_OPENAI_MODEL);
        assert_eq!(sent["input"][1], "b");
    }

    #[tokio::test]
    async fn test_openai_missing_index_keeps_positions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 2, "embedding": [2.0, 2.0, 2.0]},
                    {"index": 0, "embedding": [0.0, 0.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let embedder = openai(&server.uri());
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![0.0, 0.0, 0.0]]);
    }

    #[tokio::test]
    async fn test_ollama_retries_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[1.0, 0.0], [0.0, 1.0], [9.0, 9.0]]
            })))
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder {
            model: "nomic-embed-text".into(),
            dims: 2,
            url: server.uri(),
            max_retries: 1,
            client: reqwest::Client::new(),
        };
        let texts = vec!["a".to_string(), "b".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[test]
    fn test_disabled_provider_is_config_error() {
        let err = create_embedder(&EmbeddingConfig::default()).err().unwrap();
        assert!(PipelineError::is_config(&err));
    }
}
