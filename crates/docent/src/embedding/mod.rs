//! Embedding backends.
//!
//! Concrete [`Embedder`] implementations selected by `embedding.provider`:
//!
//! | Config Value | Backend |
//! |-------------|---------|
//! | `"local"` | [`LocalEmbedder`]: fastembed, runs offline after the first model download |
//! | `"openai"` | [`OpenAiEmbedder`]: `POST /v1/embeddings` |
//! | `"ollama"` | [`OllamaEmbedder`]: `POST /api/embed` on a local Ollama |
//!
//! The same backend and model must be used to build a passage store and
//! to query it.
//!
//! # Retry Strategy
//!
//! The HTTP backends retry transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use docent_core::embedding::Embedder;
use docent_core::RagError;

use crate::config::EmbeddingConfig;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// Build the embedder named by `config.provider`, reading credentials
/// from the process environment.
///
/// Construction does no network I/O. The local model is loaded lazily on
/// the first embedding call.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, RagError> {
    create_embedder_with(config, |key| std::env::var(key).ok())
}

/// Like [`create_embedder`] with an explicit credential lookup.
pub fn create_embedder_with<F>(
    config: &EmbeddingConfig,
    lookup: F,
) -> Result<Arc<dyn Embedder>, RagError>
where
    F: Fn(&str) -> Option<String>,
{
    match config.provider.as_str() {
        "openai" => {
            let api_key = lookup(OPENAI_KEY_VAR)
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| RagError::MissingCredential {
                    provider: "openai".to_string(),
                    var: OPENAI_KEY_VAR.to_string(),
                })?;
            Ok(Arc::new(OpenAiEmbedder::new(config, api_key)?))
        }
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(RagError::Embedding(
            "local embeddings require --features local-embeddings".to_string(),
        )),
        other => Err(RagError::Embedding(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

fn required_model(config: &EmbeddingConfig, backend: &str) -> Result<(String, usize), RagError> {
    let model = config.model.clone().ok_or_else(|| {
        RagError::Embedding(format!("embedding.model required for {} backend", backend))
    })?;
    let dims = config.dims.ok_or_else(|| {
        RagError::Embedding(format!("embedding.dims required for {} backend", backend))
    })?;
    Ok((model, dims))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, RagError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::Embedding(e.to_string()))
}

/// Send the request built by `request`, retrying 429/5xx and transport failures.
async fn post_with_retry(
    request: impl Fn() -> reqwest::RequestBuilder,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value, RagError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, ?delay, "{} embedding retry", label);
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| RagError::Embedding(format!("{} response: {}", label, e)));
                }

                let body_text = match response.text().await {
                    Ok(body) if !body.trim().is_empty() => body,
                    Ok(_) => status.canonical_reason().unwrap_or("no body").to_string(),
                    Err(e) => format!("error body unreadable: {}", e),
                };
                let err = RagError::Embedding(format!(
                    "{} API error {}: {}",
                    label, status, body_text
                ));
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(RagError::Embedding(format!(
                    "{} connection error: {}",
                    label, e
                )));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        RagError::Embedding(format!("{} embedding failed after retries", label))
    }))
}

fn json_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

fn check_count(got: usize, want: usize, label: &str) -> Result<(), RagError> {
    if got != want {
        return Err(RagError::Embedding(format!(
            "{} returned {} embeddings for {} inputs",
            label, got, want
        )));
    }
    Ok(())
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self, RagError> {
        let (model, dims) = required_model(config, "openai")?;
        Ok(Self {
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, RagError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::Embedding("Invalid OpenAI response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let vec = item
            .get("embedding")
            .and_then(json_vector)
            .ok_or_else(|| RagError::Embedding("Invalid OpenAI response: missing embedding".into()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = post_with_retry(
            || {
                self.client
                    .post(OPENAI_EMBEDDINGS_URL)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
            self.max_retries,
            "OpenAI",
        )
        .await?;
        let vectors = parse_openai_response(&json)?;
        check_count(vectors.len(), texts.len(), "OpenAI")?;
        Ok(vectors)
    }
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, RagError> {
        let (model, dims) = required_model(config, "ollama")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, RagError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RagError::Embedding("Invalid Ollama response: missing embeddings array".into())
        })?;

    embeddings
        .iter()
        .map(|e| {
            json_vector(e).ok_or_else(|| {
                RagError::Embedding("Invalid Ollama response: embedding is not an array".into())
            })
        })
        .collect()
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let endpoint = format!("{}/api/embed", self.url);
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = post_with_retry(
            || self.client.post(&endpoint).json(&body),
            self.max_retries,
            "Ollama",
        )
        .await?;
        let vectors = parse_ollama_response(&json)?;
        check_count(vectors.len(), texts.len(), "Ollama")?;
        Ok(vectors)
    }
}

// ============ Local (fastembed) ============

/// Default dimensionality of the supported local models.
pub fn local_model_dims(name: &str) -> Option<usize> {
    match name {
        "all-minilm-l6-v2" | "bge-small-en-v1.5" | "multilingual-e5-small" => Some(384),
        "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5"
        | "multilingual-e5-base" => Some(768),
        "bge-large-en-v1.5" | "multilingual-e5-large" => Some(1024),
        _ => None,
    }
}

/// In-process embedder backed by fastembed.
///
/// The ONNX model is initialized once, on first use, and shared by every
/// subsequent call.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, RagError> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        config_to_fastembed_model(&model_name)?;
        let dims = match (config.dims, local_model_dims(&model_name)) {
            (Some(d), _) | (None, Some(d)) => d,
            (None, None) => 384,
        };
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel, RagError> {
    use fastembed::EmbeddingModel;
    match name {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(EmbeddingModel::MultilingualE5Large),
        other => Err(RagError::Embedding(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
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

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let fastembed_model = config_to_fastembed_model(&self.model_name)?;
        let slot = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| RagError::Embedding("local embedding model lock poisoned".into()))?;
            if guard.is_none() {
                tracing::info!("loading local embedding model");
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model)
                        .with_show_download_progress(false),
                )
                .map_err(|e| {
                    RagError::Embedding(format!(
                        "Failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| RagError::Embedding("local embedding model missing".into()))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| RagError::Embedding(format!("Local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| RagError::Embedding(format!("embedding task failed: {}", e)))?
    }
}
