//! Configuration parsing and validation.
//!
//! Docent reads an optional TOML file (default `config/docent.toml`) and
//! then applies environment overrides. Every key has a default, so a bare
//! environment is enough to run against a pre-built store.
//!
//! # Example
//!
//! ```toml
//! [store]
//! path = "./data/docent.sqlite"
//! collection = "docs"
//!
//! [retrieval]
//! k = 4
//! similarity_threshold = 0.3
//! enforce_threshold = false
//! history_turns = 10
//!
//! [generation]
//! provider = "groq"          # groq | openai | google
//! temperature = 0.1
//! max_tokens = 1024
//!
//! [embedding]
//! provider = "local"         # local | openai | ollama
//! model = "all-minilm-l6-v2"
//!
//! [ingest]
//! docs_dir = "./data/docs"
//! chunk_size = 1000
//! chunk_overlap = 200
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Key |
//! |----------|-----|
//! | `LLM_PROVIDER` | `generation.provider` |
//! | `DOCENT_STORE_PATH` | `store.path` |
//! | `DOCENT_COLLECTION` | `store.collection` |
//! | `DOCENT_RETRIEVER_K` | `retrieval.k` |
//! | `DOCENT_SIMILARITY_THRESHOLD` | `retrieval.similarity_threshold` |
//! | `DOCENT_ENFORCE_THRESHOLD` | `retrieval.enforce_threshold` |
//! | `DOCENT_DOCS_DIR` | `ingest.docs_dir` |
//!
//! Provider credentials (`GROQ_API_KEY`, `OPENAI_API_KEY`, `GOOGLE_API_KEY`)
//! are never stored in config; they are read when the provider is built.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docent_core::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use docent_core::context::{CONTEXT_PLACEHOLDER, DEFAULT_HISTORY_TURNS};
use docent_core::retrieval::{RetrievalParams, DEFAULT_K, DEFAULT_SIMILARITY_THRESHOLD};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            collection: default_collection(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/docent.sqlite")
}
fn default_collection() -> String {
    "docs".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Drop passages scoring below `similarity_threshold`. Off by default.
    #[serde(default)]
    pub enforce_threshold: bool,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            similarity_threshold: default_similarity_threshold(),
            enforce_threshold: false,
            history_turns: default_history_turns(),
        }
    }
}

impl RetrievalConfig {
    /// Retrieval parameters for `k` passages under this config.
    pub fn params(&self, k: usize) -> RetrievalParams {
        RetrievalParams {
            k,
            min_score: self.enforce_threshold.then_some(self.similarity_threshold),
        }
    }
}

fn default_k() -> usize {
    DEFAULT_K
}
fn default_similarity_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}
fn default_history_turns() -> usize {
    DEFAULT_HISTORY_TURNS
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    /// Overrides the selected provider's default model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    /// Overrides the selected provider's API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// System prompt; must contain `{context}`.
    #[serde(default)]
    pub system_template: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
            base_url: None,
            system_template: None,
        }
    }
}

fn default_llm_provider() -> String {
    "groq".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_generation_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama backend.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_ingest_batch")]
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            docs_dir: default_docs_dir(),
            include_globs: default_include_globs(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            batch_size: default_ingest_batch(),
        }
    }
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("./data/docs")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}
fn default_ingest_batch() -> usize {
    50
}

/// Load configuration from `path` (if it exists) plus the process environment.
///
/// A missing file is not an error: defaults apply. A file that exists but
/// fails to parse is.
pub fn load_config(path: &Path) -> Result<Config> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Like [`load_config`], reading overrides through `lookup` instead of the
/// process environment.
pub fn load_config_with<F>(path: &Path, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env(&mut config, &lookup)?;
    validate(&config)?;
    Ok(config)
}

fn apply_env<F>(config: &mut Config, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("LLM_PROVIDER") {
        config.generation.provider = v;
    }
    if let Some(v) = lookup("DOCENT_STORE_PATH") {
        config.store.path = PathBuf::from(v);
    }
    if let Some(v) = lookup("DOCENT_COLLECTION") {
        config.store.collection = v;
    }
    if let Some(v) = lookup("DOCENT_RETRIEVER_K") {
        config.retrieval.k = v
            .trim()
            .parse()
            .with_context(|| format!("DOCENT_RETRIEVER_K is not an integer: '{}'", v))?;
    }
    if let Some(v) = lookup("DOCENT_SIMILARITY_THRESHOLD") {
        config.retrieval.similarity_threshold = v
            .trim()
            .parse()
            .with_context(|| format!("DOCENT_SIMILARITY_THRESHOLD is not a number: '{}'", v))?;
    }
    if let Some(v) = lookup("DOCENT_ENFORCE_THRESHOLD") {
        config.retrieval.enforce_threshold = match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            other => bail!("DOCENT_ENFORCE_THRESHOLD must be true or false, got '{}'", other),
        };
    }
    if let Some(v) = lookup("DOCENT_DOCS_DIR") {
        config.ingest.docs_dir = PathBuf::from(v);
    }
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.store.collection.trim().is_empty() {
        bail!("store.collection must not be empty");
    }

    if config.retrieval.k < 1 {
        bail!("retrieval.k must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }

    if config.generation.max_tokens == 0 {
        bail!("generation.max_tokens must be > 0");
    }

    if !(0.0..=2.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }

    if let Some(template) = &config.generation.system_template {
        if !template.contains(CONTEXT_PLACEHOLDER) {
            bail!(
                "generation.system_template must contain the {} placeholder",
                CONTEXT_PLACEHOLDER
            );
        }
    }

    match config.embedding.provider.as_str() {
        "local" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
            other
        ),
    }

    if config.embedding.provider != "local" {
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    if config.ingest.chunk_size == 0 {
        bail!("ingest.chunk_size must be > 0");
    }
    if config.ingest.chunk_overlap >= config.ingest.chunk_size {
        bail!("ingest.chunk_overlap must be smaller than ingest.chunk_size");
    }
    if config.ingest.batch_size == 0 {
        bail!("ingest.batch_size must be > 0");
    }

    Ok(())
}
