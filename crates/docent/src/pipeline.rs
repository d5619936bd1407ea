//! The retrieval-augmented answering pipeline.
//!
//! [`Pipeline::ask`] turns a question plus prior conversation into a
//! streamed answer and the passages it was grounded on:
//!
//! ```text
//! question ──▶ embed ──▶ store k-NN ──▶ assemble context ──▶ build messages
//!                                                               │
//!          RagResponse { answer stream, sources, elapsed } ◀── provider.stream
//! ```
//!
//! Retrieval always completes before the provider is invoked. The passage
//! store, embedder, and completion provider are shared, lazily constructed
//! handles: concurrent first requests race on a single-flight initializer,
//! so each is built at most once per pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::OnceCell;

use docent_core::context::{
    assemble, assemble_history, build_request, DEFAULT_SYSTEM_TEMPLATE,
};
use docent_core::embedding::Embedder;
use docent_core::retrieval::retrieve;
use docent_core::store::PassageStore;
use docent_core::{ConversationTurn, RagError, RetrievedPassage};

use crate::completion::{self, AnswerStream, ChatBackend, CompletionProvider, ProviderInfo};
use crate::config::Config;
use crate::embedding::create_embedder_with;
use crate::sqlite_store::SqliteStore;

type CredentialLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// The result of one [`Pipeline::ask`] call.
#[derive(Debug)]
pub struct RagResponse {
    /// The answer, still streaming. Consumable once.
    pub answer: AnswerStream,
    /// Passages placed in the prompt, most similar first.
    pub sources: Vec<RetrievedPassage>,
    /// Time from receiving the question until `answer` was handed back.
    /// Excludes draining the stream.
    pub elapsed: Duration,
}

pub struct Pipeline {
    config: Arc<Config>,
    credentials: CredentialLookup,
    store: OnceCell<Arc<dyn PassageStore>>,
    embedder: OnceCell<Arc<dyn Embedder>>,
    backend: OnceCell<Arc<dyn ChatBackend>>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            credentials: Arc::new(|key: &str| std::env::var(key).ok()),
            store: OnceCell::new(),
            embedder: OnceCell::new(),
            backend: OnceCell::new(),
        }
    }

    /// Read provider and embedding credentials through `lookup` instead of
    /// the environment.
    pub fn with_credentials<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.credentials = Arc::new(lookup);
        self
    }

    /// Use `store` instead of opening the configured SQLite store.
    pub fn with_store(mut self, store: Arc<dyn PassageStore>) -> Self {
        self.store = OnceCell::new_with(Some(store));
        self
    }

    /// Use `embedder` instead of the configured embedding backend.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = OnceCell::new_with(Some(embedder));
        self
    }

    /// Use `backend` instead of the configured completion provider.
    pub fn with_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend = OnceCell::new_with(Some(backend));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn embedder(&self) -> Result<Arc<dyn Embedder>, RagError> {
        self.embedder
            .get_or_try_init(|| async {
                let embedder =
                    create_embedder_with(&self.config.embedding, |key| (self.credentials)(key))?;
                tracing::debug!(
                    model = embedder.model_name(),
                    dims = embedder.dims(),
                    "embedder ready"
                );
                Ok::<_, RagError>(embedder)
            })
            .await
            .cloned()
    }

    /// The shared passage store, opened on first use.
    ///
    /// Opening checks the query embedder against the dimensionality the
    /// collection was built with.
    pub async fn store(&self) -> Result<Arc<dyn PassageStore>, RagError> {
        self.store
            .get_or_try_init(|| async {
                let embedder = self.embedder().await?;
                let store =
                    SqliteStore::open(&self.config.store.path, &self.config.store.collection)
                        .await?;
                store.check_embedder(embedder.as_ref())?;
                let passages = store.count().await?;
                tracing::info!(
                    path = %self.config.store.path.display(),
                    collection = store.collection(),
                    model = store.model(),
                    passages,
                    "passage store opened"
                );
                Ok::<_, RagError>(Arc::new(store) as Arc<dyn PassageStore>)
            })
            .await
            .cloned()
    }

    /// The shared completion provider, built on first use.
    pub async fn backend(&self) -> Result<Arc<dyn ChatBackend>, RagError> {
        self.backend
            .get_or_try_init(|| async {
                let provider = CompletionProvider::from_config_with(
                    &self.config.generation,
                    |key| (self.credentials)(key),
                )?;
                let info = provider.info();
                tracing::info!(
                    provider = %info.provider,
                    model = %info.model,
                    "completion provider ready"
                );
                Ok::<_, RagError>(Arc::new(provider) as Arc<dyn ChatBackend>)
            })
            .await
            .cloned()
    }

    /// Retrieve the `k` passages most similar to `query`.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>, RagError> {
        let store = self.store().await?;
        let embedder = self.embedder().await?;
        let params = self.config.retrieval.params(k);
        let passages = retrieve(store.as_ref(), embedder.as_ref(), query, &params).await?;
        tracing::debug!(
            k,
            passages = passages.len(),
            top_score = passages.first().map(|p| p.score),
            "retrieved passages"
        );
        Ok(passages)
    }

    /// Answer `question` from the corpus, given the prior conversation.
    ///
    /// `history` is caller-owned; only its most recent
    /// `retrieval.history_turns` turns are sent.
    ///
    /// # Errors
    ///
    /// Provider configuration errors are raised before any retrieval work.
    /// Retrieval errors abort the request before the provider is invoked.
    /// Nothing is retried.
    pub async fn ask(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<RagResponse, RagError> {
        let started = Instant::now();

        if question.trim().is_empty() {
            return Err(RagError::InvalidRequest("question is empty".to_string()));
        }

        let backend = self.backend().await?;

        let sources = self.retrieve(question, self.config.retrieval.k).await?;
        let context = assemble(&sources);
        let history = assemble_history(history, self.config.retrieval.history_turns);
        let template = self
            .config
            .generation
            .system_template
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_TEMPLATE);
        let request = build_request(template, &context, history, question)?;

        let answer = backend.stream(&request).await?;
        let elapsed = started.elapsed();

        tracing::info!(
            sources = sources.len(),
            history_turns = history.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "answer stream started"
        );

        Ok(RagResponse {
            answer,
            sources,
            elapsed,
        })
    }

    /// Display-only description of the configured provider.
    ///
    /// Never fails and never builds the provider.
    pub fn provider_info(&self) -> ProviderInfo {
        match self.backend.get() {
            Some(backend) => backend.info(),
            None => completion::describe(&self.config.generation),
        }
    }
}
