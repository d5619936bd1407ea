#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use docent::completion::{AnswerStream, ChatBackend, ProviderInfo};
use docent_core::embedding::Embedder;
use docent_core::models::{Metadata, PassageRecord};
use docent_core::store::memory::InMemoryStore;
use docent_core::store::{Neighbor, PassageStore};
use docent_core::{CompletionRequest, RagError};

pub const VOCABULARY: [&str; 6] = ["refund", "dispute", "webhook", "payout", "subscription", "api"];

/// Bag-of-keywords embedder: one unit-normalized dimension per vocabulary word.
pub struct KeywordEmbedder;

impl KeywordEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = VOCABULARY
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

pub fn passage(id: &str, title: &str, content: &str) -> PassageRecord {
    let metadata: Metadata = match json!({
        "source": format!("{}.md", id),
        "title": title,
        "category": "Payments",
        "chunk_index": 0,
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    PassageRecord {
        id: id.to_string(),
        content: content.to_string(),
        embedding: KeywordEmbedder::vector(content),
        metadata,
    }
}

pub fn docs_corpus() -> Vec<PassageRecord> {
    vec![
        passage(
            "refunds",
            "Refunds",
            "Refunds: create a refund through the Refunds API by passing the charge or payment intent id.",
        ),
        passage(
            "disputes",
            "Disputes",
            "A dispute occurs when a cardholder questions a payment. Respond to each dispute with evidence.",
        ),
        passage(
            "webhooks",
            "Webhooks",
            "Register a webhook endpoint to receive events. Verify every webhook signature.",
        ),
        passage(
            "payouts",
            "Payouts",
            "A payout moves funds from your balance to your bank account on a schedule.",
        ),
        passage(
            "subscriptions",
            "Subscriptions",
            "A subscription bills a customer on a recurring interval.",
        ),
    ]
}

/// Passage store that counts queries.
pub struct CountingStore {
    inner: InMemoryStore,
    pub queries: AtomicUsize,
}

impl CountingStore {
    pub fn new(records: Vec<PassageRecord>) -> Self {
        Self {
            inner: InMemoryStore::with_records(records),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PassageStore for CountingStore {
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<Neighbor>, RagError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(embedding, k).await
    }

    async fn count(&self) -> Result<usize, RagError> {
        self.inner.count().await
    }

    async fn add(&self, records: &[PassageRecord]) -> Result<(), RagError> {
        self.inner.add(records).await
    }

    async fn clear(&self) -> Result<(), RagError> {
        self.inner.clear().await
    }
}

/// Chat backend that records each request and replies with fixed fragments.
pub struct ScriptedBackend {
    fragments: Vec<Result<String, String>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    pub fn replying(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| Ok(f.to_string())).collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Yields `before`, then fails mid-stream with `message`.
    pub fn failing_after(before: &[&str], message: &str) -> Self {
        let mut fragments: Vec<Result<String, String>> =
            before.iter().map(|f| Ok(f.to_string())).collect();
        fragments.push(Err(message.to_string()));
        Self {
            fragments,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            provider: "Scripted".to_string(),
            model: "scripted-1".to_string(),
        }
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<AnswerStream, RagError> {
        self.requests.lock().unwrap().push(request.clone());
        let items: Vec<Result<String, RagError>> = self
            .fragments
            .iter()
            .map(|f| match f {
                Ok(text) => Ok(text.clone()),
                Err(message) => Err(RagError::provider("scripted", None, message.clone())),
            })
            .collect();
        Ok(AnswerStream::new(futures_util::stream::iter(items)))
    }
}

pub fn no_credentials(_: &str) -> Option<String> {
    None
}

pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
