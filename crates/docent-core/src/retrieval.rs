//! Query-time retrieval: embed, nearest-neighbor lookup, similarity scoring.
//!
//! # Scoring
//!
//! The store reports a squared L2 distance `d ≥ 0` per hit. It is converted to a
//! similarity with
//!
//! ```text
//! s = 1 / (1 + d)        rounded to 3 decimal places
//! ```
//!
//! so `s ∈ (0, 1]`, `s = 1` for an identical vector, and `s` decreases
//! monotonically as distance grows. No re-ranking happens here: the order
//! of the result is the store's nearest-first order.

use crate::embedding::Embedder;
use crate::error::RagError;
use crate::models::{
    Metadata, RetrievedPassage, DEFAULT_CATEGORY, DEFAULT_SOURCE, DEFAULT_TITLE,
};
use crate::store::{Neighbor, PassageStore};

/// Default number of passages retrieved per question.
pub const DEFAULT_K: usize = 4;

/// Default similarity threshold (see [`RetrievalParams::min_score`]).
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.3;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Maximum passages to return. Must be at least 1.
    pub k: usize,
    /// When set, passages scoring below this value are dropped.
    ///
    /// `None` keeps every passage the store returns, however weak.
    pub min_score: Option<f64>,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            min_score: None,
        }
    }
}

/// Convert a squared L2 distance into a similarity score in `(0, 1]`.
pub fn distance_to_similarity(distance: f64) -> f64 {
    let d = if distance.is_finite() {
        distance.max(0.0)
    } else {
        f64::MAX
    };
    let raw = 1.0 / (1.0 + d);
    let rounded = (raw * 1000.0).round() / 1000.0;
    // Very distant hits would otherwise round to exactly 0.
    rounded.max(0.001)
}

/// Retrieve the `k` passages most similar to `query`.
///
/// # Errors
///
/// - [`RagError::InvalidRequest`] when `k` is 0.
/// - [`RagError::Embedding`] when the query is blank or cannot be embedded.
/// - [`RagError::StoreUnavailable`] when the store cannot be queried.
pub async fn retrieve(
    store: &dyn PassageStore,
    embedder: &dyn Embedder,
    query: &str,
    params: &RetrievalParams,
) -> Result<Vec<RetrievedPassage>, RagError> {
    if params.k == 0 {
        return Err(RagError::InvalidRequest("k must be >= 1".to_string()));
    }

    let query_vec = embedder.embed(query).await?;
    let neighbors = store.query(&query_vec, params.k).await?;

    let mut passages: Vec<RetrievedPassage> = neighbors
        .into_iter()
        .take(params.k)
        .map(to_retrieved)
        .collect();

    if let Some(min) = params.min_score {
        passages.retain(|p| p.score >= min);
    }

    Ok(passages)
}

fn to_retrieved(n: Neighbor) -> RetrievedPassage {
    let score = distance_to_similarity(n.distance);
    RetrievedPassage {
        source: str_field(&n.metadata, "source", DEFAULT_SOURCE),
        title: str_field(&n.metadata, "title", DEFAULT_TITLE),
        category: str_field(&n.metadata, "category", DEFAULT_CATEGORY),
        chunk_index: n.metadata.get("chunk_index").and_then(|v| v.as_i64()),
        id: n.id,
        content: n.content,
        score,
    }
}

fn str_field(metadata: &Metadata, key: &str, default: &str) -> String {
    match metadata.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}
