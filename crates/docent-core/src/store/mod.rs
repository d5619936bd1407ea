//! Passage store abstraction.
//!
//! The [`PassageStore`] trait is the boundary to the pre-built passage
//! index: nearest-neighbor lookup by embedding at serve time, plus the
//! write operations the corpus build needs. Backends must be
//! `Send + Sync`; one handle is shared by all concurrent requests.

pub mod memory;

use async_trait::async_trait;

use crate::error::RagError;
use crate::models::{Metadata, PassageRecord};

/// One nearest-neighbor hit, in the store's native shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    /// Squared L2 distance from the query vector (lower is closer).
    pub distance: f64,
}

/// Abstract passage index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`query`](PassageStore::query) | k nearest passages to a vector, nearest first |
/// | [`count`](PassageStore::count) | number of passages held |
/// | [`add`](PassageStore::add) | insert or replace passages (corpus build) |
/// | [`clear`](PassageStore::clear) | drop every passage (corpus build) |
#[async_trait]
pub trait PassageStore: Send + Sync {
    /// Return up to `k` passages nearest to `embedding` by squared L2 distance.
    ///
    /// Results are ordered nearest first; equal distances are ordered by
    /// passage id so repeated queries are reproducible.
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<Neighbor>, RagError>;

    /// Number of passages in the store.
    async fn count(&self) -> Result<usize, RagError>;

    /// Insert passages, replacing any with the same id.
    async fn add(&self, records: &[PassageRecord]) -> Result<(), RagError>;

    /// Remove every passage.
    async fn clear(&self) -> Result<(), RagError>;
}

/// Order neighbors nearest first, ties broken by id, then keep `k`.
pub fn rank_neighbors(mut neighbors: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    neighbors.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    neighbors.truncate(k);
    neighbors
}
