//! In-memory [`PassageStore`] implementation for tests and small corpora.
//!
//! Uses a `Vec` behind `std::sync::RwLock`. Queries are brute-force squared L2
//! over every stored vector.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::squared_l2_distance;
use crate::error::RagError;
use crate::models::PassageRecord;

use super::{rank_neighbors, Neighbor, PassageStore};

/// In-memory passage store.
pub struct InMemoryStore {
    passages: RwLock<Vec<PassageRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            passages: RwLock::new(Vec::new()),
        }
    }

    pub fn with_records(records: Vec<PassageRecord>) -> Self {
        Self {
            passages: RwLock::new(records),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> RagError {
    RagError::StoreUnavailable("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl PassageStore for InMemoryStore {
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<Neighbor>, RagError> {
        let passages = self.passages.read().map_err(|_| poisoned())?;
        let mut neighbors = Vec::with_capacity(passages.len());
        for p in passages.iter() {
            let distance = squared_l2_distance(embedding, &p.embedding).ok_or_else(|| {
                RagError::Embedding(format!(
                    "query embedding has {} dims but passage '{}' has {}",
                    embedding.len(),
                    p.id,
                    p.embedding.len()
                ))
            })?;
            neighbors.push(Neighbor {
                id: p.id.clone(),
                content: p.content.clone(),
                metadata: p.metadata.clone(),
                distance,
            });
        }
        Ok(rank_neighbors(neighbors, k))
    }

    async fn count(&self) -> Result<usize, RagError> {
        Ok(self.passages.read().map_err(|_| poisoned())?.len())
    }

    async fn add(&self, records: &[PassageRecord]) -> Result<(), RagError> {
        let mut passages = self.passages.write().map_err(|_| poisoned())?;
        for r in records {
            passages.retain(|p| p.id != r.id);
            passages.push(r.clone());
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), RagError> {
        self.passages.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}
