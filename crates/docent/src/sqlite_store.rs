//! SQLite-backed [`PassageStore`].
//!
//! One database file can hold several named collections. Each collection
//! row records the embedding model and dimensionality that built it so a
//! query-time embedder can be checked against the corpus before any
//! request is served.
//!
//! Nearest-neighbor search is a brute-force squared L2 scan over the collection,
//! which is adequate for documentation-sized corpora.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use docent_core::embedding::{blob_to_vec, squared_l2_distance, vec_to_blob, Embedder};
use docent_core::models::{Metadata, PassageRecord};
use docent_core::store::{rank_neighbors, Neighbor, PassageStore};
use docent_core::RagError;

use crate::db;
use crate::migrate;

pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
    model: String,
    dims: usize,
}

fn unavailable(err: impl std::fmt::Display) -> RagError {
    RagError::StoreUnavailable(err.to_string())
}

impl SqliteStore {
    /// Open an existing collection for serving.
    ///
    /// Never creates the file or the collection: a missing store surfaces
    /// as [`RagError::StoreUnavailable`] instead of an empty index.
    pub async fn open(path: &Path, collection: &str) -> Result<Self, RagError> {
        let pool = db::open_existing(path).await.map_err(unavailable)?;

        let row = sqlx::query("SELECT model, dims FROM collections WHERE name = ?")
            .bind(collection)
            .fetch_optional(&pool)
            .await
            .map_err(unavailable)?;

        let row = row.ok_or_else(|| {
            RagError::StoreUnavailable(format!(
                "collection '{}' not found in {}",
                collection,
                path.display()
            ))
        })?;

        let model: String = row.try_get("model").map_err(unavailable)?;
        let dims: i64 = row.try_get("dims").map_err(unavailable)?;
        let dims = usize::try_from(dims)
            .ok()
            .filter(|&d| d > 0)
            .ok_or_else(|| {
                RagError::StoreUnavailable(format!(
                    "collection '{}' records invalid dimensionality {}",
                    collection, dims
                ))
            })?;

        Ok(Self {
            pool,
            collection: collection.to_string(),
            model,
            dims,
        })
    }

    /// Create (or re-register) a collection for a corpus build.
    ///
    /// Existing passages are kept; call [`PassageStore::clear`] to rebuild
    /// from scratch.
    pub async fn create(
        path: &Path,
        collection: &str,
        model: &str,
        dims: usize,
    ) -> Result<Self, RagError> {
        let pool = db::connect(path).await.map_err(unavailable)?;
        migrate::run_migrations(&pool).await.map_err(unavailable)?;

        sqlx::query(
            r#"
            INSERT INTO collections (name, model, dims, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims
            "#,
        )
        .bind(collection)
        .bind(model)
        .bind(dims as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&pool)
        .await
        .map_err(unavailable)?;

        Ok(Self {
            pool,
            collection: collection.to_string(),
            model: model.to_string(),
            dims,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Embedding model recorded when the collection was built.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Verify that `embedder` produces vectors comparable with this collection.
    ///
    /// A dimensionality mismatch is an error. A model name mismatch with
    /// equal dimensions is only logged: renamed models are common.
    pub fn check_embedder(&self, embedder: &dyn Embedder) -> Result<(), RagError> {
        if embedder.dims() != self.dims {
            return Err(RagError::Embedding(format!(
                "collection '{}' was built with {} ({} dims) but the query embedder {} produces {} dims",
                self.collection,
                self.model,
                self.dims,
                embedder.model_name(),
                embedder.dims()
            )));
        }
        if embedder.model_name() != self.model {
            tracing::warn!(
                collection = %self.collection,
                store_model = %self.model,
                embedder_model = %embedder.model_name(),
                "embedding model differs from the one that built the collection"
            );
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PassageStore for SqliteStore {
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<Neighbor>, RagError> {
        if embedding.len() != self.dims {
            return Err(RagError::Embedding(format!(
                "query vector has {} dims, collection '{}' has {}",
                embedding.len(),
                self.collection,
                self.dims
            )));
        }

        let rows = sqlx::query(
            "SELECT id, content, metadata_json, embedding FROM passages WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut neighbors = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(unavailable)?;
            let corrupt = |what: String| {
                RagError::StoreUnavailable(format!(
                    "corrupt passage '{}' in collection '{}': {}",
                    id, self.collection, what
                ))
            };

            let blob: Vec<u8> = row.try_get("embedding").map_err(unavailable)?;
            if blob.len() != self.dims * 4 {
                return Err(corrupt(format!(
                    "embedding is {} bytes, expected {}",
                    blob.len(),
                    self.dims * 4
                )));
            }
            let vector = blob_to_vec(&blob);
            let distance = squared_l2_distance(embedding, &vector)
                .ok_or_else(|| corrupt("embedding length mismatch".to_string()))?;

            let metadata_json: String = row.try_get("metadata_json").map_err(unavailable)?;
            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .map_err(|e| corrupt(format!("metadata is not a JSON object: {}", e)))?;

            neighbors.push(Neighbor {
                content: row.try_get("content").map_err(unavailable)?,
                id,
                metadata,
                distance,
            });
        }

        Ok(rank_neighbors(neighbors, k))
    }

    async fn count(&self) -> Result<usize, RagError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM passages WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(n as usize)
    }

    async fn add(&self, records: &[PassageRecord]) -> Result<(), RagError> {
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != self.dims) {
            return Err(RagError::Embedding(format!(
                "passage {} has {} dims, collection '{}' expects {}",
                bad.id,
                bad.embedding.len(),
                self.collection,
                self.dims
            )));
        }

        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        for record in records {
            let metadata_json =
                serde_json::to_string(&record.metadata).map_err(unavailable)?;
            sqlx::query(
                r#"
                INSERT INTO passages (collection, id, content, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    content = excluded.content,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&self.collection)
            .bind(&record.id)
            .bind(&record.content)
            .bind(&metadata_json)
            .bind(vec_to_blob(&record.embedding))
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }
        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), RagError> {
        sqlx::query("DELETE FROM passages WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
