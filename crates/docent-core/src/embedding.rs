//! Embedding trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! plus pure helpers for vector serialization and squared L2 distance.
//!
//! Concrete backends (fastembed, OpenAI, Ollama) live in the `docent`
//! app crate.

use async_trait::async_trait;

use crate::error::RagError;

/// Converts text into fixed-length vectors.
///
/// Queries must be embedded with the same backend and model that built
/// the passage store; the vectors of different models are not comparable.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;

    /// Embed a single text.
    ///
    /// Fails with [`RagError::Embedding`] when the text is empty after
    /// trimming whitespace.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let normalized = text.trim();
        if normalized.is_empty() {
            return Err(RagError::Embedding("text is empty".to_string()));
        }
        self.embed_batch(&[normalized.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("empty embedding response".to_string()))
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use docent_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Squared Euclidean distance between two vectors.
///
/// This is the `l2` metric vector stores such as Chroma and hnswlib report:
/// no square root is taken. Returns `None` when the lengths differ.
///
/// ```text
/// d(a, b) = Σ (aᵢ - bᵢ)²
/// ```
pub fn squared_l2_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum();
    Some(sum)
}
