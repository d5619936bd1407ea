//! Corpus build: markdown documents → passages → embeddings → SQLite.
//!
//! The build always rewrites the collection from scratch, so passage ids
//! and the recorded embedding model always describe the current corpus.
//!
//! Each document may start with a frontmatter block of `key: value` lines
//! between `---` markers. Every key becomes passage metadata; `title`
//! defaults to the file stem in title case and `category` to `General`.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use walkdir::WalkDir;

use docent_core::chunk::{neutralize_block_separators, passage_id, split_text};
use docent_core::embedding::Embedder;
use docent_core::models::{Metadata, PassageRecord, DEFAULT_CATEGORY};
use docent_core::store::PassageStore;

use crate::config::{Config, IngestConfig};
use crate::sqlite_store::SqliteStore;

/// A loaded source document.
#[derive(Debug, Clone)]
pub struct SourceDoc {
    /// Path relative to the docs directory, `/`-separated.
    pub source: String,
    pub body: String,
    pub metadata: Metadata,
}

/// A chunked passage awaiting its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPassage {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub collection: String,
    pub model: String,
    pub documents: usize,
    pub passages: usize,
    pub batches: usize,
}

/// Split `---` frontmatter from a document.
///
/// Returns the parsed keys and the trimmed body. Content without a
/// closing marker is treated as having no frontmatter.
pub fn parse_frontmatter(content: &str) -> (Metadata, &str) {
    let mut metadata = Metadata::new();

    let Some(rest) = content.strip_prefix("---") else {
        return (metadata, content);
    };
    let Some(end) = rest.find("---") else {
        return (metadata, content);
    };

    for line in rest[..end].trim().lines() {
        if let Some((key, value)) = line.split_once(':') {
            metadata.insert(
                key.trim().to_string(),
                Value::String(value.trim().to_string()),
            );
        }
    }

    (metadata, rest[end + 3..].trim())
}

/// `"api_keys"` → `"Api Keys"`.
pub fn title_from_stem(stem: &str) -> String {
    let mut out = String::with_capacity(stem.len());
    let mut prev_alpha = false;
    for c in stem.replace('_', " ").chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Load every document under `config.docs_dir` matching `include_globs`,
/// sorted by relative path.
pub fn load_docs(config: &IngestConfig) -> Result<Vec<SourceDoc>> {
    let root = &config.docs_dir;
    if !root.is_dir() {
        bail!("Docs directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let exclude_set = build_globset(&["**/.git/**".to_string()])?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        docs.push(to_source_doc(path, rel_str, &content));
    }

    docs.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(docs)
}

fn to_source_doc(path: &Path, source: String, content: &str) -> SourceDoc {
    let (mut metadata, body) = parse_frontmatter(content);

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    metadata.insert("source".to_string(), Value::String(source.clone()));
    metadata
        .entry("title")
        .or_insert_with(|| Value::String(title_from_stem(&stem)));
    metadata
        .entry("category")
        .or_insert_with(|| Value::String(DEFAULT_CATEGORY.to_string()));

    SourceDoc {
        source,
        body: body.to_string(),
        metadata,
    }
}

/// Split documents into passages with stable, content-derived ids.
pub fn chunk_docs(docs: &[SourceDoc], chunk_size: usize, chunk_overlap: usize) -> Vec<PendingPassage> {
    let mut passages = Vec::new();
    for doc in docs {
        let body = neutralize_block_separators(&doc.body);
        for (i, text) in split_text(&body, chunk_size, chunk_overlap)
            .into_iter()
            .enumerate()
        {
            let mut metadata = doc.metadata.clone();
            metadata.insert("chunk_index".to_string(), Value::from(i as i64));
            passages.push(PendingPassage {
                id: passage_id(&doc.source, i, &text),
                content: text,
                metadata,
            });
        }
    }
    passages
}

/// Rebuild the configured collection from the docs directory.
pub async fn build_store(config: &Config, embedder: &dyn Embedder) -> Result<BuildReport> {
    let ingest = &config.ingest;

    tracing::info!(docs_dir = %ingest.docs_dir.display(), "loading documents");
    let docs = load_docs(ingest)?;
    let passages = chunk_docs(&docs, ingest.chunk_size, ingest.chunk_overlap);
    tracing::info!(
        documents = docs.len(),
        passages = passages.len(),
        "chunked documents"
    );

    let store = SqliteStore::create(
        &config.store.path,
        &config.store.collection,
        embedder.model_name(),
        embedder.dims(),
    )
    .await?;
    store.clear().await?;

    let total_batches = passages.len().div_ceil(ingest.batch_size);
    for (n, batch) in passages.chunks(ingest.batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();
        let vectors = embedder
            .embed_batch(&texts)
            .await
            .with_context(|| format!("Failed to embed batch {}/{}", n + 1, total_batches))?;
        if vectors.len() != batch.len() {
            bail!(
                "Embedder returned {} vectors for {} passages",
                vectors.len(),
                batch.len()
            );
        }

        let records: Vec<PassageRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(p, embedding)| PassageRecord {
                id: p.id.clone(),
                content: p.content.clone(),
                embedding,
                metadata: p.metadata.clone(),
            })
            .collect();
        store.add(&records).await?;
        tracing::info!(batch = n + 1, of = total_batches, "added batch");
    }

    let stored = store.count().await?;
    store.close().await;

    Ok(BuildReport {
        collection: config.store.collection.clone(),
        model: embedder.model_name().to_string(),
        documents: docs.len(),
        passages: stored,
        batches: total_batches,
    })
}
