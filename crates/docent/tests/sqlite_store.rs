mod common;

use std::fs;
use std::path::Path;
use tempfile::TempDir;

use common::{arc, docs_corpus, passage, KeywordEmbedder, ScriptedBackend};
use docent::config::Config;
use docent::ingest::build_store;
use docent::sqlite_store::SqliteStore;
use docent::{Pipeline, RagError};
use docent_core::embedding::Embedder;
use docent_core::store::PassageStore;

async fn seeded_store(path: &Path) -> SqliteStore {
    let store = SqliteStore::create(path, "docs", "keyword", 6).await.unwrap();
    store.add(&docs_corpus()).await.unwrap();
    store
}

#[tokio::test]
async fn test_create_then_open_and_query() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("data").join("docent.sqlite");

    let store = seeded_store(&path).await;
    assert_eq!(store.count().await.unwrap(), 5);
    store.close().await;

    let store = SqliteStore::open(&path, "docs").await.unwrap();
    assert_eq!(store.model(), "keyword");
    assert_eq!(store.dims(), 6);
    assert_eq!(store.count().await.unwrap(), 5);

    let hits = store
        .query(&KeywordEmbedder::vector("refund api"), 2)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "refunds");
    assert_eq!(hits[0].metadata["title"], "Refunds");
    assert_eq!(hits[0].metadata["chunk_index"], 0);
    assert!(hits[0].distance <= hits[1].distance);
}

#[tokio::test]
async fn test_add_replaces_existing_ids() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("docent.sqlite");
    let store = seeded_store(&path).await;

    store
        .add(&[passage("refunds", "Refunds", "Refund policy changed.")])
        .await
        .unwrap();
    assert_eq!(store.count().await.unwrap(), 5);

    let hits = store.query(&KeywordEmbedder::vector("refund"), 1).await.unwrap();
    assert_eq!(hits[0].content, "Refund policy changed.");
}

#[tokio::test]
async fn test_missing_store_is_unavailable_and_not_created() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("absent.sqlite");

    let err = SqliteStore::open(&path, "docs").await.err().unwrap();
    assert!(matches!(err, RagError::StoreUnavailable(_)));
    assert!(!path.exists());
}

#[tokio::test]
async fn test_missing_collection_is_unavailable() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("docent.sqlite");
    seeded_store(&path).await.close().await;

    let err = SqliteStore::open(&path, "other").await.err().unwrap();
    match err {
        RagError::StoreUnavailable(msg) => assert!(msg.contains("other")),
        other => panic!("expected StoreUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_non_store_file_is_unavailable() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("notes.sqlite");
    fs::write(&path, b"").unwrap();

    let err = SqliteStore::open(&path, "docs").await.err().unwrap();
    assert!(matches!(err, RagError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_dimension_mismatches_are_embedding_errors() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("docent.sqlite");
    let store = seeded_store(&path).await;

    let err = store.query(&[1.0, 0.0, 0.0], 4).await.unwrap_err();
    assert!(matches!(err, RagError::Embedding(_)));

    let mut short = passage("short", "Short", "refund");
    short.embedding.truncate(3);
    let err = store.add(&[short]).await.unwrap_err();
    assert!(matches!(err, RagError::Embedding(_)));

    struct Wide;
    #[async_trait::async_trait]
    impl Embedder for Wide {
        fn model_name(&self) -> &str {
            "wide"
        }
        fn dims(&self) -> usize {
            384
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
            Ok(texts.iter().map(|_| vec![0.0; 384]).collect())
        }
    }
    assert!(matches!(
        store.check_embedder(&Wide),
        Err(RagError::Embedding(_))
    ));
    assert!(store.check_embedder(&KeywordEmbedder).is_ok());
}

async fn corrupt(path: &Path, sql: &str) {
    let pool = docent::db::connect(path).await.unwrap();
    sqlx::query(sql).execute(&pool).await.unwrap();
    pool.close().await;
}

#[tokio::test]
async fn test_unparseable_metadata_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("docent.sqlite");
    seeded_store(&path).await.close().await;
    corrupt(
        &path,
        "UPDATE passages SET metadata_json = 'not json' WHERE id = 'refunds'",
    )
    .await;

    let store = SqliteStore::open(&path, "docs").await.unwrap();
    let err = store
        .query(&KeywordEmbedder::vector("refund"), 4)
        .await
        .unwrap_err();
    match err {
        RagError::StoreUnavailable(msg) => assert!(msg.contains("refunds"), "got: {}", msg),
        other => panic!("expected StoreUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_truncated_embedding_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("docent.sqlite");
    seeded_store(&path).await.close().await;
    corrupt(
        &path,
        "UPDATE passages SET embedding = x'0000' WHERE id = 'disputes'",
    )
    .await;

    let store = SqliteStore::open(&path, "docs").await.unwrap();
    let err = store
        .query(&KeywordEmbedder::vector("refund"), 4)
        .await
        .unwrap_err();
    match err {
        RagError::StoreUnavailable(msg) => assert!(msg.contains("disputes"), "got: {}", msg),
        other => panic!("expected StoreUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_recorded_dims_is_unavailable() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("docent.sqlite");
    seeded_store(&path).await.close().await;
    corrupt(&path, "UPDATE collections SET dims = -6 WHERE name = 'docs'").await;

    let err = SqliteStore::open(&path, "docs").await.err().unwrap();
    assert!(matches!(err, RagError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_clear_is_scoped_to_collection() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("docent.sqlite");

    let docs = seeded_store(&path).await;
    let other = SqliteStore::create(&path, "archive", "keyword", 6).await.unwrap();
    other.add(&docs_corpus()[..2]).await.unwrap();

    docs.clear().await.unwrap();
    assert_eq!(docs.count().await.unwrap(), 0);
    assert_eq!(other.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_build_then_ask_over_sqlite() {
    let tmp = TempDir::new().unwrap();
    let docs_dir = tmp.path().join("docs");
    fs::create_dir_all(&docs_dir).unwrap();
    fs::write(
        docs_dir.join("refunds.md"),
        "---\ntitle: Refunds\ncategory: Payments\n---\n\n# Refunds\n\nCreate a refund with the Refunds API.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("disputes.md"),
        "# Disputes\n\nA dispute is raised by the cardholder's bank.",
    )
    .unwrap();
    fs::write(docs_dir.join("webhooks.md"), "Verify each webhook signature.").unwrap();

    let mut config = Config::default();
    config.store.path = tmp.path().join("data").join("docent.sqlite");
    config.ingest.docs_dir = docs_dir;
    config.ingest.batch_size = 2;

    let report = build_store(&config, &KeywordEmbedder).await.unwrap();
    assert_eq!(report.documents, 3);
    assert_eq!(report.passages, 3);
    assert_eq!(report.batches, 2);
    assert_eq!(report.model, "keyword");

    // Rebuilding replaces rather than accumulates.
    let report = build_store(&config, &KeywordEmbedder).await.unwrap();
    assert_eq!(report.passages, 3);

    let backend = arc(ScriptedBackend::replying(&["See the Refunds API."]));
    let pipeline = Pipeline::new(config)
        .with_embedder(arc(KeywordEmbedder))
        .with_backend(backend.clone());

    let response = pipeline
        .ask("How do I process refunds via the API?", &[])
        .await
        .unwrap();
    assert_eq!(response.sources.len(), 3);
    assert_eq!(response.sources[0].title, "Refunds");
    assert_eq!(response.sources[0].category, "Payments");
    assert_eq!(response.sources[1].category, "General");
    assert!(backend.requests()[0]
        .system()
        .content
        .contains("[Source 1: Refunds]"));
}
