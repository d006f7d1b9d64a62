use super::*;
use crate::database::Distance;
use crate::embeddings::EmbeddingProvider;
use crate::testing::{MemoryStore, StubProvider, init_tracing};
use std::fs as std_fs;
use tempfile::TempDir;

const DIMENSION: usize = 8;

struct Fixture {
    provider: Arc<StubProvider>,
    store: Arc<MemoryStore>,
    folder: TempDir,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        Self {
            provider: Arc::new(StubProvider::new(DIMENSION)),
            store: Arc::new(MemoryStore::new()),
            folder: TempDir::new().expect("should create temp dir"),
        }
    }

    fn write(&self, name: &str, contents: &str) {
        std_fs::write(self.folder.path().join(name), contents).expect("should write document");
    }

    fn indexer(&self, chunking: ChunkingConfig, ingest: IngestConfig) -> Indexer {
        Indexer::new(
            Embedder::new(Arc::clone(&self.provider) as Arc<dyn EmbeddingProvider>, 10),
            Arc::clone(&self.store) as Arc<dyn VectorStore>,
            CollectionSpec::new("docs", DIMENSION, Distance::Cosine),
            chunking,
            ingest,
        )
        .with_progress(false)
    }

    fn default_indexer(&self) -> Indexer {
        self.indexer(ChunkingConfig::default(), fast_ingest())
    }
}

fn fast_ingest() -> IngestConfig {
    IngestConfig {
        batch_delay_ms: 0,
        ..IngestConfig::default()
    }
}

#[test]
fn flatten_uses_spaced_separators() {
    let value: Value = serde_json::from_str(r#"{"b":[1,2,{"c":null}],"a":"olá"}"#)
        .expect("valid json");

    let flat = flatten_json(&value).expect("should flatten");

    assert_eq!(flat, r#"{"a": "olá", "b": [1, 2, {"c": null}]}"#);
}

#[test]
fn flatten_scalars_and_empty_containers() {
    assert_eq!(flatten_json(&json!("texto")).expect("flatten"), r#""texto""#);
    assert_eq!(flatten_json(&json!({})).expect("flatten"), "{}");
    assert_eq!(flatten_json(&json!([])).expect("flatten"), "[]");
    assert_eq!(
        flatten_json(&json!({"a": "hello world"})).expect("flatten"),
        r#"{"a": "hello world"}"#
    );
}

#[test]
fn deterministic_ids_depend_on_location() {
    let strategy = IdStrategy::Deterministic;

    let first = strategy.point_id("docs", "a.json", 0);
    assert_eq!(first, strategy.point_id("docs", "a.json", 0));
    assert_ne!(first, strategy.point_id("docs", "a.json", 1));
    assert_ne!(first, strategy.point_id("docs", "b.json", 0));
    assert_ne!(first, strategy.point_id("other", "a.json", 0));
}

#[test]
fn random_ids_are_fresh() {
    let strategy = IdStrategy::Random;
    assert_ne!(
        strategy.point_id("docs", "a.json", 0),
        strategy.point_id("docs", "a.json", 0)
    );
}

#[tokio::test]
async fn discovery_keeps_only_json_files_in_order() {
    let fixture = Fixture::new();
    fixture.write("b.json", "{}");
    fixture.write("A.JSON", "{}");
    fixture.write("notes.txt", "ignored");
    fixture.write("data.jsonl", "ignored");
    std_fs::create_dir(fixture.folder.path().join("nested.json")).expect("should create dir");

    let documents = discover_documents(fixture.folder.path())
        .await
        .expect("should discover");

    let names: Vec<String> = documents
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["A.JSON", "b.json"]);
}

#[tokio::test]
async fn missing_folder_is_an_io_error() {
    let fixture = Fixture::new();
    let result = fixture
        .default_indexer()
        .run(&fixture.folder.path().join("absent"))
        .await;

    assert!(matches!(result, Err(RagError::Io(_))));
    assert_eq!(fixture.provider.calls(), 0);
}

#[tokio::test]
async fn single_document_is_ingested() {
    let fixture = Fixture::new();
    fixture.write("doc.json", r#"{"a": "hello world"}"#);

    let report = fixture
        .default_indexer()
        .run(fixture.folder.path())
        .await
        .expect("ingestion should succeed");

    assert_eq!(
        report,
        IngestReport {
            files: 1,
            chunks: 1,
            embedded: 1,
            upserted: 1,
            batches: 1,
        }
    );
    assert_eq!(fixture.store.creates(), 1);
    assert_eq!(fixture.store.upserts(), 1);

    let points = fixture.store.points("docs");
    assert_eq!(points.len(), 1);
    let point = &points[0];
    assert_eq!(point.payload["text"], r#"{"a": "hello world"}"#);
    assert_eq!(point.payload["source"], "doc.json");
    assert_eq!(point.payload["chunk_index"], 0);
    assert!(point.payload.contains_key("ingested_at"));
    assert_eq!(
        point.id,
        IdStrategy::Deterministic.point_id("docs", "doc.json", 0)
    );
}

#[tokio::test]
async fn reingesting_with_deterministic_ids_replaces_records() {
    let fixture = Fixture::new();
    fixture.write("doc.json", r#"{"a": "hello world"}"#);
    let indexer = fixture.default_indexer();

    indexer.run(fixture.folder.path()).await.expect("first run");
    indexer.run(fixture.folder.path()).await.expect("second run");

    assert_eq!(fixture.store.len("docs"), 1);
    assert_eq!(fixture.store.creates(), 1);
}

#[tokio::test]
async fn reingesting_with_random_ids_duplicates_records() {
    let fixture = Fixture::new();
    fixture.write("doc.json", r#"{"a": "hello world"}"#);
    let indexer = fixture.indexer(
        ChunkingConfig::default(),
        IngestConfig {
            id_strategy: IdStrategy::Random,
            ..fast_ingest()
        },
    );

    indexer.run(fixture.folder.path()).await.expect("first run");
    indexer.run(fixture.folder.path()).await.expect("second run");

    assert_eq!(fixture.store.len("docs"), 2);
}

#[tokio::test]
async fn chunks_are_embedded_and_upserted_in_batches() {
    let fixture = Fixture::new();
    let words: Vec<String> = (0..120).map(|i| format!("palavra{i}")).collect();
    let document = json!({"conteudo": words.join(" ")});
    fixture.write("long.json", &document.to_string());
    fixture.write("short.json", r#"{"x": 1}"#);

    let chunking = ChunkingConfig {
        max_tokens: 12,
        overlap: 2,
    };
    let expected_chunks = chunk_document(
        &flatten_json(&document).expect("flatten"),
        &chunking,
    )
    .expect("chunking")
    .len()
        + 1;

    let report = fixture
        .indexer(
            chunking,
            IngestConfig {
                upsert_batch_size: 4,
                ..fast_ingest()
            },
        )
        .run(fixture.folder.path())
        .await
        .expect("ingestion should succeed");

    assert!(expected_chunks > 10);
    assert_eq!(report.files, 2);
    assert_eq!(report.chunks, expected_chunks);
    assert_eq!(report.embedded, expected_chunks);
    assert_eq!(report.upserted, expected_chunks);
    assert_eq!(report.batches, expected_chunks.div_ceil(4));
    assert_eq!(fixture.provider.calls(), expected_chunks.div_ceil(10));
    assert_eq!(fixture.store.upserts(), report.batches);
    assert_eq!(fixture.store.len("docs"), expected_chunks);
}

#[tokio::test]
async fn invalid_document_aborts_before_embedding() {
    let fixture = Fixture::new();
    fixture.write("a.json", r#"{"ok": true}"#);
    fixture.write("b.json", "{not json");

    let result = fixture.default_indexer().run(fixture.folder.path()).await;

    match result {
        Err(RagError::Document { path, .. }) => assert!(path.ends_with("b.json")),
        other => panic!("expected Document error, got {other:?}"),
    }
    assert_eq!(fixture.provider.calls(), 0);
    assert_eq!(fixture.store.upserts(), 0);
}

#[tokio::test]
async fn embedding_failure_aborts_without_upserts() {
    let fixture = Fixture::new();
    fixture.write("doc.json", r#"{"a": "hello world"}"#);
    let indexer = Indexer::new(
        Embedder::new(Arc::new(StubProvider::failing("rate limited")), 10),
        Arc::clone(&fixture.store) as Arc<dyn VectorStore>,
        CollectionSpec::new("docs", DIMENSION, Distance::Cosine),
        ChunkingConfig::default(),
        fast_ingest(),
    )
    .with_progress(false);

    let result = indexer.run(fixture.folder.path()).await;

    assert!(matches!(result, Err(RagError::EmbeddingProvider(_))));
    assert_eq!(fixture.store.upserts(), 0);
}

#[tokio::test]
async fn empty_folder_is_a_successful_zero_run() {
    let fixture = Fixture::new();

    let report = fixture
        .default_indexer()
        .run(fixture.folder.path())
        .await
        .expect("empty run should succeed");

    assert_eq!(report, IngestReport { files: 0, ..IngestReport::default() });
    assert_eq!(fixture.provider.calls(), 0);
    assert_eq!(fixture.store.upserts(), 0);
}

#[tokio::test]
async fn invalid_chunking_fails_before_any_call() {
    let fixture = Fixture::new();
    fixture.write("doc.json", r#"{"a": "hello world"}"#);

    let result = fixture
        .indexer(
            ChunkingConfig {
                max_tokens: 10,
                overlap: 10,
            },
            fast_ingest(),
        )
        .run(fixture.folder.path())
        .await;

    assert!(matches!(result, Err(RagError::InvalidConfiguration(_))));
    assert_eq!(fixture.store.creates(), 0);
    assert_eq!(fixture.provider.calls(), 0);
}
