// Indexer module
// Turns a folder of JSON documents into embedded, upserted chunks

#[cfg(test)]
mod tests;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use serde_json::{Map, Value, json};
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::database::{CollectionSpec, PointRecord, VectorStore};
use crate::embeddings::{ChunkingConfig, Embedder, chunk_document};
use crate::{RagError, Result};

/// How point ids are assigned to chunks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// UUIDv5 of collection, file name and chunk index; re-ingesting replaces
    #[default]
    Deterministic,
    /// Fresh UUIDv4 per chunk; re-ingesting duplicates
    Random,
}

impl IdStrategy {
    #[inline]
    pub fn point_id(self, collection: &str, source: &str, chunk_index: usize) -> Uuid {
        match self {
            Self::Deterministic => {
                let key = format!("{}/{}#{}", collection, source, chunk_index);
                Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
            }
            Self::Random => Uuid::new_v4(),
        }
    }
}

/// Totals of one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub upserted: usize,
    pub batches: usize,
}

/// Serializes like Python's `json.dumps`: `", "` between items, `": "` after keys
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    #[inline]
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    #[inline]
    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    #[inline]
    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Render a JSON value as one line of text; non-ASCII characters are kept
#[inline]
pub fn flatten_json(value: &Value) -> serde_json::Result<String> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// The `.json` files directly inside `folder`, sorted by path
#[inline]
pub async fn discover_documents(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(folder).await?;
    let mut documents = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json && entry.file_type().await?.is_file() {
            documents.push(path);
        }
    }

    documents.sort();
    Ok(documents)
}

/// Read and flatten one document
#[inline]
pub async fn load_document(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path).await?;
    let document_error = |e: serde_json::Error| RagError::Document {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let value: Value = serde_json::from_str(&raw).map_err(document_error)?;
    flatten_json(&value).map_err(document_error)
}

#[derive(Debug)]
struct PendingChunk {
    source: String,
    index: usize,
    text: String,
}

/// Ingestion pipeline over injected embedding and storage adapters
pub struct Indexer {
    embedder: Embedder,
    store: Arc<dyn VectorStore>,
    collection: CollectionSpec,
    chunking: ChunkingConfig,
    ingest: IngestConfig,
    show_progress: bool,
}

impl Indexer {
    #[inline]
    pub fn new(
        embedder: Embedder,
        store: Arc<dyn VectorStore>,
        collection: CollectionSpec,
        chunking: ChunkingConfig,
        ingest: IngestConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            collection,
            chunking,
            ingest,
            show_progress: console::user_attended_stderr(),
        }
    }

    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn progress_bar(&self, len: usize, template: &str) -> ProgressBar {
        if self.show_progress {
            ProgressBar::new(len as u64).with_style(
                ProgressStyle::with_template(template).expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        }
    }

    /// Ingest every JSON document in `folder`.
    ///
    /// Any failure aborts the run. Batches upserted before the failure stay
    /// in the store.
    #[inline]
    pub async fn run(&self, folder: &Path) -> Result<IngestReport> {
        self.chunking.validate()?;

        let documents = discover_documents(folder).await?;
        info!(
            "Found {} JSON documents in {}",
            documents.len(),
            folder.display()
        );

        let mut report = IngestReport {
            files: documents.len(),
            ..IngestReport::default()
        };

        self.store.ensure_collection(&self.collection).await?;

        let pending = self.chunk_documents(&documents).await?;
        report.chunks = pending.len();
        info!("Total chunks: {}", report.chunks);

        if pending.is_empty() {
            return Ok(report);
        }

        let vectors = self.embed_chunks(&pending).await?;
        report.embedded = vectors.len();

        let ingested_at = Utc::now().to_rfc3339();
        let points: Vec<PointRecord> = pending
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| self.point(chunk, vector, &ingested_at))
            .collect();

        self.upsert_points(&points, &mut report).await?;

        info!(
            "Ingested {} files: {} chunks, {} upserted in {} batches",
            report.files, report.chunks, report.upserted, report.batches
        );
        Ok(report)
    }

    async fn chunk_documents(&self, documents: &[PathBuf]) -> Result<Vec<PendingChunk>> {
        let mut pending = Vec::new();

        for path in documents {
            let text = load_document(path).await?;
            let source = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let chunks = chunk_document(&text, &self.chunking)?;
            debug!("{}: {} chunks", source, chunks.len());

            pending.extend(chunks.into_iter().map(|chunk| PendingChunk {
                source: source.clone(),
                index: chunk.index,
                text: chunk.text,
            }));
        }

        Ok(pending)
    }

    async fn embed_chunks(&self, pending: &[PendingChunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = pending.iter().map(|c| c.text.clone()).collect();
        let bar = self.progress_bar(texts.len(), "{bar:40} {pos}/{len} Embedding {msg}");

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.embedder.batch_size()) {
            let embedder = self.embedder.clone();
            let batch = batch.to_vec();
            let batch_vectors = tokio::task::spawn_blocking(move || embedder.embed(&batch))
                .await
                .map_err(|e| RagError::EmbeddingProvider(format!("embedding task failed: {}", e)))??;
            bar.inc(batch_vectors.len() as u64);
            vectors.extend(batch_vectors);
        }
        bar.finish_and_clear();

        debug!("Embedded {} chunks", vectors.len());
        Ok(vectors)
    }

    fn point(&self, chunk: PendingChunk, vector: Vec<f32>, ingested_at: &str) -> PointRecord {
        let id = self
            .ingest
            .id_strategy
            .point_id(&self.collection.name, &chunk.source, chunk.index);

        let mut payload = Map::new();
        payload.insert("text".to_string(), Value::String(chunk.text));
        payload.insert("source".to_string(), Value::String(chunk.source));
        payload.insert("chunk_index".to_string(), json!(chunk.index));
        payload.insert(
            "ingested_at".to_string(),
            Value::String(ingested_at.to_string()),
        );

        PointRecord {
            id,
            vector,
            payload,
        }
    }

    async fn upsert_points(&self, points: &[PointRecord], report: &mut IngestReport) -> Result<()> {
        let batch_size = self.ingest.upsert_batch_size.max(1);
        let bar = self.progress_bar(points.len(), "{bar:40} {pos}/{len} Upserting {msg}");

        for (batch_number, batch) in points.chunks(batch_size).enumerate() {
            if batch_number > 0 {
                sleep(self.ingest.batch_delay()).await;
            }

            self.store
                .upsert(&self.collection.name, batch.to_vec())
                .await?;

            report.upserted += batch.len();
            report.batches += 1;
            bar.inc(batch.len() as u64);
            debug!(
                "Upserted batch {} ({} points)",
                batch_number + 1,
                batch.len()
            );
        }
        bar.finish_and_clear();

        Ok(())
    }
}
