// Embeddings module
// Token-window chunking plus the embedding provider seam and its batching adapter


pub mod chunking;
pub mod openai;

use std::sync::Arc;

use tracing::debug;

use crate::{RagError, Result};

pub use chunking::{ChunkingConfig, TextChunk, chunk_document, chunk_text, count_tokens, tokenize};
pub use openai::OpenAiClient;

pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 10;

/// A remote model turning texts into fixed-length vectors.
///
/// Implementations receive at most one batch at a time and must return one
/// vector per input, in input order.
pub trait EmbeddingProvider: Send + Sync {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn model(&self) -> &str;
}

/// Batching front for an [`EmbeddingProvider`]
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl std::fmt::Debug for Embedder {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.provider.model())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Embedder {
    #[inline]
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
        }
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[inline]
    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Embed every text, one vector per input in the same order.
    ///
    /// Inputs are sent in batches of at most `batch_size`. A failing batch
    /// fails the whole call and nothing is returned.
    #[inline]
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Embedding {} texts in batches of {}",
            texts.len(),
            self.batch_size
        );

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let batch_vectors = self.provider.embed_batch(batch)?;
            if batch_vectors.len() != batch.len() {
                return Err(RagError::EmbeddingProvider(format!(
                    "provider returned {} embeddings for {} inputs",
                    batch_vectors.len(),
                    batch.len()
                )));
            }
            vectors.extend(batch_vectors);
        }

        Ok(vectors)
    }

    /// Embed a single text
    #[inline]
    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .pop()
            .ok_or_else(|| RagError::EmbeddingProvider("provider returned no embedding".into()))
    }
}
