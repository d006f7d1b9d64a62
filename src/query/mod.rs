// Query module
// Question in, ranked chunk texts out


use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::database::{ScoredPoint, VectorStore, validate_top_k};
use crate::embeddings::Embedder;
use crate::{RagError, Result};

pub const DEFAULT_TOP_K: usize = 5;

/// One ranked result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
}

impl TryFrom<ScoredPoint> for SearchHit {
    type Error = RagError;

    #[inline]
    fn try_from(point: ScoredPoint) -> Result<Self> {
        match point.payload.get("text") {
            Some(Value::String(text)) => Ok(Self {
                text: text.clone(),
                score: point.score,
            }),
            Some(_) => Err(RagError::MalformedRecord(format!(
                "record {} has a non-string text field",
                point.id
            ))),
            None => Err(RagError::MalformedRecord(format!(
                "record {} has no text field",
                point.id
            ))),
        }
    }
}

/// Read-only search over one collection
#[derive(Clone)]
pub struct QueryService {
    embedder: Embedder,
    store: Arc<dyn VectorStore>,
    collection: String,
}

impl std::fmt::Debug for QueryService {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("embedder", &self.embedder)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl QueryService {
    #[inline]
    pub fn new(embedder: Embedder, store: Arc<dyn VectorStore>, collection: impl Into<String>) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
        }
    }

    #[inline]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Up to `top_k` chunks most similar to `question`, best first
    #[inline]
    pub async fn search_query(&self, question: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        validate_top_k(top_k)?;

        debug!("Searching {} for top {} hits", self.collection, top_k);

        let embedder = self.embedder.clone();
        let question = question.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed_one(&question))
            .await
            .map_err(|e| RagError::EmbeddingProvider(format!("embedding task failed: {}", e)))??;

        let points = self.store.search(&self.collection, &vector, top_k).await?;

        points.into_iter().map(SearchHit::try_from).collect()
    }
}
