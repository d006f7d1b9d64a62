// Database module
// Vector store seam shared by ingestion and querying, with a remote Qdrant
// backend and an embedded LanceDB backend


pub mod lancedb;
pub mod qdrant;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::{Config, StoreBackend};
use crate::{RagError, Result};

pub use self::lancedb::LanceStore;
pub use self::qdrant::QdrantStore;

/// Similarity metric fixed for the lifetime of a collection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    #[default]
    Cosine,
    Euclid,
    Dot,
}

impl fmt::Display for Distance {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cosine => "cosine",
            Self::Euclid => "euclid",
            Self::Dot => "dot",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Distance {
    type Err = RagError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclid" | "euclidean" | "l2" => Ok(Self::Euclid),
            "dot" => Ok(Self::Dot),
            other => Err(RagError::InvalidConfiguration(format!(
                "unknown distance metric '{}'",
                other
            ))),
        }
    }
}

/// Identity of a collection: name, vector dimensionality and metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    pub distance: Distance,
}

impl CollectionSpec {
    #[inline]
    pub fn new(name: impl Into<String>, dimension: usize, distance: Distance) -> Self {
        Self {
            name: name.into(),
            dimension,
            distance,
        }
    }
}

/// A record written to the store
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// A record returned by a similarity search, best match first
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub payload: Map<String, Value>,
    /// Higher is more similar
    pub score: f32,
}

/// Remote or embedded vector database.
///
/// `ensure_collection` must have been called for a name before it is used
/// with `upsert` or `search`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection unless it already exists
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()>;

    /// Insert or replace records by id
    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<()>;

    /// Up to `top_k` nearest records, ordered best match first
    async fn search(&self, collection: &str, vector: &[f32], top_k: usize)
    -> Result<Vec<ScoredPoint>>;
}

/// Reject a zero `top_k` before any I/O happens
#[inline]
pub fn validate_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(RagError::InvalidConfiguration(
            "top_k must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Fail with `DimensionMismatch` on the first vector of the wrong length
#[inline]
pub fn check_dimensions<'a>(
    expected: usize,
    vectors: impl IntoIterator<Item = &'a [f32]>,
) -> Result<()> {
    match vectors.into_iter().find(|v| v.len() != expected) {
        Some(vector) => Err(RagError::DimensionMismatch {
            expected,
            actual: vector.len(),
        }),
        None => Ok(()),
    }
}

/// Open the backend selected in the configuration
#[inline]
pub async fn open_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    match config.store.backend {
        StoreBackend::Qdrant => Ok(Arc::new(QdrantStore::new(&config.store)?)),
        StoreBackend::Lancedb => Ok(Arc::new(LanceStore::new(&config.vector_database_path()).await?)),
    }
}
