// In-process stand-ins for the embedding provider and the vector store

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::database::{CollectionSpec, Distance, PointRecord, ScoredPoint, VectorStore};
use crate::embeddings::EmbeddingProvider;
use crate::{RagError, Result};

/// Route `RUST_LOG` output through the test harness
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic vector for a text: byte histogram folded into `dimension` buckets
pub(crate) fn text_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dimension];
    for (i, byte) in text.bytes().enumerate() {
        vector[(usize::from(byte) + i) % dimension] += 1.0;
    }
    if vector.iter().all(|v| *v == 0.0) {
        vector[0] = 1.0;
    }
    vector
}

pub(crate) struct StubProvider {
    dimension: usize,
    fail_with: Option<String>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
}

impl StubProvider {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fail_with: None,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new(4)
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn inputs(&self) -> Vec<String> {
        self.inputs.lock().expect("inputs lock").clone()
    }
}

impl EmbeddingProvider for StubProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(RagError::EmbeddingProvider(message.clone()));
        }
        self.inputs
            .lock()
            .expect("inputs lock")
            .extend(texts.iter().cloned());
        Ok(texts
            .iter()
            .map(|t| text_vector(t, self.dimension))
            .collect())
    }

    fn model(&self) -> &str {
        "stub-model"
    }
}

#[derive(Debug, Clone)]
struct MemoryCollection {
    spec: CollectionSpec,
    points: HashMap<String, PointRecord>,
}

/// Brute-force vector store kept in memory
#[derive(Default)]
pub(crate) struct MemoryStore {
    collections: Mutex<HashMap<String, MemoryCollection>>,
    creates: AtomicUsize,
    upserts: AtomicUsize,
    searches: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub(crate) fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub(crate) fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub(crate) fn len(&self, collection: &str) -> usize {
        let collections = self.collections.lock().expect("collections lock");
        collections.get(collection).map_or(0, |c| c.points.len())
    }

    pub(crate) fn points(&self, collection: &str) -> Vec<PointRecord> {
        let collections = self.collections.lock().expect("collections lock");
        let mut points: Vec<PointRecord> = collections
            .get(collection)
            .map(|c| c.points.values().cloned().collect())
            .unwrap_or_default();
        points.sort_by_key(|p| p.id);
        points
    }
}

fn score(distance: Distance, a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match distance {
        Distance::Dot => dot,
        Distance::Cosine => {
            let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
            let denom = norm(a) * norm(b);
            if denom == 0.0 { 0.0 } else { dot / denom }
        }
        Distance::Euclid => -a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let mut collections = self.collections.lock().expect("collections lock");
        if let Some(existing) = collections.get(&spec.name) {
            if existing.spec.dimension != spec.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: existing.spec.dimension,
                    actual: spec.dimension,
                });
            }
            return Ok(());
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        collections.insert(
            spec.name.clone(),
            MemoryCollection {
                spec: spec.clone(),
                points: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.lock().expect("collections lock");
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))?;
        crate::database::check_dimensions(
            target.spec.dimension,
            points.iter().map(|p| p.vector.as_slice()),
        )?;
        for point in points {
            target.points.insert(point.id.to_string(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        crate::database::validate_top_k(top_k)?;
        let collections = self.collections.lock().expect("collections lock");
        let target = collections
            .get(collection)
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))?;
        crate::database::check_dimensions(target.spec.dimension, [vector])?;

        let mut hits: Vec<ScoredPoint> = target
            .points
            .iter()
            .map(|(id, point)| ScoredPoint {
                id: id.clone(),
                payload: point.payload.clone(),
                score: score(target.spec.distance, vector, &point.vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_k);
        Ok(hits)
    }
}
