// Qdrant vector store
// Talks to a remote Qdrant server over its REST API


use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};
use url::Url;

use super::{CollectionSpec, Distance, PointRecord, ScoredPoint, VectorStore};
use crate::config::StoreConfig;
use crate::config::settings::QDRANT_URL_VAR;
use crate::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Put,
    Post,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

fn qdrant_distance(distance: Distance) -> &'static str {
    match distance {
        Distance::Cosine => "Cosine",
        Distance::Euclid => "Euclid",
        Distance::Dot => "Dot",
    }
}

/// Pull Qdrant's own error message out of an error body
fn qdrant_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/status/error")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

struct QdrantClient {
    base_url: Url,
    api_key: Option<String>,
    agent: ureq::Agent,
    dimensions: Mutex<HashMap<String, usize>>,
}

impl QdrantClient {
    fn url(&self, segments: &[&str], wait: bool) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                RagError::InvalidConfiguration(format!(
                    "Qdrant URL '{}' cannot be a base",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        if wait {
            url.query_pairs_mut().append_pair("wait", "true");
        }
        Ok(url)
    }

    fn authorize<B>(&self, request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        match &self.api_key {
            Some(key) => request.header("api-key", key.as_str()),
            None => request,
        }
    }

    /// Issue one request and return the status with the raw body.
    ///
    /// Transport failures are mapped here; HTTP status handling is left to
    /// the caller.
    fn request(&self, method: Method, url: &Url, body: Option<&Value>) -> Result<(u16, String)> {
        debug!("{:?} {}", method, url);

        let body = body.map(Value::to_string).unwrap_or_default();
        let result = match method {
            Method::Get => self.authorize(self.agent.get(url.as_str())).call(),
            Method::Put => self
                .authorize(self.agent.put(url.as_str()))
                .header("Content-Type", "application/json")
                .send(body.as_str()),
            Method::Post => self
                .authorize(self.agent.post(url.as_str()))
                .header("Content-Type", "application/json")
                .send(body.as_str()),
        };

        let mut response = match result {
            Ok(response) => response,
            Err(ureq::Error::Timeout(timeout)) => {
                warn!("Qdrant request timed out ({})", timeout);
                return Err(RagError::Timeout(format!("Qdrant request to {}", url)));
            }
            Err(e) => return Err(RagError::VectorStore(format!("Qdrant request failed: {}", e))),
        };

        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string().map_err(|e| match e {
            ureq::Error::Timeout(_) => RagError::Timeout(format!("Qdrant response from {}", url)),
            other => RagError::VectorStore(format!("failed to read Qdrant response: {}", other)),
        })?;
        Ok((status, text))
    }

    /// Like `request` but any non-2xx status is an error
    fn request_ok(
        &self,
        collection: &str,
        method: Method,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<String> {
        match self.request(method, url, body)? {
            (status, text) if (200..300).contains(&status) => Ok(text),
            (404, _) => Err(RagError::CollectionNotFound(collection.to_string())),
            (status, text) => Err(RagError::VectorStore(format!(
                "HTTP {}: {}",
                status,
                qdrant_message(&text)
            ))),
        }
    }

    fn cached_dimension(&self, collection: &str) -> Option<usize> {
        self.dimensions
            .lock()
            .ok()
            .and_then(|cache| cache.get(collection).copied())
    }

    fn remember_dimension(&self, collection: &str, dimension: usize) {
        if let Ok(mut cache) = self.dimensions.lock() {
            cache.insert(collection.to_string(), dimension);
        }
    }

    /// Vector size of an existing collection, `None` if it does not exist
    fn fetch_dimension(&self, collection: &str) -> Result<Option<usize>> {
        let url = self.url(&["collections", collection], false)?;
        let text = match self.request_ok(collection, Method::Get, &url, None) {
            Ok(text) => text,
            Err(RagError::CollectionNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let info: Value = serde_json::from_str(&text)
            .map_err(|e| RagError::VectorStore(format!("invalid collection info: {}", e)))?;
        let size = info
            .pointer("/result/config/params/vectors/size")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                RagError::VectorStore(format!(
                    "collection {} does not use a single unnamed vector",
                    collection
                ))
            })?;
        let size = usize::try_from(size)
            .map_err(|_| RagError::VectorStore(format!("invalid vector size {}", size)))?;

        self.remember_dimension(collection, size);
        Ok(Some(size))
    }

    fn dimension(&self, collection: &str) -> Result<usize> {
        if let Some(size) = self.cached_dimension(collection) {
            return Ok(size);
        }
        self.fetch_dimension(collection)?
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))
    }

    fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        if let Some(existing) = self.fetch_dimension(&spec.name)? {
            debug!(
                "Collection {} already exists with {} dimensions",
                spec.name, existing
            );
            if existing != spec.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: existing,
                    actual: spec.dimension,
                });
            }
            return Ok(());
        }

        info!(
            "Creating collection {} ({} dimensions, {})",
            spec.name, spec.dimension, spec.distance
        );

        let url = self.url(&["collections", &spec.name], false)?;
        let body = json!({
            "vectors": {
                "size": spec.dimension,
                "distance": qdrant_distance(spec.distance),
            }
        });
        self.request_ok(&spec.name, Method::Put, &url, Some(&body))?;
        self.remember_dimension(&spec.name, spec.dimension);
        Ok(())
    }

    fn upsert(&self, collection: &str, points: &[PointRecord]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let dimension = self.dimension(collection)?;
        super::check_dimensions(dimension, points.iter().map(|p| p.vector.as_slice()))?;

        debug!("Upserting {} points into {}", points.len(), collection);

        let url = self.url(&["collections", collection, "points"], true)?;
        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({
                    "id": p.id.to_string(),
                    "vector": p.vector,
                    "payload": p.payload,
                }))
                .collect::<Vec<_>>(),
        });
        self.request_ok(collection, Method::Put, &url, Some(&body))?;
        Ok(())
    }

    fn search(&self, collection: &str, vector: &[f32], top_k: usize) -> Result<Vec<ScoredPoint>> {
        super::validate_top_k(top_k)?;

        let dimension = self.dimension(collection)?;
        super::check_dimensions(dimension, [vector])?;

        let url = self.url(&["collections", collection, "points", "search"], false)?;
        let body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        let text = self.request_ok(collection, Method::Post, &url, Some(&body))?;

        let response: SearchResponse = serde_json::from_str(&text)
            .map_err(|e| RagError::VectorStore(format!("invalid search response: {}", e)))?;

        Ok(response
            .result
            .into_iter()
            .map(|hit| ScoredPoint {
                id: match hit.id {
                    Value::String(id) => id,
                    other => other.to_string(),
                },
                payload: hit.payload.unwrap_or_default(),
                score: hit.score,
            })
            .collect())
    }
}

/// Vector store backed by a remote Qdrant server
#[derive(Clone)]
pub struct QdrantStore {
    client: Arc<QdrantClient>,
}

impl std::fmt::Debug for QdrantStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore")
            .field("base_url", &self.client.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl QdrantStore {
    #[inline]
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let raw_url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| RagError::ConfigurationMissing(vec![QDRANT_URL_VAR.to_string()]))?;

        let base_url = Url::parse(raw_url).map_err(|e| {
            RagError::InvalidConfiguration(format!("invalid Qdrant URL '{}': {}", raw_url, e))
        })?;

        Ok(Self::with_agent(
            base_url,
            config.api_key.clone(),
            config.timeout(),
        ))
    }

    fn with_agent(base_url: Url, api_key: Option<String>, timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            client: Arc::new(QdrantClient {
                base_url,
                api_key: api_key.filter(|key| !key.trim().is_empty()),
                agent,
                dimensions: Mutex::new(HashMap::new()),
            }),
        }
    }

    async fn blocking<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&QdrantClient) -> Result<T> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || call(client.as_ref()))
            .await
            .map_err(|e| RagError::VectorStore(format!("Qdrant task failed: {}", e)))?
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let spec = spec.clone();
        self.blocking(move |client| client.ensure_collection(&spec))
            .await
    }

    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<()> {
        let collection = collection.to_string();
        self.blocking(move |client| client.upsert(&collection, &points))
            .await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        super::validate_top_k(top_k)?;
        let collection = collection.to_string();
        let vector = vector.to_vec();
        self.blocking(move |client| client.search(&collection, &vector, top_k))
            .await
    }
}
