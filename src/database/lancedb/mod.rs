// LanceDB vector store
// Embedded backend: one table per collection under a local directory


use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{CollectionSpec, Distance, PointRecord, ScoredPoint, VectorStore};
use crate::{RagError, Result};

const DISTANCE_METADATA_KEY: &str = "jsonrag:distance";

fn store_error(context: &str, error: impl std::fmt::Display) -> RagError {
    RagError::VectorStore(format!("{}: {}", context, error))
}

fn distance_type(distance: Distance) -> DistanceType {
    match distance {
        Distance::Cosine => DistanceType::Cosine,
        Distance::Euclid => DistanceType::L2,
        Distance::Dot => DistanceType::Dot,
    }
}

/// Turn a LanceDB distance into a higher-is-better score
fn similarity(distance: Distance, raw: f32) -> f32 {
    match distance {
        Distance::Cosine | Distance::Dot => 1.0 - raw,
        Distance::Euclid => -raw,
    }
}

/// Schema of a collection table; the metric lives in the schema metadata
fn collection_schema(spec: &CollectionSpec) -> Result<SchemaRef> {
    let dimension = i32::try_from(spec.dimension).map_err(|_| {
        RagError::InvalidConfiguration(format!("vector size {} is too large", spec.dimension))
    })?;

    let metadata = HashMap::from([(DISTANCE_METADATA_KEY.to_string(), spec.distance.to_string())]);

    Ok(Arc::new(Schema::new_with_metadata(
        vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
            Field::new("payload", DataType::Utf8, false),
        ],
        metadata,
    )))
}

/// Dimension, metric and vector item field recorded in a table schema
fn describe_schema(schema: &Schema) -> Result<(usize, Distance, Arc<Field>)> {
    let field = schema
        .field_with_name("vector")
        .map_err(|e| store_error("table has no vector column", e))?;

    let DataType::FixedSizeList(item, size) = field.data_type() else {
        return Err(RagError::VectorStore(format!(
            "unexpected vector column type {}",
            field.data_type()
        )));
    };

    let dimension = usize::try_from(*size)
        .map_err(|_| RagError::VectorStore(format!("invalid vector size {}", size)))?;

    let distance = schema
        .metadata()
        .get(DISTANCE_METADATA_KEY)
        .map(|name| name.parse::<Distance>())
        .transpose()?
        .unwrap_or_default();

    Ok((dimension, distance, Arc::clone(item)))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::MalformedRecord(format!("missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::MalformedRecord(format!("invalid {} column type", name)))
}

/// Vector store backed by a local LanceDB directory
#[derive(Clone)]
pub struct LanceStore {
    connection: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for LanceStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LanceStore {
    /// Open (creating if needed) the database directory at `path`
    #[inline]
    pub async fn new(path: &Path) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", path);

        std::fs::create_dir_all(path).map_err(|e| {
            store_error("failed to create vector database directory", e)
        })?;

        let uri = format!("file://{}", path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| store_error("failed to connect to LanceDB", e))?;

        Ok(Self {
            connection,
            path: path.to_path_buf(),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self, collection: &str) -> Result<Table> {
        match self.connection.open_table(collection).execute().await {
            Ok(table) => Ok(table),
            Err(lancedb::Error::TableNotFound { .. }) => {
                Err(RagError::CollectionNotFound(collection.to_string()))
            }
            Err(e) => Err(store_error("failed to open table", e)),
        }
    }

    async fn table_schema(table: &Table) -> Result<SchemaRef> {
        table
            .schema()
            .await
            .map_err(|e| store_error("failed to read table schema", e))
    }

    /// Number of records stored in a collection
    #[inline]
    pub async fn count(&self, collection: &str) -> Result<usize> {
        let table = self.open(collection).await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| store_error("failed to count rows", e))
    }

    fn record_batch(
        schema: SchemaRef,
        item: Arc<Field>,
        dimension: usize,
        points: &[PointRecord],
    ) -> Result<RecordBatch> {
        let size = i32::try_from(dimension)
            .map_err(|_| RagError::VectorStore(format!("invalid vector size {}", dimension)))?;

        let ids: Vec<String> = points.iter().map(|p| p.id.to_string()).collect();
        let payloads = points
            .iter()
            .map(|p| serde_json::to_string(&p.payload))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| store_error("failed to serialize payload", e))?;

        let mut flat_values = Vec::with_capacity(points.len() * dimension);
        for point in points {
            flat_values.extend_from_slice(&point.vector);
        }
        let vectors =
            FixedSizeListArray::try_new(item, size, Arc::new(Float32Array::from(flat_values)), None)
                .map_err(|e| store_error("failed to build vector array", e))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vectors),
            Arc::new(StringArray::from(payloads)),
        ];

        RecordBatch::try_new(schema, arrays)
            .map_err(|e| store_error("failed to build record batch", e))
    }

    fn parse_batch(
        batch: &RecordBatch,
        distance: Distance,
        hits: &mut Vec<ScoredPoint>,
    ) -> Result<()> {
        let ids = string_column(batch, "id")?;
        let payloads = string_column(batch, "payload")?;
        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        for row in 0..batch.num_rows() {
            let payload: Map<String, Value> =
                serde_json::from_str(payloads.value(row)).map_err(|e| {
                    RagError::MalformedRecord(format!(
                        "payload of {} is not a JSON object: {}",
                        ids.value(row),
                        e
                    ))
                })?;

            let raw = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            hits.push(ScoredPoint {
                id: ids.value(row).to_string(),
                payload,
                score: similarity(distance, raw),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl VectorStore for LanceStore {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| store_error("failed to list tables", e))?;

        if table_names.contains(&spec.name) {
            debug!("Table {} already exists", spec.name);
            let table = self.open(&spec.name).await?;
            let schema: SchemaRef = Self::table_schema(&table).await?;
            let (existing, _, _) = describe_schema(&schema)?;
            if existing != spec.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: existing,
                    actual: spec.dimension,
                });
            }
            return Ok(());
        }

        info!(
            "Creating table {} ({} dimensions, {})",
            spec.name, spec.dimension, spec.distance
        );

        self.connection
            .create_empty_table(&spec.name, collection_schema(spec)?)
            .execute()
            .await
            .map_err(|e| store_error("failed to create table", e))?;

        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<PointRecord>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let table = self.open(collection).await?;
        let schema = Self::table_schema(&table).await?;
        let (dimension, _, item) = describe_schema(&schema)?;
        super::check_dimensions(dimension, points.iter().map(|p| p.vector.as_slice()))?;

        debug!("Upserting {} records into {}", points.len(), collection);

        let batch = Self::record_batch(Arc::clone(&schema), item, dimension, &points)?;
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| store_error("failed to upsert records", e))?;

        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        super::validate_top_k(top_k)?;

        let table = self.open(collection).await?;
        let schema = Self::table_schema(&table).await?;
        let (dimension, distance, _) = describe_schema(&schema)?;
        super::check_dimensions(dimension, [vector])?;

        debug!("Searching {} for {} nearest records", collection, top_k);

        let mut results = table
            .vector_search(vector)
            .map_err(|e| store_error("failed to create vector search", e))?
            .column("vector")
            .distance_type(distance_type(distance))
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| store_error("failed to execute search", e))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| store_error("failed to read result stream", e))?
        {
            Self::parse_batch(&batch, distance, &mut hits)?;
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}
