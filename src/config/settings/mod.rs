
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::RagError;
use crate::database::{CollectionSpec, Distance};
use crate::embeddings::DEFAULT_EMBEDDING_BATCH_SIZE;
use crate::embeddings::chunking::ChunkingConfig;
use crate::indexer::IdStrategy;

pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const QDRANT_URL_VAR: &str = "QDRANT_URL";
pub const QDRANT_API_KEY_VAR: &str = "QDRANT_API_KEY";

/// Vector size produced by `text-embedding-3-small`
pub const DEFAULT_VECTOR_SIZE: usize = 1536;
pub const DEFAULT_COLLECTION: &str = "SIAPE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub batch_size: usize,
    /// Sent as the `dimensions` request field when set
    pub dimensions: Option<usize>,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            dimensions: None,
            timeout_secs: 30,
            retry_attempts: 1,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Qdrant,
    Lancedb,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// LanceDB directory, defaults to `<config dir>/vectors`
    pub path: Option<PathBuf>,
    pub collection: String,
    pub vector_size: usize,
    pub distance: Distance,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Qdrant,
            url: None,
            api_key: None,
            path: None,
            collection: DEFAULT_COLLECTION.to_string(),
            vector_size: DEFAULT_VECTOR_SIZE,
            distance: Distance::Cosine,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    pub input_dir: PathBuf,
    pub upsert_batch_size: usize,
    pub batch_delay_ms: u64,
    pub id_strategy: IdStrategy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("jsons"),
            upsert_batch_size: 50,
            batch_delay_ms: 500,
            id_strategy: IdStrategy::Deterministic,
        }
    }
}

impl IngestConfig {
    #[inline]
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub default_top_k: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            default_top_k: 5,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid batch size: {0} (must be between 1 and 2048)")]
    InvalidBatchSize(usize),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid collection name: {0} (cannot be empty)")]
    InvalidCollection(String),
    #[error("Invalid vector size: {0} (must be between 1 and 65536)")]
    InvalidVectorSize(usize),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Chunk overlap ({overlap}) must be smaller than max tokens ({max_tokens})")]
    InvalidChunking { max_tokens: usize, overlap: usize },
    #[error(
        "Embedding dimensions ({dimensions}) must equal the collection vector size ({vector_size})"
    )]
    DimensionMismatch {
        dimensions: usize,
        vector_size: usize,
    },
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("Invalid default top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl From<ConfigError> for RagError {
    #[inline]
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::Missing(names) => Self::ConfigurationMissing(names),
            ConfigError::Io(e) => Self::Io(e),
            other => Self::InvalidConfiguration(other.to_string()),
        }
    }
}

impl Config {
    /// Default configuration directory
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("jsonrag"))
            .or_else(|| dirs::home_dir().map(|home| home.join(".jsonrag")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Read `config.toml` from `config_dir`, falling back to defaults when it is absent
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let config_path = config_dir.join("config.toml");

        if !config_path.exists() {
            debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(Self {
                base_dir: config_dir.to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.base_dir = config_dir.to_path_buf();
        debug!("Loaded config from {}", config_path.display());

        Ok(config)
    }

    /// Load the file, overlay the process environment and validate.
    ///
    /// This is the only place the environment is consulted.
    #[inline]
    pub fn resolve<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        Self::resolve_with(config_dir, |name| std::env::var(name).ok())
    }

    /// `resolve` with variables taken from `lookup` instead of the process
    #[inline]
    pub fn resolve_with<P, F>(config_dir: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::load(config_dir)?;
        config.apply_env_with(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Overlay credentials and endpoints from `lookup`; blank values are ignored
    #[inline]
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = value(OPENAI_API_KEY_VAR) {
            self.embedding.api_key = Some(key);
        }
        if let Some(url) = value(QDRANT_URL_VAR) {
            self.store.url = Some(url);
        }
        if let Some(key) = value(QDRANT_API_KEY_VAR) {
            self.store.api_key = Some(key);
        }
    }

    /// Report every missing credential or endpoint at once
    #[inline]
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        let is_blank = |value: &Option<String>| value.as_deref().is_none_or(|v| v.trim().is_empty());

        let mut missing = Vec::new();
        if is_blank(&self.embedding.api_key) {
            missing.push(OPENAI_API_KEY_VAR.to_string());
        }
        if self.store.backend == StoreBackend::Qdrant {
            if is_blank(&self.store.url) {
                missing.push(QDRANT_URL_VAR.to_string());
            }
            if is_blank(&self.store.api_key) {
                missing.push(QDRANT_API_KEY_VAR.to_string());
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing))
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.store.validate()?;

        // The collection must hold vectors of the size the model returns
        match self.embedding.dimensions {
            Some(dimensions) if dimensions != self.store.vector_size => {
                return Err(ConfigError::DimensionMismatch {
                    dimensions,
                    vector_size: self.store.vector_size,
                });
            }
            _ => {}
        }

        if self.chunking.overlap >= self.chunking.max_tokens {
            return Err(ConfigError::InvalidChunking {
                max_tokens: self.chunking.max_tokens,
                overlap: self.chunking.overlap,
            });
        }

        if !(1..=10_000).contains(&self.ingest.upsert_batch_size) {
            return Err(ConfigError::InvalidBatchSize(self.ingest.upsert_batch_size));
        }

        self.server
            .bind
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidBindAddress(self.server.bind.clone()))?;

        if !(1..=100).contains(&self.server.default_top_k) {
            return Err(ConfigError::InvalidTopK(self.server.default_top_k));
        }

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the embedded vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.get_base_dir().join("vectors"))
    }

    /// The collection identity shared by ingestion and querying
    #[inline]
    pub fn collection_spec(&self) -> CollectionSpec {
        CollectionSpec::new(
            self.store.collection.clone(),
            self.store.vector_size,
            self.store.distance,
        )
    }

    /// Render the configuration as TOML, without secrets
    #[inline]
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn validate_timeout(timeout_secs: u64) -> Result<(), ConfigError> {
    if !(1..=600).contains(&timeout_secs) {
        return Err(ConfigError::InvalidTimeout(timeout_secs));
    }
    Ok(())
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(1..=2048).contains(&self.batch_size) {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if let Some(dimensions) = self.dimensions {
            if !(1..=65_536).contains(&dimensions) {
                return Err(ConfigError::InvalidVectorSize(dimensions));
            }
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        validate_timeout(self.timeout_secs)
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.url {
            Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
        }

        if self.collection.trim().is_empty() {
            return Err(ConfigError::InvalidCollection(self.collection.clone()));
        }

        if !(1..=65_536).contains(&self.vector_size) {
            return Err(ConfigError::InvalidVectorSize(self.vector_size));
        }

        validate_timeout(self.timeout_secs)
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
