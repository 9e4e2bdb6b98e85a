//! Configuration for the vector-index engine.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::IndexError;
use crate::error::Result;

/// Name of the environment variable the embedding API key is sourced
/// from. Never read from the TOML file itself.
const API_KEY_ENV_VAR: &str = "VECTORDB_EMBEDDING_API_KEY";

/// Name of the project-local config file, searched for under the
/// working directory before falling back to the user's home directory.
const CONFIG_FILE_NAME: &str = "vectordb.toml";

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfig {
    /// Directory under which the vector store and embedding cache live.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Embedding provider configuration.
    pub embedding: EmbeddingConfig,

    /// Chunking policy.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Optional remote cache of precomputed embeddings.
    #[serde(default)]
    pub remote_cache: Option<RemoteCacheConfig>,

    /// Embedding-cache storage settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            remote_cache: None,
            cache: CacheConfig::default(),
        }
    }
}

impl IndexConfig {
    /// Validate configuration values.
    ///
    /// Ensures all numeric values are positive, preventing division by
    /// zero in progress-fraction math and nonsensical batch sizes.
    pub fn validate(&self) -> Result<()> {
        self.embedding.validate()?;
        self.chunking.validate()?;
        self.cache.validate()?;
        Ok(())
    }

    /// Load configuration: a project-local `vectordb.toml` under
    /// `workdir`, falling back to one in the user's home directory, and
    /// falling back further to built-in defaults if neither exists. The
    /// embedding API key is never read from either file; it is overlaid
    /// afterward from `VECTORDB_EMBEDDING_API_KEY`.
    pub fn load(workdir: &Path) -> Result<Self> {
        let project_file = workdir.join(CONFIG_FILE_NAME);
        let mut cfg = if project_file.is_file() {
            Self::from_file(&project_file)?
        } else if let Some(global_file) = dirs::home_dir().map(|h| h.join(".vectordb").join(CONFIG_FILE_NAME)) {
            if global_file.is_file() {
                Self::from_file(&global_file)?
            } else {
                Self::default()
            }
        } else {
            Self::default()
        };

        cfg.embedding.api_key = std::env::var(API_KEY_ENV_VAR).ok();
        Ok(cfg)
    }

    /// Parse configuration from a specific TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| IndexError::ConfigError {
            field: "<file>".to_string(),
            cause: format!("failed to read {}: {e}", path.display()),
        })?;
        toml::from_str(&text).map_err(|e| IndexError::ConfigError {
            field: "<file>".to_string(),
            cause: format!("failed to parse {}: {e}", path.display()),
        })
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vectordb")
        .join("retrieval")
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider identity, e.g. `"text-embedding-3-small"`.
    pub provider_id: String,

    /// Output vector dimension.
    #[serde(default = "default_embedding_dimension")]
    pub dimension: i32,

    /// Batch size for embed() calls.
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: i32,

    /// API base URL (optional; defaults to the provider's own default).
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key, sourced from `VECTORDB_EMBEDDING_API_KEY` at load time
    /// rather than the config file. Never deserialized from TOML.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider_id: default_embedding_provider_id(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            base_url: None,
            api_key: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dimension <= 0 {
            return Err(IndexError::ConfigError {
                field: "embedding.dimension".to_string(),
                cause: format!("must be positive, got {}", self.dimension),
            });
        }
        if self.batch_size <= 0 {
            return Err(IndexError::ConfigError {
                field: "embedding.batch_size".to_string(),
                cause: format!("must be positive, got {}", self.batch_size),
            });
        }
        Ok(())
    }

    /// The artifact identifier this provider's vectors are isolated under.
    pub fn artifact_id(&self) -> String {
        format!("vectordb::{}", self.provider_id)
    }
}

pub fn default_embedding_dimension() -> i32 {
    1536
}
fn default_embedding_batch_size() -> i32 {
    100
}
fn default_embedding_provider_id() -> String {
    "text-embedding-3-small".to_string()
}

/// Chunking policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    /// Maximum chunk size (in the units the chunker interprets, e.g. tokens).
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: i32,

    /// Files chunking into more than this many chunks are skipped.
    #[serde(default = "default_max_chunks_per_file")]
    pub max_chunks_per_file: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            max_chunks_per_file: default_max_chunks_per_file(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size <= 0 {
            return Err(IndexError::ConfigError {
                field: "chunking.max_chunk_size".to_string(),
                cause: format!("must be positive, got {}", self.max_chunk_size),
            });
        }
        if self.max_chunks_per_file == 0 {
            return Err(IndexError::ConfigError {
                field: "chunking.max_chunks_per_file".to_string(),
                cause: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn default_max_chunk_size() -> i32 {
    512
}
fn default_max_chunks_per_file() -> usize {
    20
}

/// Remote cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteCacheConfig {
    /// Base URL of the remote cache service.
    pub base_url: String,

    /// Repository identifier sent with every request.
    pub repo_name: String,
}

/// Embedding-cache storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// SQLite file name within `data_dir`.
    #[serde(default = "default_cache_file_name")]
    pub file_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file_name: default_cache_file_name(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.file_name.trim().is_empty() {
            return Err(IndexError::ConfigError {
                field: "cache.file_name".to_string(),
                cause: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn default_cache_file_name() -> String {
    "embeddings.sqlite3".to_string()
}
