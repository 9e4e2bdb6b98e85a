//! Trait contracts for the engine's external collaborators.
//!
//! Embedding provider, remote cache, file reader, and chunker are
//! capability-typed and injected; there is no inheritance relationship.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Chunk;
use crate::types::CompleteKind;
use crate::types::FileVersion;

/// A black-box batch embedder.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identity of this provider, used to namespace the embedding cache.
    fn id(&self) -> &str;

    /// Maximum chunk size this provider's chunker should target.
    fn max_chunk_size(&self) -> usize;

    /// Embed a batch of texts. Output length equals input length; each
    /// vector has uniform dimensionality.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Splits file contents into chunks.
pub trait Chunker: Send + Sync {
    /// Chunk `contents` of the file at `path`, whose content digest is
    /// `digest`, targeting chunks no larger than `max_chunk_size`.
    fn chunk(&self, path: &str, contents: &str, max_chunk_size: usize, digest: &str) -> Result<Vec<Chunk>>;
}

/// Reads file contents from the workspace.
#[async_trait]
pub trait FileReader: Send + Sync {
    async fn read(&self, path: &str) -> Result<String>;
}

/// A chunk of precomputed embedding data returned by the remote cache.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChunk {
    pub vector: Vec<f32>,
    pub start_line: i32,
    pub end_line: i32,
    pub contents: String,
}

/// Optional collaborator serving precomputed embeddings by cache-key batch.
#[async_trait]
pub trait RemoteCacheClient: Send + Sync {
    /// Whether the remote cache is currently reachable.
    fn connected(&self) -> bool;

    /// Fetch precomputed chunks for a batch of cache keys.
    async fn get(
        &self,
        keys: &[String],
        label: &str,
        repo_name: &str,
    ) -> Result<std::collections::HashMap<String, Vec<RemoteChunk>>>;
}

/// Callback invoked exactly once per item per applicable result kind,
/// only after the corresponding store write is durable.
pub type MarkCompleteFn = Arc<dyn Fn(Vec<FileVersion>, CompleteKind) + Send + Sync>;
