//! A tag-scoped vector index: chunk, embed, and incrementally refresh a
//! per-tag LanceDB table, backed by a durable SQLite cache of computed
//! embeddings and an optional remote cache short-circuit.

pub mod compute;
pub mod config;
pub mod coordinator;
pub mod embeddings;
pub mod error;
pub mod remote_cache;
pub mod retriever;
pub mod storage;
pub mod tag;
pub mod traits;
pub mod types;

pub use config::IndexConfig;
pub use coordinator::RefreshCoordinator;
pub use error::IndexError;
pub use error::Result;
pub use retriever::Retriever;
pub use storage::VectorTableManager;
pub use traits::Chunker;
pub use traits::EmbeddingProvider;
pub use traits::FileReader;
pub use traits::MarkCompleteFn;
pub use traits::RemoteCacheClient;
pub use traits::RemoteChunk;
pub use types::CacheRecord;
pub use types::Chunk;
pub use types::ChunkRow;
pub use types::CompleteKind;
pub use types::FileVersion;
pub use types::RefreshResults;
pub use types::RetrievedChunk;
pub use types::Tag;
pub use types::UpdateProgress;
pub use embeddings::EmbeddingCache;
pub use remote_cache::HttpRemoteCacheClient;
