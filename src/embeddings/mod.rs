//! Durable and remote caches of computed embeddings.

pub mod cache;

pub use cache::EmbeddingCache;
