//! Retriever: joins per-tag vector search results against the durable
//! embedding cache to recover chunk text and line ranges.

use std::sync::Arc;

use crate::error::Result;
use crate::storage::VectorTableManager;
use crate::tag;
use crate::traits::EmbeddingProvider;
use crate::types::RetrievedChunk;
use crate::types::Tag;
use crate::embeddings::EmbeddingCache;

/// Retrieves the top-`n` chunks across one or more tags for a query.
pub struct Retriever {
    vector_mgr: Arc<VectorTableManager>,
    cache: Arc<EmbeddingCache>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(vector_mgr: Arc<VectorTableManager>, cache: Arc<EmbeddingCache>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            vector_mgr,
            cache,
            embedder,
        }
    }

    /// Embed `query_text`, search every tag in `tags`, merge the results
    /// by ascending distance, and join against the cache to recover
    /// chunk contents. Returns at most `n` chunks.
    pub async fn retrieve(
        &self,
        query_text: &str,
        n: usize,
        tags: &[Tag],
        filter_directory: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>> {
        if tags.is_empty() || n == 0 {
            return Ok(Vec::new());
        }

        let vectors = self.embedder.embed(&[query_text.to_string()]).await?;
        let query = vectors.into_iter().next().unwrap_or_default();

        // With a directory filter the store post-filters after the
        // vector search, so request a wide candidate set; otherwise the
        // search itself need not return more than `n`.
        let per_tag_limit = if filter_directory.is_some() { 300 } else { n };

        let mut hits = Vec::new();
        for tag in tags {
            let table = tag::sanitize(tag);
            let rows = self.vector_mgr.search(&table, &query, per_tag_limit, filter_directory).await?;
            hits.extend(rows);
        }

        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(n);

        let uuids: Vec<uuid::Uuid> = hits.iter().map(|(row, _)| row.uuid).collect();
        let records = self.cache.select_by_uuids(&uuids)?;
        let by_uuid: std::collections::HashMap<uuid::Uuid, _> =
            records.into_iter().map(|r| (r.uuid, r)).collect();

        let mut out = Vec::with_capacity(hits.len());
        for (row, _distance) in hits.into_iter() {
            let Some(record) = by_uuid.get(&row.uuid) else {
                tracing::warn!(uuid = %row.uuid, "vector row has no matching cache record, skipping");
                continue;
            };
            out.push(RetrievedChunk {
                digest: row.cachekey,
                filepath: row.path,
                start_line: record.start_line,
                end_line: record.end_line,
                content: record.contents.clone(),
                index: 0,
            });
        }
        Ok(out)
    }
}
