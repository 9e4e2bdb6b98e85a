//! Compute Pipeline: chunk -> embed -> row, with per-file skip policy.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::IndexError;
use crate::error::Result;
use crate::traits::Chunker;
use crate::traits::EmbeddingProvider;
use crate::traits::FileReader;
use crate::types::ChunkRow;
use crate::types::FileVersion;

/// A single chunk, already embedded, ready for insertion into the cache
/// and vector table.
#[derive(Debug, Clone)]
pub struct PipelineChunk {
    pub row: ChunkRow,
    pub start_line: i32,
    pub end_line: i32,
    pub contents: String,
    pub human_desc: String,
}

/// An event produced by the pipeline for one file version.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// One embedded chunk, with overall progress across all items.
    Chunk { progress: f32, chunk: PipelineChunk },
    /// The file has no more chunks; its batch may be flushed.
    EndOfFile { item: FileVersion },
}

/// Chunks, embeds, and bounds the cost of indexing a batch of files.
pub struct ComputePipeline {
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    reader: Arc<dyn FileReader>,
    max_chunk_size: usize,
    max_chunks_per_file: usize,
}

impl ComputePipeline {
    pub fn new(
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn EmbeddingProvider>,
        reader: Arc<dyn FileReader>,
        max_chunk_size: usize,
        max_chunks_per_file: usize,
    ) -> Self {
        Self {
            chunker,
            embedder,
            reader,
            max_chunk_size,
            max_chunks_per_file,
        }
    }

    /// Drive the pipeline over `items`, returning a channel of events.
    /// A fatal provider-contract violation closes the channel with an
    /// error as its final message; per-file skips are logged and simply
    /// produce no events for that item.
    pub fn run(self: Arc<Self>, items: Vec<FileVersion>) -> mpsc::Receiver<Result<PipelineEvent>> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let total = items.len();
            for (i, (path, cachekey)) in items.into_iter().enumerate() {
                match self.process_one(&path, &cachekey, i, total).await {
                    Ok(Some(events)) => {
                        for event in events {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        // Abandoned: empty chunk, oversized file, read
                        // failure, or embedding failure. Already logged
                        // by process_one. No events for this item.
                    }
                    Err(fatal) => {
                        let _ = tx.send(Err(fatal)).await;
                        return;
                    }
                }
            }
        });
        rx
    }

    /// Process a single file. `Ok(None)` means the file was abandoned
    /// per the skip rules; `Err` means a fatal contract violation.
    async fn process_one(
        &self,
        path: &str,
        cachekey: &str,
        index: usize,
        total: usize,
    ) -> Result<Option<Vec<PipelineEvent>>> {
        let contents = match self.reader.read(path).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path, error = %e, "failed to read file, skipping");
                return Ok(None);
            }
        };

        let chunks = match self.chunker.chunk(path, &contents, self.max_chunk_size, cachekey) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path, error = %e, "chunker failed, skipping file");
                return Ok(None);
            }
        };

        if chunks.iter().any(|c| c.content.is_empty()) {
            tracing::warn!(path, "file produced an empty chunk, skipping");
            return Ok(None);
        }
        if chunks.len() > self.max_chunks_per_file {
            tracing::warn!(
                path,
                chunk_count = chunks.len(),
                limit = self.max_chunks_per_file,
                "file exceeds chunk-count limit, skipping"
            );
            return Ok(None);
        }
        if chunks.is_empty() {
            return Ok(Some(vec![PipelineEvent::EndOfFile {
                item: (path.to_string(), cachekey.to_string()),
            }]));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = match self.embedder.embed(&texts).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(path, error = %e, "embedding failed, skipping file");
                return Ok(None);
            }
        };

        if vectors.len() != chunks.len() {
            return Err(IndexError::ProviderContractViolation {
                detail: format!(
                    "embed() returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                ),
            });
        }

        let num_chunks = chunks.len();
        let mut events = Vec::with_capacity(num_chunks + 1);
        for (j, (chunk, vector)) in chunks.into_iter().zip(vectors.into_iter()).enumerate() {
            let progress = (index as f32 + (j + 1) as f32 / num_chunks as f32) / total as f32;
            events.push(PipelineEvent::Chunk {
                progress,
                chunk: PipelineChunk {
                    row: ChunkRow {
                        uuid: Uuid::new_v4(),
                        path: path.to_string(),
                        cachekey: cachekey.to_string(),
                        vector,
                    },
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    contents: chunk.content,
                    human_desc: format!("{path}:{}-{}", chunk.start_line, chunk.end_line),
                },
            });
        }
        events.push(PipelineEvent::EndOfFile {
            item: (path.to_string(), cachekey.to_string()),
        });
        Ok(Some(events))
    }
}
