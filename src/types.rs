//! Core data types shared across the engine.

use uuid::Uuid;

/// A workspace-relative file path paired with the opaque digest that
/// identifies the version of its contents.
pub type FileVersion = (String, String);

/// Opaque triple naming a logical corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub branch: String,
    pub directory: String,
    pub artifact_id: String,
}

/// A row as stored in the per-tag vector table.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRow {
    pub uuid: Uuid,
    pub path: String,
    pub cachekey: String,
    pub vector: Vec<f32>,
}

/// A row as stored in the durable embedding cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub uuid: Uuid,
    pub cache_key: String,
    pub path: String,
    pub artifact_id: String,
    pub vector: Vec<f32>,
    pub start_line: i32,
    pub end_line: i32,
    pub contents: String,
}

/// A chunk emitted by the chunker, prior to embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub filepath: String,
    pub content: String,
    pub start_line: i32,
    pub end_line: i32,
}

/// Four disjoint lists of file versions describing the diff between
/// desired and observed indexing state.
#[derive(Debug, Clone, Default)]
pub struct RefreshResults {
    pub compute: Vec<FileVersion>,
    pub add_tag: Vec<FileVersion>,
    pub remove_tag: Vec<FileVersion>,
    pub del: Vec<FileVersion>,
}

/// Which of the four refresh phases an item was marked complete under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteKind {
    Compute,
    AddTag,
    RemoveTag,
    Delete,
}

/// A progress event emitted by `RefreshCoordinator::update`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateProgress {
    /// Work is ongoing; `fraction` is monotonically non-decreasing and
    /// bounded by 1.
    Step { fraction: f32, message: String },
    /// Terminal event; always `fraction == 1.0`.
    Done,
    /// Terminal event signalling a fatal failure of the whole `update` call.
    Failed { message: String },
}

/// A chunk returned from `Retriever::retrieve`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub digest: String,
    pub filepath: String,
    pub start_line: i32,
    pub end_line: i32,
    pub content: String,
    pub index: usize,
}

/// Serialize a vector as the textual form the embedding cache persists.
pub fn vector_to_text(vector: &[f32]) -> String {
    vector
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse the textual form of a vector back into floats.
pub fn vector_from_text(text: &str) -> Vec<f32> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(',').filter_map(|s| s.parse::<f32>().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_text_round_trips() {
        let original = vec![0.1_f32, -5.25, 0.0, 3.0];
        let text = vector_to_text(&original);
        let back = vector_from_text(&text);
        assert_eq!(original.len(), back.len());
        for (a, b) in original.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn empty_vector_round_trips() {
        assert_eq!(vector_to_text(&[]), "");
        assert!(vector_from_text("").is_empty());
    }
}
