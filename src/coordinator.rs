//! Refresh Coordinator: drives the four-phase incremental update
//! protocol and streams progress back to the caller.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::compute::ComputePipeline;
use crate::compute::PipelineEvent;
use crate::error::Result;
use crate::storage::VectorTableManager;
use crate::tag;
use crate::traits::Chunker;
use crate::traits::EmbeddingProvider;
use crate::traits::FileReader;
use crate::traits::MarkCompleteFn;
use crate::traits::RemoteCacheClient;
use crate::types::CacheRecord;
use crate::types::ChunkRow;
use crate::types::CompleteKind;
use crate::types::FileVersion;
use crate::types::RefreshResults;
use crate::types::Tag;
use crate::types::UpdateProgress;
use crate::embeddings::EmbeddingCache;

/// The remaining progress range shared by add-tag, remove-tag/delete,
/// and delete-from-cache, after local compute has consumed 90%.
const TAIL_POOL: f32 = 0.10;
const TAIL_PHASE_SHARE: f32 = TAIL_POOL / 3.0;

/// Drives `update()` over the four stateful stores described in the
/// data model: the per-tag vector table, the durable embedding cache,
/// the optional remote cache, and the filesystem (via the injected
/// reader/chunker/embedder).
pub struct RefreshCoordinator {
    vector_store_path: PathBuf,
    dimension: i32,
    cache: Arc<EmbeddingCache>,
    remote_cache: Option<Arc<dyn RemoteCacheClient>>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
    reader: Arc<dyn FileReader>,
    max_chunk_size: usize,
    max_chunks_per_file: usize,
    artifact_id: String,
}

impl RefreshCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vector_store_path: PathBuf,
        dimension: i32,
        cache: Arc<EmbeddingCache>,
        remote_cache: Option<Arc<dyn RemoteCacheClient>>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: Arc<dyn Chunker>,
        reader: Arc<dyn FileReader>,
        max_chunk_size: usize,
        max_chunks_per_file: usize,
        artifact_id: String,
    ) -> Self {
        Self {
            vector_store_path,
            dimension,
            cache,
            remote_cache,
            embedder,
            chunker,
            reader,
            max_chunk_size,
            max_chunks_per_file,
            artifact_id,
        }
    }

    /// Run the refresh protocol for `tag`, emitting progress events as a
    /// lazy sequence. The consumer pulls at its own pace; dropping the
    /// receiver suspends the coordinator at its next yield.
    pub fn update(
        self: Arc<Self>,
        tag: Tag,
        results: RefreshResults,
        mark_complete: MarkCompleteFn,
        repo_name: String,
    ) -> mpsc::Receiver<UpdateProgress> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            if let Err(e) = self.run(tag, results, mark_complete, repo_name, &tx).await {
                tracing::warn!(error = %e, "update call failed");
                let _ = tx.send(UpdateProgress::Failed { message: e.to_string() }).await;
            }
        });
        rx
    }

    async fn run(
        &self,
        tag: Tag,
        results: RefreshResults,
        mark_complete: MarkCompleteFn,
        repo_name: String,
        tx: &mpsc::Sender<UpdateProgress>,
    ) -> Result<()> {
        let table_name = tag::sanitize(&tag);

        // 1. Open the vector store; note whether the table already exists.
        let vector_mgr = VectorTableManager::open(&self.vector_store_path, self.dimension).await?;
        let table_existed = vector_mgr.table_exists(&table_name).await?;
        tracing::debug!(table = %table_name, table_existed, "opened vector store for update");

        // 2. The embedding cache's schema/migrations are applied once at
        // cache-open time (see EmbeddingCache::open); the handle here is
        // the same process-wide instance.

        // 3. Remote short-circuit.
        let mut compute = results.compute.clone();
        if let Some(remote) = &self.remote_cache {
            if remote.connected() {
                self.try_remote_short_circuit(remote, &mut compute, &table_name, &vector_mgr, &mark_complete, &repo_name)
                    .await?;
            }
        }

        // 4. Local compute.
        self.run_local_compute(compute, &table_name, &vector_mgr, &mark_complete, tx).await?;

        // 5. Add-tag.
        self.run_add_tag(&results, &table_name, &vector_mgr, &mark_complete, tx).await?;

        // 6. Remove-tag and delete from table.
        self.run_remove_tag_and_delete_from_table(&results, &table_name, &vector_mgr, &mark_complete, tx)
            .await?;

        // 7. Delete from cache.
        self.run_delete_from_cache(&results, &mark_complete, tx).await?;

        // 8. Terminal event.
        let _ = tx.send(UpdateProgress::Done).await;
        Ok(())
    }

    async fn try_remote_short_circuit(
        &self,
        remote: &Arc<dyn RemoteCacheClient>,
        compute: &mut Vec<FileVersion>,
        table_name: &str,
        vector_mgr: &VectorTableManager,
        mark_complete: &MarkCompleteFn,
        repo_name: &str,
    ) -> Result<()> {
        let keys: Vec<String> = compute.iter().map(|(_, k)| k.clone()).collect();
        let lookup: HashMap<String, FileVersion> =
            compute.iter().map(|item| (item.1.clone(), item.clone())).collect();

        let response = match remote.get(&keys, "embeddings", repo_name).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "remote cache unavailable; falling back to local compute");
                return Ok(());
            }
        };

        let mut handled: HashSet<FileVersion> = HashSet::new();
        for (cache_key, chunks) in response {
            // Resolve back to the original request tuple rather than a
            // tuple synthesized from the response, preserving upstream
            // object identity for markComplete.
            let item = match lookup.get(&cache_key) {
                Some(item) => item.clone(),
                None => {
                    tracing::warn!(cache_key = %cache_key, "remote cache returned an unknown cache key");
                    continue;
                }
            };

            let mut rows = Vec::with_capacity(chunks.len());
            for remote_chunk in &chunks {
                let uuid = Uuid::new_v4();
                let record = CacheRecord {
                    uuid,
                    cache_key: item.1.clone(),
                    path: item.0.clone(),
                    artifact_id: self.artifact_id.clone(),
                    vector: remote_chunk.vector.clone(),
                    start_line: remote_chunk.start_line,
                    end_line: remote_chunk.end_line,
                    contents: remote_chunk.contents.clone(),
                };
                self.cache.insert(&record)?;
                rows.push(ChunkRow {
                    uuid,
                    path: item.0.clone(),
                    cachekey: item.1.clone(),
                    vector: remote_chunk.vector.clone(),
                });
            }
            vector_mgr.add_rows(table_name, &rows).await?;
            mark_complete(vec![item.clone()], CompleteKind::Compute);
            handled.insert(item);
        }

        compute.retain(|item| !handled.contains(item));
        Ok(())
    }

    async fn run_local_compute(
        &self,
        compute: Vec<FileVersion>,
        table_name: &str,
        vector_mgr: &VectorTableManager,
        mark_complete: &MarkCompleteFn,
        tx: &mpsc::Sender<UpdateProgress>,
    ) -> Result<()> {
        if compute.is_empty() {
            return Ok(());
        }

        let pipeline = Arc::new(ComputePipeline::new(
            self.chunker.clone(),
            self.embedder.clone(),
            self.reader.clone(),
            self.max_chunk_size,
            self.max_chunks_per_file,
        ));
        let mut rx = pipeline.run(compute);

        let mut batch: Vec<ChunkRow> = Vec::new();
        while let Some(event) = rx.recv().await {
            match event? {
                PipelineEvent::Chunk { progress, chunk } => {
                    let record = CacheRecord {
                        uuid: chunk.row.uuid,
                        cache_key: chunk.row.cachekey.clone(),
                        path: chunk.row.path.clone(),
                        artifact_id: self.artifact_id.clone(),
                        vector: chunk.row.vector.clone(),
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        contents: chunk.contents,
                    };
                    // Cache insert precedes vector-table insert within a file.
                    self.cache.insert(&record)?;
                    batch.push(chunk.row);

                    let _ = tx
                        .send(UpdateProgress::Step {
                            fraction: progress * 0.9,
                            message: chunk.human_desc,
                        })
                        .await;
                }
                PipelineEvent::EndOfFile { item } => {
                    vector_mgr.add_rows(table_name, &batch).await?;
                    batch.clear();
                    mark_complete(vec![item], CompleteKind::Compute);
                }
            }
        }
        Ok(())
    }

    async fn run_add_tag(
        &self,
        results: &RefreshResults,
        table_name: &str,
        vector_mgr: &VectorTableManager,
        mark_complete: &MarkCompleteFn,
        tx: &mpsc::Sender<UpdateProgress>,
    ) -> Result<()> {
        let n = results.add_tag.len();
        for (idx, (path, cachekey)) in results.add_tag.iter().enumerate() {
            let records = self.cache.select_by_key(&self.artifact_id, cachekey, path)?;
            let rows: Vec<ChunkRow> = records
                .into_iter()
                .map(|r| ChunkRow {
                    uuid: r.uuid,
                    path: r.path,
                    cachekey: r.cache_key,
                    vector: r.vector,
                })
                .collect();
            vector_mgr.add_rows(table_name, &rows).await?;
            mark_complete(vec![(path.clone(), cachekey.clone())], CompleteKind::AddTag);

            let fraction = 0.9 + TAIL_PHASE_SHARE * ((idx + 1) as f32 / n as f32);
            let _ = tx
                .send(UpdateProgress::Step {
                    fraction,
                    message: format!("add-tag {path}"),
                })
                .await;
        }
        Ok(())
    }

    async fn run_remove_tag_and_delete_from_table(
        &self,
        results: &RefreshResults,
        table_name: &str,
        vector_mgr: &VectorTableManager,
        mark_complete: &MarkCompleteFn,
        tx: &mpsc::Sender<UpdateProgress>,
    ) -> Result<()> {
        let union: Vec<FileVersion> = results
            .remove_tag
            .iter()
            .chain(results.del.iter())
            .cloned()
            .collect();
        if union.is_empty() {
            return Ok(());
        }

        vector_mgr.delete_where(table_name, &union).await?;

        // Every item in the union just left this tag's table, so every
        // item (removeTag-only or del) is marked RemoveTag here; del
        // items additionally get a Delete completion once their cache
        // records are removed in the next phase.
        let n = union.len();
        let base = 0.9 + TAIL_PHASE_SHARE;
        for (idx, item) in union.iter().enumerate() {
            mark_complete(vec![item.clone()], CompleteKind::RemoveTag);
            let fraction = base + TAIL_PHASE_SHARE * ((idx + 1) as f32 / n as f32);
            let _ = tx
                .send(UpdateProgress::Step {
                    fraction,
                    message: format!("remove-tag/delete-from-table {}", item.0),
                })
                .await;
        }
        Ok(())
    }

    async fn run_delete_from_cache(
        &self,
        results: &RefreshResults,
        mark_complete: &MarkCompleteFn,
        tx: &mpsc::Sender<UpdateProgress>,
    ) -> Result<()> {
        let n = results.del.len();
        if n == 0 {
            return Ok(());
        }

        let base = 0.9 + 2.0 * TAIL_PHASE_SHARE;
        for (idx, (path, cachekey)) in results.del.iter().enumerate() {
            self.cache.delete(&self.artifact_id, cachekey, path)?;
            mark_complete(vec![(path.clone(), cachekey.clone())], CompleteKind::Delete);

            let fraction = base + TAIL_PHASE_SHARE * ((idx + 1) as f32 / n as f32);
            let _ = tx
                .send(UpdateProgress::Step {
                    fraction,
                    message: format!("delete-from-cache {path}"),
                })
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::RemoteChunk;
    use crate::types::Chunk;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FixedChunker {
        chunks_by_path: HashMap<String, Vec<Chunk>>,
    }
    impl Chunker for FixedChunker {
        fn chunk(&self, path: &str, _contents: &str, _max: usize, _digest: &str) -> Result<Vec<Chunk>> {
            Ok(self.chunks_by_path.get(path).cloned().unwrap_or_default())
        }
    }

    struct MapReader {
        contents_by_path: HashMap<String, String>,
    }
    #[async_trait]
    impl FileReader for MapReader {
        async fn read(&self, path: &str) -> Result<String> {
            Ok(self.contents_by_path.get(path).cloned().unwrap_or_default())
        }
    }

    struct StubEmbedder {
        dim: usize,
    }
    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        fn id(&self) -> &str {
            "stub"
        }
        fn max_chunk_size(&self) -> usize {
            512
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.1; self.dim]).collect())
        }
    }

    struct PartialRemote {
        answers: HashMap<String, Vec<RemoteChunk>>,
    }
    #[async_trait]
    impl RemoteCacheClient for PartialRemote {
        fn connected(&self) -> bool {
            true
        }
        async fn get(&self, keys: &[String], _label: &str, _repo_name: &str) -> Result<HashMap<String, Vec<RemoteChunk>>> {
            Ok(self
                .answers
                .iter()
                .filter(|(k, _)| keys.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }
    }

    fn chunk(start: i32, end: i32, content: &str) -> Chunk {
        Chunk {
            filepath: "a.ts".to_string(),
            content: content.to_string(),
            start_line: start,
            end_line: end,
        }
    }

    fn test_tag() -> Tag {
        Tag {
            branch: "main".to_string(),
            directory: "".to_string(),
            artifact_id: "vectordb::p1".to_string(),
        }
    }

    type Completions = Arc<Mutex<Vec<(Vec<FileVersion>, CompleteKind)>>>;

    fn recording_mark_complete() -> (MarkCompleteFn, Completions) {
        let log: Completions = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let f: MarkCompleteFn = Arc::new(move |items, kind| {
            log2.lock().unwrap().push((items, kind));
        });
        (f, log)
    }

    async fn drain_progress(mut rx: mpsc::Receiver<UpdateProgress>) -> Vec<UpdateProgress> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    fn coordinator(
        dir: &TempDir,
        chunks_by_path: HashMap<String, Vec<Chunk>>,
        contents_by_path: HashMap<String, String>,
        remote: Option<Arc<dyn RemoteCacheClient>>,
    ) -> (Arc<RefreshCoordinator>, Arc<EmbeddingCache>) {
        let cache = Arc::new(EmbeddingCache::open(&dir.path().join("cache.db")).unwrap());
        let coordinator = Arc::new(RefreshCoordinator::new(
            dir.path().join("vectors"),
            3,
            cache.clone(),
            remote,
            Arc::new(StubEmbedder { dim: 3 }),
            Arc::new(FixedChunker { chunks_by_path }),
            Arc::new(MapReader { contents_by_path }),
            512,
            20,
            "vectordb::p1".to_string(),
        ));
        (coordinator, cache)
    }

    #[tokio::test]
    async fn fresh_index_one_file() {
        let dir = TempDir::new().unwrap();
        let mut chunks_by_path = HashMap::new();
        chunks_by_path.insert(
            "a.ts".to_string(),
            vec![chunk(1, 5, "fn a() {}"), chunk(6, 10, "fn b() {}")],
        );
        let (coordinator, cache) = coordinator(&dir, chunks_by_path, HashMap::new(), None);

        let (mark_complete, log) = recording_mark_complete();
        let results = RefreshResults {
            compute: vec![("a.ts".to_string(), "k1".to_string())],
            ..Default::default()
        };
        let rx = coordinator.update(test_tag(), results, mark_complete, "repo".to_string());
        let events = drain_progress(rx).await;

        assert!(matches!(events.last().unwrap(), UpdateProgress::Done));
        assert_eq!(
            cache.select_by_key("vectordb::p1", "k1", "a.ts").unwrap().len(),
            2
        );
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].1, CompleteKind::Compute);
    }

    #[tokio::test]
    async fn add_tag_reuses_cached_embeddings() {
        let dir = TempDir::new().unwrap();
        let mut chunks_by_path = HashMap::new();
        chunks_by_path.insert("a.ts".to_string(), vec![chunk(1, 5, "fn a() {}")]);
        let (coordinator, cache) = coordinator(&dir, chunks_by_path, HashMap::new(), None);

        let (mark_complete, _log) = recording_mark_complete();
        let compute_results = RefreshResults {
            compute: vec![("a.ts".to_string(), "k1".to_string())],
            ..Default::default()
        };
        drain_progress(coordinator.clone().update(test_tag(), compute_results, mark_complete, "repo".to_string())).await;
        assert_eq!(cache.select_by_key("vectordb::p1", "k1", "a.ts").unwrap().len(), 1);

        let other_tag = Tag {
            branch: "feature".to_string(),
            directory: "".to_string(),
            artifact_id: "vectordb::p1".to_string(),
        };
        let (mark_complete2, log2) = recording_mark_complete();
        let add_tag_results = RefreshResults {
            add_tag: vec![("a.ts".to_string(), "k1".to_string())],
            ..Default::default()
        };
        let rx = coordinator.update(other_tag, add_tag_results, mark_complete2, "repo".to_string());
        let events = drain_progress(rx).await;
        assert!(matches!(events.last().unwrap(), UpdateProgress::Done));

        let log2 = log2.lock().unwrap();
        assert_eq!(log2.len(), 1);
        assert_eq!(log2[0].1, CompleteKind::AddTag);
    }

    #[tokio::test]
    async fn remote_short_circuit_handles_part_of_the_batch_locally() {
        let dir = TempDir::new().unwrap();
        let mut chunks_by_path = HashMap::new();
        chunks_by_path.insert("b.ts".to_string(), vec![chunk(1, 2, "fn b() {}")]);

        let mut answers = HashMap::new();
        answers.insert(
            "k1".to_string(),
            vec![RemoteChunk {
                vector: vec![0.5, 0.5, 0.5],
                start_line: 1,
                end_line: 3,
                contents: "remote chunk".to_string(),
            }],
        );
        let remote: Arc<dyn RemoteCacheClient> = Arc::new(PartialRemote { answers });

        let (coordinator, cache) = coordinator(&dir, chunks_by_path, HashMap::new(), Some(remote));
        let (mark_complete, log) = recording_mark_complete();
        let results = RefreshResults {
            compute: vec![
                ("a.ts".to_string(), "k1".to_string()),
                ("b.ts".to_string(), "k2".to_string()),
            ],
            ..Default::default()
        };
        let rx = coordinator.update(test_tag(), results, mark_complete, "repo".to_string());
        let events = drain_progress(rx).await;
        assert!(matches!(events.last().unwrap(), UpdateProgress::Done));

        assert_eq!(cache.select_by_key("vectordb::p1", "k1", "a.ts").unwrap().len(), 1);
        assert_eq!(cache.select_by_key("vectordb::p1", "k2", "b.ts").unwrap().len(), 1);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|(_, kind)| *kind == CompleteKind::Compute));
    }

    #[tokio::test]
    async fn oversized_file_is_never_marked_complete() {
        let dir = TempDir::new().unwrap();
        let mut chunks_by_path = HashMap::new();
        let many: Vec<Chunk> = (0..25).map(|i| chunk(i, i, "x")).collect();
        chunks_by_path.insert("big.ts".to_string(), many);
        let (coordinator, cache) = coordinator(&dir, chunks_by_path, HashMap::new(), None);

        let (mark_complete, log) = recording_mark_complete();
        let results = RefreshResults {
            compute: vec![("big.ts".to_string(), "k1".to_string())],
            ..Default::default()
        };
        let rx = coordinator.update(test_tag(), results, mark_complete, "repo".to_string());
        let events = drain_progress(rx).await;
        assert!(matches!(events.last().unwrap(), UpdateProgress::Done));

        assert!(cache.select_by_key("vectordb::p1", "k1", "big.ts").unwrap().is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_from_table_and_cache_and_fires_both_completions() {
        let dir = TempDir::new().unwrap();
        let mut chunks_by_path = HashMap::new();
        chunks_by_path.insert("a.ts".to_string(), vec![chunk(1, 5, "fn a() {}")]);
        let (coordinator, cache) = coordinator(&dir, chunks_by_path, HashMap::new(), None);

        let (mark_complete, _log) = recording_mark_complete();
        let compute_results = RefreshResults {
            compute: vec![("a.ts".to_string(), "k1".to_string())],
            ..Default::default()
        };
        drain_progress(coordinator.clone().update(test_tag(), compute_results, mark_complete, "repo".to_string())).await;

        let (mark_complete2, log2) = recording_mark_complete();
        let del_results = RefreshResults {
            del: vec![("a.ts".to_string(), "k1".to_string())],
            ..Default::default()
        };
        let rx = coordinator.update(test_tag(), del_results, mark_complete2, "repo".to_string());
        let events = drain_progress(rx).await;
        assert!(matches!(events.last().unwrap(), UpdateProgress::Done));

        assert!(cache.select_by_key("vectordb::p1", "k1", "a.ts").unwrap().is_empty());
        let log2 = log2.lock().unwrap();
        assert_eq!(log2.len(), 2);
        assert!(log2.iter().any(|(_, k)| *k == CompleteKind::RemoveTag));
        assert!(log2.iter().any(|(_, k)| *k == CompleteKind::Delete));
    }

    #[tokio::test]
    async fn empty_results_still_produce_a_terminal_event() {
        let dir = TempDir::new().unwrap();
        let (coordinator, _cache) = coordinator(&dir, HashMap::new(), HashMap::new(), None);

        let (mark_complete, log) = recording_mark_complete();
        let rx = coordinator.update(test_tag(), RefreshResults::default(), mark_complete, "repo".to_string());
        let events = drain_progress(rx).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], UpdateProgress::Done));
        assert!(log.lock().unwrap().is_empty());
    }
}
