//! Vector Table Manager: lazy per-tag table creation, batched insert,
//! and predicate delete backed by LanceDB.
//!
//! State machine per tag: Absent -> Created on first non-empty insert
//! into a previously non-existent table, or Existing if the table was
//! discovered already present at update start.

use std::path::Path;
use std::sync::Arc;

use arrow::array::Array;
use arrow::array::FixedSizeListArray;
use arrow::array::Float32Array;
use arrow::array::RecordBatch;
use arrow::array::StringArray;
use arrow::datatypes::DataType;
use arrow::datatypes::Field;
use arrow::datatypes::Schema;
use futures::StreamExt;
use lancedb::connection::Connection;
use lancedb::query::ExecutableQuery;
use lancedb::query::QueryBase;

use crate::error::IndexError;
use crate::error::Result;
use crate::types::ChunkRow;
use crate::types::FileVersion;

/// Escape a literal for safe interpolation into a LanceDB predicate
/// string, by doubling embedded single quotes.
fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Per-tag vector table manager over a single LanceDB database.
pub struct VectorTableManager {
    db: Arc<Connection>,
    dimension: i32,
}

impl VectorTableManager {
    /// Open (or create) the LanceDB database at `path`.
    pub async fn open(path: &Path, dimension: i32) -> Result<Self> {
        let uri = path.to_string_lossy().to_string();
        let db = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| IndexError::VectorStoreConnectionFailed {
                uri: uri.clone(),
                cause: e.to_string(),
            })?;

        Ok(Self {
            db: Arc::new(db),
            dimension,
        })
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("uuid", DataType::Utf8, false),
            Field::new("path", DataType::Utf8, false),
            Field::new("cachekey", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// Whether a table with this name already exists.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let tables = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| IndexError::VectorTableFailed {
                table: table.to_string(),
                cause: e.to_string(),
            })?;
        Ok(tables.contains(&table.to_string()))
    }

    async fn get_or_create_table(&self, table: &str) -> Result<lancedb::Table> {
        if self.table_exists(table).await? {
            self.db
                .open_table(table)
                .execute()
                .await
                .map_err(|e| IndexError::VectorTableFailed {
                    table: table.to_string(),
                    cause: e.to_string(),
                })
        } else {
            let schema = Arc::new(self.schema());
            let empty = RecordBatch::new_empty(schema.clone());
            let reader = arrow::record_batch::RecordBatchIterator::new(vec![Ok(empty)], schema);
            self.db
                .create_table(table, reader)
                .execute()
                .await
                .map_err(|e| IndexError::VectorTableFailed {
                    table: table.to_string(),
                    cause: e.to_string(),
                })
        }
    }

    fn rows_to_batch(&self, rows: &[ChunkRow]) -> Result<RecordBatch> {
        let uuids: Vec<String> = rows.iter().map(|r| r.uuid.to_string()).collect();
        let paths: Vec<&str> = rows.iter().map(|r| r.path.as_str()).collect();
        let cachekeys: Vec<&str> = rows.iter().map(|r| r.cachekey.as_str()).collect();

        let dim = self.dimension as usize;
        let mut values: Vec<f32> = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            let mut v = row.vector.clone();
            v.resize(dim, 0.0);
            values.extend(v);
        }
        let values_array = Float32Array::from(values);
        let item_field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(item_field, self.dimension, Arc::new(values_array), None)
            .map_err(|e| IndexError::VectorTableFailed {
                table: "<batch>".to_string(),
                cause: e.to_string(),
            })?;

        let schema = Arc::new(self.schema());
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(uuids)),
                Arc::new(StringArray::from(paths)),
                Arc::new(StringArray::from(cachekeys)),
                Arc::new(vector_array),
            ],
        )
        .map_err(|e| IndexError::VectorTableFailed {
            table: "<batch>".to_string(),
            cause: e.to_string(),
        })
    }

    fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<ChunkRow>> {
        let uuids = batch
            .column_by_name("uuid")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| IndexError::VectorTableFailed {
                table: "<result>".to_string(),
                cause: "missing uuid column".to_string(),
            })?;
        let paths = batch
            .column_by_name("path")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| IndexError::VectorTableFailed {
                table: "<result>".to_string(),
                cause: "missing path column".to_string(),
            })?;
        let cachekeys = batch
            .column_by_name("cachekey")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| IndexError::VectorTableFailed {
                table: "<result>".to_string(),
                cause: "missing cachekey column".to_string(),
            })?;
        let vectors = batch
            .column_by_name("vector")
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());

        let mut rows = Vec::with_capacity(batch.num_rows());
        for i in 0..batch.num_rows() {
            let uuid = uuid::Uuid::parse_str(uuids.value(i)).map_err(|e| IndexError::VectorTableFailed {
                table: "<result>".to_string(),
                cause: e.to_string(),
            })?;
            let vector = vectors
                .map(|arr| {
                    let values = arr.value(i);
                    values
                        .as_any()
                        .downcast_ref::<Float32Array>()
                        .map(|a| a.values().to_vec())
                        .unwrap_or_default()
                })
                .unwrap_or_default();

            rows.push(ChunkRow {
                uuid,
                path: paths.value(i).to_string(),
                cachekey: cachekeys.value(i).to_string(),
                vector,
            });
        }
        Ok(rows)
    }

    /// Insert `rows` into `table`, creating the table lazily if absent.
    /// A no-op on an empty `rows` still succeeds (the caller still marks
    /// the item complete).
    pub async fn add_rows(&self, table: &str, rows: &[ChunkRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let handle = self.get_or_create_table(table).await?;
        let batch = self.rows_to_batch(rows)?;
        let schema = batch.schema();
        let reader = arrow::record_batch::RecordBatchIterator::new(vec![Ok(batch)], schema);

        handle
            .add(reader)
            .execute()
            .await
            .map_err(|e| IndexError::VectorTableFailed {
                table: table.to_string(),
                cause: e.to_string(),
            })
    }

    /// Delete every row whose `(cachekey, path)` matches one of `items`.
    /// A no-op (and not an error) if the table does not exist.
    pub async fn delete_where(&self, table: &str, items: &[FileVersion]) -> Result<()> {
        if items.is_empty() || !self.table_exists(table).await? {
            return Ok(());
        }

        let handle = self
            .db
            .open_table(table)
            .execute()
            .await
            .map_err(|e| IndexError::VectorTableFailed {
                table: table.to_string(),
                cause: e.to_string(),
            })?;

        let predicate = items
            .iter()
            .map(|(path, cachekey)| {
                format!(
                    "(cachekey = '{}' AND path = '{}')",
                    escape_literal(cachekey),
                    escape_literal(path)
                )
            })
            .collect::<Vec<_>>()
            .join(" OR ");

        handle
            .delete(&predicate)
            .await
            .map_err(|e| IndexError::VectorTableFailed {
                table: table.to_string(),
                cause: e.to_string(),
            })
    }

    /// Vector similarity search, optionally restricted to paths under a
    /// directory prefix. Returns rows paired with their `_distance`.
    /// Missing tables yield an empty result.
    pub async fn search(
        &self,
        table: &str,
        query: &[f32],
        limit: usize,
        path_prefix: Option<&str>,
    ) -> Result<Vec<(ChunkRow, f32)>> {
        if query.len() != self.dimension as usize {
            return Err(IndexError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: query.len() as i32,
            });
        }
        if !self.table_exists(table).await? {
            return Ok(Vec::new());
        }

        let handle = self
            .db
            .open_table(table)
            .execute()
            .await
            .map_err(|e| IndexError::VectorTableFailed {
                table: table.to_string(),
                cause: e.to_string(),
            })?;

        let mut builder = handle
            .vector_search(query.to_vec())
            .map_err(|e| IndexError::VectorTableFailed {
                table: table.to_string(),
                cause: e.to_string(),
            })?
            .limit(limit);

        if let Some(prefix) = path_prefix {
            let predicate = format!("path LIKE '{}%'", escape_literal(prefix));
            builder = builder.only_if(predicate);
        }

        let mut stream = builder.execute().await.map_err(|e| IndexError::VectorTableFailed {
            table: table.to_string(),
            cause: e.to_string(),
        })?;

        let mut out = Vec::new();
        while let Some(batch) = stream.next().await {
            let batch = batch.map_err(|e| IndexError::VectorTableFailed {
                table: table.to_string(),
                cause: e.to_string(),
            })?;
            let rows = Self::batch_to_rows(&batch)?;
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            for (i, row) in rows.into_iter().enumerate() {
                let distance = distances.map(|d| d.value(i)).unwrap_or(f32::MAX);
                out.push((row, distance));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn row(path: &str, cachekey: &str, vector: Vec<f32>) -> ChunkRow {
        ChunkRow {
            uuid: Uuid::new_v4(),
            path: path.to_string(),
            cachekey: cachekey.to_string(),
            vector,
        }
    }

    #[tokio::test]
    async fn lazily_creates_table_on_first_insert() {
        let dir = TempDir::new().unwrap();
        let mgr = VectorTableManager::open(dir.path(), 3).await.unwrap();
        assert!(!mgr.table_exists("t1").await.unwrap());

        mgr.add_rows("t1", &[row("a.ts", "k1", vec![0.1, 0.2, 0.3])])
            .await
            .unwrap();
        assert!(mgr.table_exists("t1").await.unwrap());
    }

    #[tokio::test]
    async fn empty_add_rows_is_noop_and_does_not_create_table() {
        let dir = TempDir::new().unwrap();
        let mgr = VectorTableManager::open(dir.path(), 3).await.unwrap();
        mgr.add_rows("t1", &[]).await.unwrap();
        assert!(!mgr.table_exists("t1").await.unwrap());
    }

    #[tokio::test]
    async fn delete_where_removes_matching_rows_only() {
        let dir = TempDir::new().unwrap();
        let mgr = VectorTableManager::open(dir.path(), 2).await.unwrap();
        mgr.add_rows(
            "t1",
            &[
                row("a.ts", "k1", vec![1.0, 0.0]),
                row("b.ts", "k2", vec![0.0, 1.0]),
            ],
        )
        .await
        .unwrap();

        mgr.delete_where("t1", &[("a.ts".to_string(), "k1".to_string())])
            .await
            .unwrap();

        let remaining = mgr.search("t1", &[0.0, 1.0], 10, None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0.path, "b.ts");
    }

    #[tokio::test]
    async fn delete_where_on_missing_table_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let mgr = VectorTableManager::open(dir.path(), 2).await.unwrap();
        mgr.delete_where("missing", &[("a.ts".to_string(), "k1".to_string())])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn search_on_missing_table_returns_empty() {
        let dir = TempDir::new().unwrap();
        let mgr = VectorTableManager::open(dir.path(), 2).await.unwrap();
        let results = mgr.search("missing", &[1.0, 0.0], 5, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_rejects_mismatched_dimension() {
        let dir = TempDir::new().unwrap();
        let mgr = VectorTableManager::open(dir.path(), 3).await.unwrap();
        let err = mgr.search("t1", &[1.0, 0.0], 5, None).await.unwrap_err();
        assert!(matches!(err, IndexError::EmbeddingDimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn path_prefix_restricts_search_results() {
        let dir = TempDir::new().unwrap();
        let mgr = VectorTableManager::open(dir.path(), 2).await.unwrap();
        mgr.add_rows(
            "t1",
            &[
                row("src/a.ts", "k1", vec![1.0, 0.0]),
                row("docs/b.ts", "k2", vec![1.0, 0.0]),
            ],
        )
        .await
        .unwrap();

        let results = mgr.search("t1", &[1.0, 0.0], 300, Some("src/")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.path, "src/a.ts");
    }
}
