//! Durable embedding cache, backed by SQLite.
//!
//! Append-mostly: a row is written once, keyed by `uuid`, and never
//! updated. `artifact_id` isolates vectors produced by distinct
//! embedding providers within the same database file.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::params;
use uuid::Uuid;

use crate::error::IndexError;
use crate::error::Result;
use crate::types::CacheRecord;
use crate::types::vector_from_text;
use crate::types::vector_to_text;

/// Table name for the durable embedding cache, matching the host
/// config's persisted-layout convention.
const TABLE_NAME: &str = "lance_db_cache";

/// Durable key-value store of chunk rows, keyed by `uuid`.
pub struct EmbeddingCache {
    conn: Mutex<Connection>,
}

impl EmbeddingCache {
    /// Open or create the cache database at `path`, applying any
    /// pending schema migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| IndexError::CacheIoFailed {
            operation: "open embedding cache".to_string(),
            cause: e.to_string(),
        })?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {TABLE_NAME} (
                    uuid TEXT PRIMARY KEY,
                    cache_key TEXT NOT NULL,
                    path TEXT NOT NULL,
                    artifact_id TEXT NOT NULL,
                    vector TEXT NOT NULL,
                    start_line INTEGER NOT NULL,
                    end_line INTEGER NOT NULL,
                    contents TEXT NOT NULL
                )"
            ),
            [],
        )
        .map_err(|e| IndexError::CacheIoFailed {
            operation: "create embedding cache table".to_string(),
            cause: e.to_string(),
        })?;

        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{TABLE_NAME}_lookup \
                 ON {TABLE_NAME}(artifact_id, cache_key, path)"
            ),
            [],
        )
        .map_err(|e| IndexError::CacheIoFailed {
            operation: "create lookup index".to_string(),
            cause: e.to_string(),
        })?;

        // Named migration: legacy rows predating artifact isolation get
        // `UNDEFINED` rather than failing the NOT NULL constraint above.
        let _ = conn.execute(
            &format!(
                "UPDATE {TABLE_NAME} SET artifact_id = 'UNDEFINED' WHERE artifact_id = ''"
            ),
            [],
        );

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| IndexError::CacheIoFailed {
            operation: "lock embedding cache".to_string(),
            cause: "mutex poisoned".to_string(),
        })
    }

    /// Insert a single record by its primary key `uuid`.
    pub fn insert(&self, record: &CacheRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {TABLE_NAME} \
                 (uuid, cache_key, path, artifact_id, vector, start_line, end_line, contents) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                record.uuid.to_string(),
                record.cache_key,
                record.path,
                record.artifact_id,
                vector_to_text(&record.vector),
                record.start_line,
                record.end_line,
                record.contents,
            ],
        )
        .map_err(|e| IndexError::CacheIoFailed {
            operation: "insert cache record".to_string(),
            cause: e.to_string(),
        })?;
        Ok(())
    }

    fn row_to_record(
        uuid: String,
        cache_key: String,
        path: String,
        artifact_id: String,
        vector: String,
        start_line: i32,
        end_line: i32,
        contents: String,
    ) -> rusqlite::Result<CacheRecord> {
        let uuid = Uuid::parse_str(&uuid).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(CacheRecord {
            uuid,
            cache_key,
            path,
            artifact_id,
            vector: vector_from_text(&vector),
            start_line,
            end_line,
            contents,
        })
    }

    /// Reconstruct every chunk row produced for `(artifact_id, cache_key, path)`.
    pub fn select_by_key(&self, artifact_id: &str, cache_key: &str, path: &str) -> Result<Vec<CacheRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT uuid, cache_key, path, artifact_id, vector, start_line, end_line, contents \
                 FROM {TABLE_NAME} WHERE artifact_id = ?1 AND cache_key = ?2 AND path = ?3"
            ))
            .map_err(|e| IndexError::CacheIoFailed {
                operation: "prepare select_by_key".to_string(),
                cause: e.to_string(),
            })?;

        let rows = stmt
            .query_map(params![artifact_id, cache_key, path], |row| {
                Self::row_to_record(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                )
            })
            .map_err(|e| IndexError::CacheIoFailed {
                operation: "select_by_key".to_string(),
                cause: e.to_string(),
            })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| IndexError::CacheIoFailed {
                operation: "read select_by_key row".to_string(),
                cause: e.to_string(),
            })?);
        }
        Ok(out)
    }

    /// Look up records by their primary key, used by the retrieval join.
    pub fn select_by_uuids(&self, uuids: &[Uuid]) -> Result<Vec<CacheRecord>> {
        if uuids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let placeholders = uuids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT uuid, cache_key, path, artifact_id, vector, start_line, end_line, contents \
             FROM {TABLE_NAME} WHERE uuid IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| IndexError::CacheIoFailed {
            operation: "prepare select_by_uuids".to_string(),
            cause: e.to_string(),
        })?;

        let params: Vec<String> = uuids.iter().map(|u| u.to_string()).collect();
        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

        let rows = stmt
            .query_map(params_ref.as_slice(), |row| {
                Self::row_to_record(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                )
            })
            .map_err(|e| IndexError::CacheIoFailed {
                operation: "select_by_uuids".to_string(),
                cause: e.to_string(),
            })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| IndexError::CacheIoFailed {
                operation: "read select_by_uuids row".to_string(),
                cause: e.to_string(),
            })?);
        }
        Ok(out)
    }

    /// Delete every record matching `(artifact_id, cache_key, path)`.
    pub fn delete(&self, artifact_id: &str, cache_key: &str, path: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!("DELETE FROM {TABLE_NAME} WHERE artifact_id = ?1 AND cache_key = ?2 AND path = ?3"),
            params![artifact_id, cache_key, path],
        )
        .map_err(|e| IndexError::CacheIoFailed {
            operation: "delete cache records".to_string(),
            cause: e.to_string(),
        })?;
        Ok(())
    }
}
