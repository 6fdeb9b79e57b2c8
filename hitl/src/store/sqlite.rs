//! SQLite-backed durable store. Persistent across process restarts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::params;

use super::{DurableStore, RecordKind, StoreError, StoreKey};

fn storage(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

fn kind_from_str(s: &str) -> Option<RecordKind> {
    match s {
        "session" => Some(RecordKind::Session),
        "checkpoint" => Some(RecordKind::Checkpoint),
        "resolution" => Some(RecordKind::Resolution),
        "outcome" => Some(RecordKind::Outcome),
        "event" => Some(RecordKind::Event),
        _ => None,
    }
}

fn open(db_path: &Path) -> Result<rusqlite::Connection, StoreError> {
    let conn = rusqlite::Connection::open(db_path).map_err(storage)?;
    // A put must not return before the page is on disk.
    conn.execute_batch("PRAGMA synchronous = FULL;")
        .map_err(storage)?;
    Ok(conn)
}

/// SQLite-backed store: one table `records (conversation_id, kind, seq, blob)`.
///
/// Uses spawn_blocking for async; every call opens its own connection so callers never
/// share a handle across tasks.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Creates the store and ensures the table exists. `path` is the SQLite file path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = open(&db_path)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                conversation_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                seq INTEGER NOT NULL,
                blob BLOB NOT NULL,
                PRIMARY KEY (conversation_id, kind, seq)
            )
            "#,
            [],
        )
        .map_err(storage)?;
        Ok(Self { db_path })
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn put(&self, key: &StoreKey, blob: Vec<u8>) -> Result<(), StoreError> {
        let key = key.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let sql = if key.kind.is_write_once() {
                "INSERT INTO records (conversation_id, kind, seq, blob) VALUES (?1, ?2, ?3, ?4)"
            } else {
                "INSERT OR REPLACE INTO records (conversation_id, kind, seq, blob) VALUES (?1, ?2, ?3, ?4)"
            };
            match conn.execute(
                sql,
                params![
                    key.conversation_id,
                    key.kind.as_str(),
                    key.sequence_index as i64,
                    blob
                ],
            ) {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::AlreadyExists(key.to_string()))
                }
                Err(e) => Err(storage(e)),
            }
        })
        .await
        .map_err(storage)?
    }

    async fn get(&self, key: &StoreKey) -> Result<Vec<u8>, StoreError> {
        let key = key.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let mut stmt = conn
                .prepare(
                    "SELECT blob FROM records WHERE conversation_id = ?1 AND kind = ?2 AND seq = ?3",
                )
                .map_err(storage)?;
            let mut rows = stmt
                .query(params![
                    key.conversation_id,
                    key.kind.as_str(),
                    key.sequence_index as i64
                ])
                .map_err(storage)?;
            let blob = match rows.next().map_err(storage)? {
                Some(row) => row.get::<_, Vec<u8>>(0).map_err(storage),
                None => Err(StoreError::NotFound(key.to_string())),
            };
            blob
        })
        .await
        .map_err(storage)?
    }

    async fn scan(
        &self,
        conversation_id: &str,
        kind: RecordKind,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        let conversation_id = conversation_id.to_string();
        let db_path = self.db_path.clone();
        // LIMIT -1 means no limit in SQLite.
        let after = after.map(|a| a as i64).unwrap_or(-1);
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let mut stmt = conn
                .prepare(
                    "SELECT seq, blob FROM records
                     WHERE conversation_id = ?1 AND kind = ?2 AND seq > ?3
                     ORDER BY seq ASC LIMIT ?4",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![conversation_id, kind.as_str(), after, limit], |row| {
                    Ok((row.get::<_, i64>(0)? as u64, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(storage)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage)
        })
        .await
        .map_err(storage)?
    }

    async fn last_index(
        &self,
        conversation_id: &str,
        kind: RecordKind,
    ) -> Result<Option<u64>, StoreError> {
        let conversation_id = conversation_id.to_string();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let max: Option<i64> = conn
                .query_row(
                    "SELECT MAX(seq) FROM records WHERE conversation_id = ?1 AND kind = ?2",
                    params![conversation_id, kind.as_str()],
                    |row| row.get(0),
                )
                .map_err(storage)?;
            Ok(max.map(|m| m as u64))
        })
        .await
        .map_err(storage)?
    }

    async fn conversations(&self, kind: RecordKind) -> Result<Vec<String>, StoreError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT conversation_id, kind FROM records WHERE kind = ?1
                     ORDER BY conversation_id ASC",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![kind.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(storage)?;
            let mut ids = Vec::new();
            for row in rows {
                let (id, k) = row.map_err(storage)?;
                if kind_from_str(&k) == Some(kind) {
                    ids.push(id);
                }
            }
            Ok(ids)
        })
        .await
        .map_err(storage)?
    }
}
