//! SQLite-backed stores.
//!
//! One database file holds the three tables. Every call runs on the blocking
//! pool so the async engine never stalls on disk I/O.

use crate::{CaptionStore, ChangeStore, SnapshotStore, StorageError, StorageResult};
use async_trait::async_trait;
use livecopy_types::{ChangeKind, PersistedChange, ProjectId, PublishedSnapshot, Timestamp};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Persistent store for dev changes, snapshots and captions.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS dev_changes (
                project TEXT NOT NULL,
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(project, kind, key)
            );

            CREATE TABLE IF NOT EXISTS published_snapshots (
                project TEXT PRIMARY KEY,
                snapshot TEXT NOT NULL,
                published_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS captions (
                project TEXT NOT NULL,
                image_key TEXT NOT NULL,
                caption TEXT NOT NULL,
                UNIQUE(project, image_key)
            );
            ",
        )?;
        Ok(())
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

#[async_trait]
impl ChangeStore for SqliteStore {
    async fn upsert_change(&self, change: &PersistedChange) -> StorageResult<()> {
        let project = change.project.to_string();
        let kind = change.kind.as_str();
        let key = change.key.clone();
        let value = serde_json::to_string(&change.value)?;
        let updated_at = change.updated_at.as_millis() as i64;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO dev_changes (project, kind, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(project, kind, key)
                 DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![project, kind, key, value, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_changes(&self, project: &ProjectId) -> StorageResult<Vec<PersistedChange>> {
        let project = project.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, key, value, updated_at FROM dev_changes
                 WHERE project = ?1 ORDER BY updated_at, rowid",
            )?;
            let rows = stmt.query_map(params![project.as_str()], |row| {
                let kind: String = row.get(0)?;
                let key: String = row.get(1)?;
                let value: String = row.get(2)?;
                let updated_at: i64 = row.get(3)?;
                Ok((kind, key, value, updated_at))
            })?;

            let mut changes = Vec::new();
            for row in rows {
                let (kind, key, value, updated_at) = row?;
                let kind: ChangeKind = kind
                    .parse()
                    .map_err(|e| StorageError::InvalidData(format!("{e}")))?;
                changes.push(PersistedChange {
                    project: project.clone(),
                    kind,
                    key,
                    value: serde_json::from_str(&value)?,
                    updated_at: Timestamp::from_millis(updated_at.max(0) as u64),
                });
            }
            Ok(changes)
        })
        .await
    }

    async fn exists(&self, project: &ProjectId) -> StorageResult<bool> {
        let project = project.to_string();
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM dev_changes WHERE project = ?1 LIMIT 1",
                    params![project],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn delete_all(&self, project: &ProjectId) -> StorageResult<usize> {
        let project = project.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM dev_changes WHERE project = ?1", params![project])?;
            debug!("Deleted {} persisted changes for {}", removed, project);
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn upsert_snapshot(&self, snapshot: &PublishedSnapshot) -> StorageResult<()> {
        let project = snapshot.project_id.to_string();
        let json = serde_json::to_string(snapshot)?;
        let published_at = snapshot.published_at.as_millis() as i64;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO published_snapshots (project, snapshot, published_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(project)
                 DO UPDATE SET snapshot = excluded.snapshot, published_at = excluded.published_at",
                params![project, json, published_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_snapshot(&self, project: &ProjectId) -> StorageResult<Option<PublishedSnapshot>> {
        let project = project.to_string();
        self.with_conn(move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT snapshot FROM published_snapshots WHERE project = ?1",
                    params![project],
                    |row| row.get(0),
                )
                .optional()?;
            match json {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
        .await
    }
}

#[async_trait]
impl CaptionStore for SqliteStore {
    async fn set_caption(
        &self,
        project: &ProjectId,
        image_key: &str,
        caption: &str,
    ) -> StorageResult<()> {
        let project = project.to_string();
        let image_key = image_key.to_string();
        let caption = caption.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO captions (project, image_key, caption) VALUES (?1, ?2, ?3)",
                params![project, image_key, caption],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_captions(&self, project: &ProjectId) -> StorageResult<BTreeMap<String, String>> {
        let project = project.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT image_key, caption FROM captions WHERE project = ?1")?;
            let rows = stmt.query_map(params![project], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut captions = BTreeMap::new();
            for row in rows {
                let (key, caption) = row?;
                captions.insert(key, caption);
            }
            Ok(captions)
        })
        .await
    }

    async fn delete_captions(&self, project: &ProjectId) -> StorageResult<usize> {
        let project = project.to_string();
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM captions WHERE project = ?1", params![project])?)
        })
        .await
    }
}
