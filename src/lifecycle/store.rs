//! SQLite-backed store for lifecycle records and pipeline history
//!
//! One row per muppet in `lifecycle_records` and an append-only log in
//! `pipeline_versions`. Records are stored as JSON next to a few indexed
//! columns. All blocking database work runs on the blocking thread pool.

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};
use rusqlite_migration::{M, Migrations};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::lifecycle::LifecycleRecord;
use crate::pipelines::PipelineVersion;
use crate::templates::FileTree;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("Corrupt stored data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Pipeline version {version} already exists for '{muppet}'")]
    DuplicateVersion { muppet: String, version: u32 },

    #[error("Task execution failed: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "CREATE TABLE lifecycle_records (
            name TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            record_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX idx_lifecycle_records_state ON lifecycle_records(state);
        CREATE TABLE pipeline_versions (
            muppet TEXT NOT NULL,
            version INTEGER NOT NULL,
            label TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            files_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (muppet, version)
        );",
    )])
}

/// Durable state shared by the orchestrator and the pipeline manager
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (and migrate) the database at `path`
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(Duration::from_secs(5))
        });
        Self::with_manager(manager, 4).await
    }

    /// Private in-memory database; every call shares one connection
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::with_manager(SqliteConnectionManager::memory(), 1).await
    }

    async fn with_manager(
        manager: SqliteConnectionManager,
        max_size: u32,
    ) -> Result<Self, StoreError> {
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)
            .map_err(|e| StoreError::Pool(format!("Failed to create connection pool: {e}")))?;

        let store = Self { pool };
        store
            .with_connection(|conn| {
                migrations().to_latest(conn)?;
                Ok(())
            })
            .await?;
        tracing::debug!("Lifecycle store ready");
        Ok(store)
    }

    async fn with_connection<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| StoreError::Pool(format!("Failed to get pooled connection: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Spawn(e.to_string()))?
    }

    pub async fn get_record(&self, name: &str) -> Result<Option<LifecycleRecord>, StoreError> {
        let name = name.to_string();
        self.with_connection(move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT record_json FROM lifecycle_records WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    /// Insert or replace the record
    pub async fn put_record(&self, record: &LifecycleRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let name = record.name.clone();
        let state = record.state.as_str();
        let updated_at = record.updated_at.timestamp_millis();

        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO lifecycle_records (name, state, record_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    state = excluded.state,
                    record_json = excluded.record_json,
                    updated_at = excluded.updated_at",
                params![name, state, json, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    /// Remove a record that never left `Pending`
    pub async fn delete_record(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.to_string();
        self.with_connection(move |conn| {
            let removed = conn.execute(
                "DELETE FROM lifecycle_records WHERE name = ?1",
                params![name],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    /// Every record, ordered by name
    pub async fn list_records(&self) -> Result<Vec<LifecycleRecord>, StoreError> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT record_json FROM lifecycle_records ORDER BY name")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut records = Vec::new();
            for json in rows {
                records.push(serde_json::from_str(&json?)?);
            }
            Ok(records)
        })
        .await
    }

    /// Append a version; the number must not exist yet
    pub async fn insert_pipeline_version(&self, version: &PipelineVersion) -> Result<(), StoreError> {
        let files_json = serde_json::to_string(&version.files)?;
        let row = (
            version.muppet.clone(),
            version.version,
            version.label.clone(),
            version.content_hash.clone(),
            version.created_at.timestamp_millis(),
        );

        self.with_connection(move |conn| {
            let (muppet, number, label, hash, created_at) = row;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO pipeline_versions
                    (muppet, version, label, content_hash, files_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![muppet, number, label, hash, files_json, created_at],
            )?;
            if inserted == 0 {
                return Err(StoreError::DuplicateVersion {
                    muppet,
                    version: number,
                });
            }
            Ok(())
        })
        .await
    }

    /// All versions of a muppet, oldest first
    pub async fn list_pipeline_versions(
        &self,
        muppet: &str,
    ) -> Result<Vec<PipelineVersion>, StoreError> {
        let muppet = muppet.to_string();
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT muppet, version, label, content_hash, files_json, created_at
                 FROM pipeline_versions WHERE muppet = ?1 ORDER BY version",
            )?;
            let rows = stmt.query_map(params![muppet], version_row)?;
            let mut versions = Vec::new();
            for row in rows {
                versions.push(row?.into_version()?);
            }
            Ok(versions)
        })
        .await
    }

    pub async fn get_pipeline_version(
        &self,
        muppet: &str,
        version: u32,
    ) -> Result<Option<PipelineVersion>, StoreError> {
        let muppet = muppet.to_string();
        self.with_connection(move |conn| {
            let row = conn
                .query_row(
                    "SELECT muppet, version, label, content_hash, files_json, created_at
                     FROM pipeline_versions WHERE muppet = ?1 AND version = ?2",
                    params![muppet, version],
                    version_row,
                )
                .optional()?;
            row.map(VersionRow::into_version).transpose()
        })
        .await
    }

    pub async fn latest_pipeline_version(
        &self,
        muppet: &str,
    ) -> Result<Option<PipelineVersion>, StoreError> {
        let muppet = muppet.to_string();
        self.with_connection(move |conn| {
            let row = conn
                .query_row(
                    "SELECT muppet, version, label, content_hash, files_json, created_at
                     FROM pipeline_versions WHERE muppet = ?1
                     ORDER BY version DESC LIMIT 1",
                    params![muppet],
                    version_row,
                )
                .optional()?;
            row.map(VersionRow::into_version).transpose()
        })
        .await
    }
}

struct VersionRow {
    muppet: String,
    version: u32,
    label: String,
    content_hash: String,
    files_json: String,
    created_at: i64,
}

fn version_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionRow> {
    Ok(VersionRow {
        muppet: row.get(0)?,
        version: row.get(1)?,
        label: row.get(2)?,
        content_hash: row.get(3)?,
        files_json: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl VersionRow {
    fn into_version(self) -> Result<PipelineVersion, StoreError> {
        let files: FileTree = serde_json::from_str(&self.files_json)?;
        Ok(PipelineVersion {
            muppet: self.muppet,
            version: self.version,
            label: self.label,
            content_hash: self.content_hash,
            files,
            created_at: DateTime::<Utc>::from_timestamp_millis(self.created_at)
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{LifecycleState, MuppetSpec};
    use tempfile::TempDir;

    fn record(name: &str) -> LifecycleRecord {
        LifecycleRecord::pending(&MuppetSpec::new(name, "java-micronaut"), "1.0.0")
    }

    fn version(muppet: &str, number: u32, content: &str) -> PipelineVersion {
        let mut files = FileTree::new();
        files.insert(".github/workflows/ci.yml", content);
        PipelineVersion::new(muppet, number, "generated-on-create", files)
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.get_record("billing-svc").await.unwrap().is_none());

        let mut record = record("billing-svc");
        store.put_record(&record).await.unwrap();
        record.enter(LifecycleState::RepoCreated);
        store.put_record(&record).await.unwrap();

        let stored = store.get_record("billing-svc").await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn test_delete_record() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put_record(&record("billing-svc")).await.unwrap();
        assert!(store.delete_record("billing-svc").await.unwrap());
        assert!(!store.delete_record("billing-svc").await.unwrap());
        assert!(store.get_record("billing-svc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_records_is_ordered() {
        let store = SqliteStore::in_memory().await.unwrap();
        for name in ["orders", "billing-svc", "ledger"] {
            store.put_record(&record(name)).await.unwrap();
        }
        let names: Vec<_> = store
            .list_records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["billing-svc", "ledger", "orders"]);
    }

    #[tokio::test]
    async fn test_pipeline_versions_are_append_only() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_pipeline_version(&version("billing-svc", 1, "a"))
            .await
            .unwrap();
        store
            .insert_pipeline_version(&version("billing-svc", 2, "b"))
            .await
            .unwrap();

        let err = store
            .insert_pipeline_version(&version("billing-svc", 2, "c"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateVersion { version: 2, .. }));

        let versions = store.list_pipeline_versions("billing-svc").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].files.text(".github/workflows/ci.yml"), Some("b"));

        let latest = store.latest_pipeline_version("billing-svc").await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert!(store.get_pipeline_version("billing-svc", 3).await.unwrap().is_none());
        assert!(store.list_pipeline_versions("ledger").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("muppets.db");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.put_record(&record("billing-svc")).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).await.unwrap();
        assert!(reopened.get_record("billing-svc").await.unwrap().is_some());
    }
}
