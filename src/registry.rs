//! Tracked directory registry.
//!
//! CRUD over the `tracked_directories` table. Registration canonicalizes the
//! path and is an idempotent upsert: re-adding a known path updates its
//! strategy, interval, and active flag in place. Removal cascades to the
//! strategy's stored state, every image under the path prefix (with embedding
//! and cluster-assignment rows), and the matching vector-store entries.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::models::{DirectoryDetails, SyncStrategyKind, TrackedDirectory};
use crate::strategy;
use crate::vector::VectorStore;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Not a valid directory: {0}")]
    InvalidDirectory(PathBuf),
    #[error("Directory access denied: {0} is outside the allowed prefixes")]
    AccessDenied(PathBuf),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct DirectoryRegistry {
    pool: SqlitePool,
    allowed_prefixes: Vec<PathBuf>,
}

impl DirectoryRegistry {
    pub fn new(pool: SqlitePool, allowed_prefixes: Vec<PathBuf>) -> Self {
        Self {
            pool,
            allowed_prefixes,
        }
    }

    /// Register a directory for tracking, or update it if the canonical path
    /// is already registered.
    pub async fn add(
        &self,
        path: &Path,
        strategy: SyncStrategyKind,
        sync_interval_secs: i64,
    ) -> Result<TrackedDirectory, RegistryError> {
        let canonical = self.validate(path)?;
        let path_str = canonical.to_string_lossy().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO tracked_directories (path, sync_strategy, is_active, sync_interval_secs, created_at)
            VALUES (?, ?, 1, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                sync_strategy = excluded.sync_strategy,
                sync_interval_secs = excluded.sync_interval_secs,
                is_active = 1
            "#,
        )
        .bind(&path_str)
        .bind(strategy.as_str())
        .bind(sync_interval_secs)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::Other(e.into()))?;

        let dir = self
            .get_by_path(&path_str)
            .await?
            .ok_or_else(|| RegistryError::Other(anyhow::anyhow!("upserted row not found")))?;

        info!(path = %path_str, strategy = %strategy, "tracked directory registered");
        Ok(dir)
    }

    fn validate(&self, path: &Path) -> Result<PathBuf, RegistryError> {
        let canonical = path
            .canonicalize()
            .map_err(|_| RegistryError::InvalidDirectory(path.to_path_buf()))?;

        if !canonical.is_dir() {
            return Err(RegistryError::InvalidDirectory(canonical));
        }

        if !self.allowed_prefixes.is_empty()
            && !self
                .allowed_prefixes
                .iter()
                .any(|prefix| canonical.starts_with(prefix))
        {
            return Err(RegistryError::AccessDenied(canonical));
        }

        Ok(canonical)
    }

    /// Remove a tracked directory and everything derived from it. Returns
    /// `false` when the id is unknown.
    pub async fn remove(&self, id: i64, vector_store: &dyn VectorStore) -> Result<bool> {
        let dir = match self.get_directory(id).await? {
            Some(d) => d,
            None => return Ok(false),
        };

        strategy::cleanup(&self.pool, &dir).await?;
        self.remove_images_under(&dir.path, vector_store).await?;

        sqlx::query("DELETE FROM tracked_directories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        info!(path = %dir.path.display(), "tracked directory removed");
        Ok(true)
    }

    /// Delete all image rows whose path falls under `root`, cascading to
    /// embeddings, cluster assignments, and vector-store entries.
    async fn remove_images_under(&self, root: &Path, vector_store: &dyn VectorStore) -> Result<()> {
        let prefix = format!("{}/", root.to_string_lossy());
        let rows = sqlx::query(
            "SELECT id, embedding_id FROM images WHERE file_path = ? OR file_path LIKE ? || '%'",
        )
        .bind(root.to_string_lossy().to_string())
        .bind(&prefix)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(());
        }

        let image_ids: Vec<i64> = rows.iter().map(|r| r.get("id")).collect();
        let embedding_ids: Vec<i64> = rows
            .iter()
            .filter_map(|r| r.get::<Option<i64>, _>("embedding_id"))
            .collect();

        let mut tx = self.pool.begin().await?;
        for id in &image_ids {
            sqlx::query("DELETE FROM cluster_assignments WHERE image_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM images WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        for id in &embedding_ids {
            sqlx::query("DELETE FROM embeddings WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        vector_store.delete_by_ids(&image_ids).await?;
        Ok(())
    }

    /// All active directories, for the scheduler.
    pub async fn list_active(&self) -> Result<Vec<TrackedDirectory>> {
        let rows = sqlx::query("SELECT * FROM tracked_directories WHERE is_active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_directory).collect()
    }

    /// All directories with live file counts.
    pub async fn list(&self) -> Result<Vec<DirectoryDetails>> {
        let rows = sqlx::query("SELECT * FROM tracked_directories ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut details = Vec::with_capacity(rows.len());
        for row in &rows {
            let dir = row_to_directory(row)?;
            details.push(self.annotate(dir).await?);
        }
        Ok(details)
    }

    pub async fn get(&self, id: i64) -> Result<Option<DirectoryDetails>> {
        match self.get_directory(id).await? {
            Some(dir) => Ok(Some(self.annotate(dir).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_directory(&self, id: i64) -> Result<Option<TrackedDirectory>> {
        let row = sqlx::query("SELECT * FROM tracked_directories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_directory).transpose()
    }

    async fn get_by_path(&self, path: &str) -> Result<Option<TrackedDirectory>, RegistryError> {
        let row = sqlx::query("SELECT * FROM tracked_directories WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RegistryError::Other(e.into()))?;
        row.as_ref()
            .map(row_to_directory)
            .transpose()
            .map_err(RegistryError::Other)
    }

    /// Record the outcome of a sync pass on the directory row.
    pub async fn record_sync_outcome(&self, id: i64, error: Option<&str>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        match error {
            None => {
                sqlx::query(
                    "UPDATE tracked_directories SET last_synced_at = ?, last_error = NULL WHERE id = ?",
                )
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            Some(msg) => {
                sqlx::query(
                    "UPDATE tracked_directories SET last_synced_at = ?, last_error = ? WHERE id = ?",
                )
                .bind(now)
                .bind(msg)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn annotate(&self, dir: TrackedDirectory) -> Result<DirectoryDetails> {
        let prefix = format!("{}/", dir.path.to_string_lossy());
        let indexed_files: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE file_path LIKE ? || '%'")
                .bind(&prefix)
                .fetch_one(&self.pool)
                .await?;
        let tracked_files = strategy::tracked_count(&self.pool, &dir).await?;

        Ok(DirectoryDetails {
            directory: dir,
            indexed_files,
            tracked_files,
        })
    }
}

fn row_to_directory(row: &sqlx::sqlite::SqliteRow) -> Result<TrackedDirectory> {
    let strategy_str: String = row.get("sync_strategy");
    Ok(TrackedDirectory {
        id: row.get("id"),
        path: PathBuf::from(row.get::<String, _>("path")),
        strategy: SyncStrategyKind::parse(&strategy_str)?,
        is_active: row.get::<i64, _>("is_active") != 0,
        sync_interval_secs: row.get("sync_interval_secs"),
        last_synced_at: row.get("last_synced_at"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
    })
}
