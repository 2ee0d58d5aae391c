//! Ingestion orchestrator.
//!
//! Turns detected filesystem changes into catalog rows: removals are applied
//! first, then new and modified files are hashed, deduplicated by content,
//! thumbnailed, measured, embedded in sub-batches, and committed. Per-file
//! failures are reported on the job and never abort the run.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EmbeddingConfig;
use crate::embedding::Embedder;
use crate::jobs::{JobStatus, JobTracker, JobUpdate};
use crate::media::{MetadataExtractor, Thumbnailer};
use crate::models::{ImageMeta, SyncReport};
use crate::queue;
use crate::scan;
use crate::vector::{VectorEntry, VectorStore};

/// Outcome of one ingestion run, reported on the job and in logs.
#[derive(Debug, Default, Clone)]
pub struct IngestOutcome {
    pub ingested: usize,
    pub deduplicated: usize,
    pub removed: usize,
    pub failed: usize,
}

/// A hashed file waiting for embedding and insert.
struct PreparedImage {
    path: PathBuf,
    file_hash: String,
    thumbnail_path: Option<String>,
    meta: ImageMeta,
}

pub struct Ingestor {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    thumbnailer: Arc<dyn Thumbnailer>,
    metadata: Arc<dyn MetadataExtractor>,
    vector_store: Arc<dyn VectorStore>,
    embedding_config: EmbeddingConfig,
    tracker: Arc<JobTracker>,
}

impl Ingestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        thumbnailer: Arc<dyn Thumbnailer>,
        metadata: Arc<dyn MetadataExtractor>,
        vector_store: Arc<dyn VectorStore>,
        embedding_config: EmbeddingConfig,
        tracker: Arc<JobTracker>,
    ) -> Self {
        Self {
            pool,
            embedder,
            thumbnailer,
            metadata,
            vector_store,
            embedding_config,
            tracker,
        }
    }

    /// Apply a sync report: removals first, then added and modified files.
    /// `batch_size` comes from the caller so runtime settings changes take
    /// effect without a restart.
    pub async fn apply_sync_report(
        &self,
        report: &SyncReport,
        root: &Path,
        job_id: &str,
        batch_size: usize,
    ) -> Result<IngestOutcome> {
        let deleted: Vec<PathBuf> = report.deleted.iter().map(|rel| root.join(rel)).collect();
        let mut files: Vec<PathBuf> = report.added.clone();
        files.extend(report.modified.iter().cloned());

        self.tracker.apply(
            job_id,
            JobUpdate {
                status: Some(JobStatus::Processing),
                total: Some((deleted.len() + files.len()) as u64),
                errors: report.errors.clone(),
                ..Default::default()
            },
        );

        let mut outcome = IngestOutcome::default();
        outcome.removed = self.remove_by_paths(&deleted).await?;
        self.tracker.apply(
            job_id,
            JobUpdate {
                add_processed: deleted.len() as u64,
                ..Default::default()
            },
        );

        self.ingest_files(&files, job_id, batch_size, &mut outcome)
            .await?;
        self.tracker.complete(
            job_id,
            Some(format!(
                "{} ingested, {} deduplicated, {} removed, {} failed",
                outcome.ingested, outcome.deduplicated, outcome.removed, outcome.failed
            )),
        );
        Ok(outcome)
    }

    /// Ingest every image under `path`, for manual runs not driven by a sync.
    pub async fn ingest_directory(
        &self,
        path: &Path,
        job_id: &str,
        extensions: &[String],
        batch_size: usize,
    ) -> Result<IngestOutcome> {
        let root = path.to_path_buf();
        let extensions = extensions.to_vec();
        let files =
            tokio::task::spawn_blocking(move || scan::scan_images(&root, &extensions)).await??;

        self.tracker.apply(
            job_id,
            JobUpdate {
                status: Some(JobStatus::Processing),
                total: Some(files.len() as u64),
                ..Default::default()
            },
        );

        let mut outcome = IngestOutcome::default();
        self.ingest_files(&files, job_id, batch_size, &mut outcome)
            .await?;
        self.tracker.complete(
            job_id,
            Some(format!(
                "{} ingested, {} deduplicated, {} failed",
                outcome.ingested, outcome.deduplicated, outcome.failed
            )),
        );
        Ok(outcome)
    }

    /// Delete catalog rows for the given absolute paths. Returns rows removed.
    pub async fn remove_by_paths(&self, paths: &[PathBuf]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        let mut image_ids = Vec::new();
        let mut embedding_ids = Vec::new();
        for path in paths {
            let rows = sqlx::query("SELECT id, embedding_id FROM images WHERE file_path = ?")
                .bind(path.display().to_string())
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                image_ids.push(row.get::<i64, _>("id"));
                if let Some(embedding_id) = row.get::<Option<i64>, _>("embedding_id") {
                    embedding_ids.push(embedding_id);
                }
            }
        }
        if image_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for image_id in &image_ids {
            sqlx::query("DELETE FROM cluster_assignments WHERE image_id = ?")
                .bind(image_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM images WHERE id = ?")
                .bind(image_id)
                .execute(&mut *tx)
                .await?;
        }
        for embedding_id in &embedding_ids {
            sqlx::query("DELETE FROM embeddings WHERE id = ?")
                .bind(embedding_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.vector_store.delete_by_ids(&image_ids).await?;
        info!(count = image_ids.len(), "Removed images from catalog");
        Ok(image_ids.len())
    }

    async fn ingest_files(
        &self,
        files: &[PathBuf],
        job_id: &str,
        batch_size: usize,
        outcome: &mut IngestOutcome,
    ) -> Result<()> {
        let mut prepared: Vec<PreparedImage> = Vec::new();
        let mut seen_hashes: std::collections::HashSet<String> = std::collections::HashSet::new();
        for path in files {
            match self.prepare_file(path, job_id).await? {
                // Two copies of the same content in one run collapse to one row.
                Prepare::New(image) if seen_hashes.contains(&image.file_hash) => {
                    outcome.deduplicated += 1;
                    self.bump_processed(job_id, 1);
                }
                Prepare::New(image) => {
                    seen_hashes.insert(image.file_hash.clone());
                    prepared.push(image);
                }
                Prepare::Deduplicated => {
                    outcome.deduplicated += 1;
                    self.bump_processed(job_id, 1);
                }
                Prepare::Failed => {
                    outcome.failed += 1;
                    self.bump_processed(job_id, 1);
                }
            }
        }

        for chunk in prepared.chunks(batch_size.max(1)) {
            self.commit_batch(chunk, job_id, outcome).await?;
            self.bump_processed(job_id, chunk.len() as u64);
        }
        Ok(())
    }

    /// Hash a file and gather its thumbnail and dimensions. Content already
    /// in the catalog only gets its path refreshed.
    async fn prepare_file(&self, path: &Path, job_id: &str) -> Result<Prepare> {
        let hash_path = path.to_path_buf();
        let file_hash =
            match tokio::task::spawn_blocking(move || scan::compute_file_hash(&hash_path)).await? {
                Ok(hash) => hash,
                Err(e) => {
                    self.report_file_error(job_id, path, &e);
                    return Ok(Prepare::Failed);
                }
            };

        let existing = sqlx::query("SELECT id FROM images WHERE file_hash = ?")
            .bind(&file_hash)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            sqlx::query("UPDATE images SET file_path = ? WHERE file_hash = ?")
                .bind(path.display().to_string())
                .bind(&file_hash)
                .execute(&self.pool)
                .await?;
            debug!(path = %path.display(), "Duplicate content, path refreshed");
            return Ok(Prepare::Deduplicated);
        }

        let thumbnail_path = match self.thumbnailer.create_thumbnail(path, &file_hash).await {
            Ok(rel) => Some(rel),
            Err(e) => {
                self.report_file_error(job_id, path, &e);
                None
            }
        };
        let meta = match self.metadata.extract(path).await {
            Ok(meta) => meta,
            Err(e) => {
                self.report_file_error(job_id, path, &e);
                ImageMeta::default()
            }
        };

        Ok(Prepare::New(PreparedImage {
            path: path.to_path_buf(),
            file_hash,
            thumbnail_path,
            meta,
        }))
    }

    /// Embed one sub-batch and insert its rows. An embedding failure still
    /// inserts the image rows so the retry queue can pick them up, and is
    /// recorded on the job so the run surfaces it.
    async fn commit_batch(
        &self,
        chunk: &[PreparedImage],
        job_id: &str,
        outcome: &mut IngestOutcome,
    ) -> Result<()> {
        if !self.embedding_config.is_enabled() {
            for image in chunk {
                self.insert_image(image, None, "pending").await?;
            }
            outcome.ingested += chunk.len();
            return Ok(());
        }

        let paths: Vec<PathBuf> = chunk.iter().map(|i| i.path.clone()).collect();
        match self.embedder.embed_batch(&paths).await {
            Ok(vectors) => {
                let mut entries = Vec::with_capacity(chunk.len());
                for (image, vector) in chunk.iter().zip(vectors.iter()) {
                    let embedding_id =
                        queue::insert_embedding(&self.pool, vector, self.embedder.model_name())
                            .await?;
                    let image_id = self
                        .insert_image(image, Some(embedding_id), "completed")
                        .await?;
                    entries.push(VectorEntry {
                        image_id,
                        vector: vector.clone(),
                        file_hash: image.file_hash.clone(),
                        file_path: image.path.display().to_string(),
                    });
                }
                self.vector_store.upsert(&entries).await?;
                outcome.ingested += chunk.len();
            }
            Err(err) => {
                warn!(error = %err, batch = chunk.len(), "Embedding batch failed");
                self.tracker.apply(
                    job_id,
                    JobUpdate {
                        errors: vec![format!("Embedding batch of {} failed: {}", chunk.len(), err)],
                        ..Default::default()
                    },
                );
                for image in chunk {
                    let image_id = self.insert_image(image, None, "pending").await?;
                    queue::mark_failed(&self.pool, image_id, &self.embedding_config, &err).await?;
                }
                outcome.ingested += chunk.len();
            }
        }
        Ok(())
    }

    /// Insert an image row keyed by content hash. A concurrent insert of the
    /// same hash degrades to a path refresh.
    async fn insert_image(
        &self,
        image: &PreparedImage,
        embedding_id: Option<i64>,
        status: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO images (file_hash, file_path, thumbnail_path, width, height,
                                embedding_id, embedding_status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_hash) DO UPDATE SET file_path = excluded.file_path
            RETURNING id
            "#,
        )
        .bind(&image.file_hash)
        .bind(image.path.display().to_string())
        .bind(&image.thumbnail_path)
        .bind(image.meta.width.map(|w| w as i64))
        .bind(image.meta.height.map(|h| h as i64))
        .bind(embedding_id)
        .bind(status)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to insert image {}", image.path.display()))?;
        Ok(row.get("id"))
    }

    fn report_file_error(&self, job_id: &str, path: &Path, error: &anyhow::Error) {
        warn!(path = %path.display(), error = %error, "File skipped during ingestion");
        self.tracker.apply(
            job_id,
            JobUpdate {
                errors: vec![format!("{}: {}", path.display(), error)],
                ..Default::default()
            },
        );
    }

    fn bump_processed(&self, job_id: &str, n: u64) {
        if n > 0 {
            self.tracker.apply(
                job_id,
                JobUpdate {
                    add_processed: n,
                    ..Default::default()
                },
            );
        }
    }
}

enum Prepare {
    New(PreparedImage),
    Deduplicated,
    Failed,
}
