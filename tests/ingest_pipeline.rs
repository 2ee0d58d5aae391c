//! End-to-end tests for the ingestion orchestrator and retry queue.
//!
//! The embedder, thumbnailer, and metadata extractor are replaced with stubs
//! so the pipeline runs against plain byte files; the database, vector store,
//! and job tracker are the real implementations.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use pixarc::config::EmbeddingConfig;
use pixarc::embedding::{EmbedError, Embedder};
use pixarc::ingest::Ingestor;
use pixarc::jobs::{JobStatus, JobTracker};
use pixarc::media::{MetadataExtractor, Thumbnailer};
use pixarc::models::{ImageMeta, SyncReport, SyncStrategyKind};
use pixarc::vector::{SqliteVectorStore, VectorStore};
use pixarc::{db, migrate, queue};
use sqlx::{Row, SqlitePool};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ─── Stubs ──────────────────────────────────────────────────────────

/// Embeds every input as a fixed 4-dim vector derived from the path length.
struct OkEmbedder;

#[async_trait]
impl Embedder for OkEmbedder {
    fn model_name(&self) -> &str {
        "stub-model"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed_batch(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(paths
            .iter()
            .map(|p| {
                let n = p.as_os_str().len() as f32;
                vec![n, 1.0, 0.0, 0.5]
            })
            .collect())
    }
}

/// Always fails with the given HTTP status.
struct FailingEmbedder {
    status: u16,
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "stub-model"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed_batch(&self, _paths: &[PathBuf]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Http {
            status: self.status,
            message: "stub failure".to_string(),
        })
    }
}

struct StubThumbnailer;

#[async_trait]
impl Thumbnailer for StubThumbnailer {
    async fn create_thumbnail(&self, _source: &Path, file_hash: &str) -> Result<String> {
        Ok(format!("thumbnails/{}.jpg", file_hash))
    }
}

struct StubMetadata;

#[async_trait]
impl MetadataExtractor for StubMetadata {
    async fn extract(&self, _source: &Path) -> Result<ImageMeta> {
        Ok(ImageMeta {
            width: Some(640),
            height: Some(480),
        })
    }
}

// ─── Harness ────────────────────────────────────────────────────────

fn exts() -> Vec<String> {
    vec!["jpg".to_string()]
}

fn embedding_config() -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "http".to_string(),
        model: Some("stub-model".to_string()),
        dims: Some(4),
        endpoint: Some("http://localhost/unused".to_string()),
        batch_size: 2,
        timeout_secs: 5,
        max_retries: 2,
        retry_base_delay_secs: 60,
    }
}

struct Harness {
    _tmp: TempDir,
    pool: SqlitePool,
    tracker: Arc<JobTracker>,
    root: PathBuf,
}

impl Harness {
    async fn new() -> Result<Self> {
        let tmp = TempDir::new()?;
        let pool = db::connect_path(&tmp.path().join("data/pixarc.sqlite")).await?;
        migrate::run_migrations(&pool).await?;
        let root = tmp.path().join("photos");
        fs::create_dir_all(&root)?;
        Ok(Self {
            _tmp: tmp,
            pool,
            tracker: Arc::new(JobTracker::new()),
            root,
        })
    }

    fn ingestor(&self, embedder: Arc<dyn Embedder>, config: EmbeddingConfig) -> Ingestor {
        Ingestor::new(
            self.pool.clone(),
            embedder,
            Arc::new(StubThumbnailer),
            Arc::new(StubMetadata),
            Arc::new(SqliteVectorStore::new(self.pool.clone())),
            config,
            self.tracker.clone(),
        )
    }

    async fn image_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn status_of(&self, file_hash_like_path: &Path) -> Result<(String, i64)> {
        let row = sqlx::query(
            "SELECT embedding_status, retry_count FROM images WHERE file_path = ?",
        )
        .bind(file_hash_like_path.display().to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("embedding_status"), row.get("retry_count")))
    }
}

// ─── Ingestion ──────────────────────────────────────────────────────

#[tokio::test]
async fn ingest_directory_embeds_and_indexes_everything() -> Result<()> {
    let h = Harness::new().await?;
    fs::write(h.root.join("a.jpg"), b"first image bytes")?;
    fs::write(h.root.join("b.jpg"), b"second image bytes")?;
    fs::write(h.root.join("c.jpg"), b"third image bytes")?;

    let ingestor = h.ingestor(Arc::new(OkEmbedder), embedding_config());
    let job_id = h.tracker.create("ingest");
    let outcome = ingestor.ingest_directory(&h.root, &job_id, &exts(), 2).await?;

    assert_eq!(outcome.ingested, 3);
    assert_eq!(outcome.deduplicated, 0);
    assert_eq!(outcome.failed, 0);
    assert_eq!(h.image_count().await?, 3);

    let completed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM images WHERE embedding_status = 'completed' AND embedding_id IS NOT NULL",
    )
    .fetch_one(&h.pool)
    .await?;
    assert_eq!(completed, 3);

    let store = SqliteVectorStore::new(h.pool.clone());
    assert_eq!(store.count().await?, 3);

    let thumbs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE thumbnail_path IS NOT NULL")
            .fetch_one(&h.pool)
            .await?;
    assert_eq!(thumbs, 3);

    let job = h.tracker.get(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total, 3);
    assert_eq!(job.progress, 1.0);

    // A stored vector should find itself as the top hit.
    let (image_id, vector): (i64, Vec<u8>) =
        sqlx::query_as("SELECT image_id, embedding FROM vector_index LIMIT 1")
            .fetch_one(&h.pool)
            .await?;
    let query = pixarc::vector::blob_to_vec(&vector);
    let hits = store.search_by_vector(&query, 1).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, image_id);
    assert!((hits[0].1 - 1.0).abs() < 1e-5);
    Ok(())
}

#[tokio::test]
async fn duplicate_content_refreshes_path_without_new_row() -> Result<()> {
    let h = Harness::new().await?;
    fs::write(h.root.join("original.jpg"), b"same bytes everywhere")?;

    let ingestor = h.ingestor(Arc::new(OkEmbedder), embedding_config());
    let job_id = h.tracker.create("ingest");
    ingestor.ingest_directory(&h.root, &job_id, &exts(), 2).await?;
    assert_eq!(h.image_count().await?, 1);

    let copies = h.root.parent().unwrap().join("copies");
    fs::create_dir_all(&copies)?;
    fs::write(copies.join("copy.jpg"), b"same bytes everywhere")?;

    let job_id = h.tracker.create("ingest");
    let outcome = ingestor.ingest_directory(&copies, &job_id, &exts(), 2).await?;

    assert_eq!(outcome.ingested, 0);
    assert_eq!(outcome.deduplicated, 1);
    assert_eq!(h.image_count().await?, 1);

    let path: String = sqlx::query_scalar("SELECT file_path FROM images")
        .fetch_one(&h.pool)
        .await?;
    assert_eq!(path, copies.join("copy.jpg").display().to_string());
    Ok(())
}

#[tokio::test]
async fn empty_directory_completes_with_full_progress() -> Result<()> {
    let h = Harness::new().await?;
    let ingestor = h.ingestor(Arc::new(OkEmbedder), embedding_config());
    let job_id = h.tracker.create("ingest");
    let outcome = ingestor.ingest_directory(&h.root, &job_id, &exts(), 2).await?;

    assert_eq!(outcome.ingested, 0);
    let job = h.tracker.get(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total, 0);
    assert_eq!(job.progress, 1.0);
    Ok(())
}

#[tokio::test]
async fn sync_report_deletions_cascade_through_catalog() -> Result<()> {
    let h = Harness::new().await?;
    fs::write(h.root.join("doomed.jpg"), b"doomed")?;
    fs::write(h.root.join("kept.jpg"), b"kept")?;

    let ingestor = h.ingestor(Arc::new(OkEmbedder), embedding_config());
    let job_id = h.tracker.create("ingest");
    ingestor.ingest_directory(&h.root, &job_id, &exts(), 2).await?;
    assert_eq!(h.image_count().await?, 2);

    fs::remove_file(h.root.join("doomed.jpg"))?;
    let report = SyncReport {
        tracked_directory_id: 1,
        added: Vec::new(),
        modified: Vec::new(),
        deleted: vec!["doomed.jpg".to_string()],
        unchanged: 1,
        errors: Vec::new(),
        duration: Duration::from_millis(1),
        strategy: SyncStrategyKind::Snapshot,
    };
    let job_id = h.tracker.create("sync");
    let outcome = ingestor.apply_sync_report(&report, &h.root, &job_id, 2).await?;

    assert_eq!(outcome.removed, 1);
    assert_eq!(h.image_count().await?, 1);
    let store = SqliteVectorStore::new(h.pool.clone());
    assert_eq!(store.count().await?, 1);
    let embeddings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
        .fetch_one(&h.pool)
        .await?;
    assert_eq!(embeddings, 1);
    Ok(())
}

// ─── Retry queue ────────────────────────────────────────────────────

#[tokio::test]
async fn transient_failure_schedules_backoff_retry() -> Result<()> {
    let h = Harness::new().await?;
    fs::write(h.root.join("a.jpg"), b"payload")?;

    let ingestor = h.ingestor(Arc::new(FailingEmbedder { status: 503 }), embedding_config());
    let job_id = h.tracker.create("ingest");
    ingestor.ingest_directory(&h.root, &job_id, &exts(), 2).await?;

    let (status, retry_count) = h.status_of(&h.root.join("a.jpg")).await?;
    assert_eq!(status, "failed_retryable");
    assert_eq!(retry_count, 1);

    let next_retry_at: i64 = sqlx::query_scalar("SELECT next_retry_at FROM images")
        .fetch_one(&h.pool)
        .await?;
    let delta = next_retry_at - Utc::now().timestamp();
    assert!((55..=65).contains(&delta), "first backoff ~60s, got {}", delta);
    Ok(())
}

#[tokio::test]
async fn embedding_batch_failure_is_recorded_on_the_job() -> Result<()> {
    let h = Harness::new().await?;
    fs::write(h.root.join("a.jpg"), b"payload")?;

    let ingestor = h.ingestor(Arc::new(FailingEmbedder { status: 503 }), embedding_config());
    let job_id = h.tracker.create("ingest");
    ingestor.ingest_directory(&h.root, &job_id, &exts(), 2).await?;

    let job = h.tracker.get(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(!job.errors.is_empty(), "batch failure should appear on the job");
    assert!(
        job.errors.iter().any(|e| e.contains("stub failure")),
        "got: {:?}",
        job.errors
    );
    Ok(())
}

#[tokio::test]
async fn retry_pass_recovers_due_failures() -> Result<()> {
    let h = Harness::new().await?;
    fs::write(h.root.join("a.jpg"), b"payload")?;

    let config = embedding_config();
    let ingestor = h.ingestor(Arc::new(FailingEmbedder { status: 503 }), config.clone());
    let job_id = h.tracker.create("ingest");
    ingestor.ingest_directory(&h.root, &job_id, &exts(), 2).await?;

    // Force the backoff window to have elapsed.
    sqlx::query("UPDATE images SET next_retry_at = ?")
        .bind(Utc::now().timestamp() - 10)
        .execute(&h.pool)
        .await?;

    let store = SqliteVectorStore::new(h.pool.clone());
    let (succeeded, failed) = queue::run_retry_pass(&h.pool, &OkEmbedder, &store, &config).await?;
    assert_eq!((succeeded, failed), (1, 0));

    let (status, _) = h.status_of(&h.root.join("a.jpg")).await?;
    assert_eq!(status, "completed");
    assert_eq!(store.count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn non_retryable_failure_is_parked_permanently() -> Result<()> {
    let h = Harness::new().await?;
    fs::write(h.root.join("a.jpg"), b"payload")?;

    let ingestor = h.ingestor(Arc::new(FailingEmbedder { status: 401 }), embedding_config());
    let job_id = h.tracker.create("ingest");
    ingestor.ingest_directory(&h.root, &job_id, &exts(), 2).await?;

    let (status, retry_count) = h.status_of(&h.root.join("a.jpg")).await?;
    assert_eq!(status, "failed_permanent");
    assert_eq!(retry_count, 0);

    let next_retry_at: Option<i64> = sqlx::query_scalar("SELECT next_retry_at FROM images")
        .fetch_one(&h.pool)
        .await?;
    assert!(next_retry_at.is_none());
    Ok(())
}

#[tokio::test]
async fn retries_are_exhausted_after_max_attempts() -> Result<()> {
    let h = Harness::new().await?;
    fs::write(h.root.join("a.jpg"), b"payload")?;

    let mut config = embedding_config();
    config.max_retries = 1;

    let ingestor = h.ingestor(Arc::new(FailingEmbedder { status: 503 }), config.clone());
    let job_id = h.tracker.create("ingest");
    ingestor.ingest_directory(&h.root, &job_id, &exts(), 2).await?;

    sqlx::query("UPDATE images SET next_retry_at = ?")
        .bind(Utc::now().timestamp() - 10)
        .execute(&h.pool)
        .await?;

    let store = SqliteVectorStore::new(h.pool.clone());
    let failing = FailingEmbedder { status: 503 };
    let (succeeded, failed) = queue::run_retry_pass(&h.pool, &failing, &store, &config).await?;
    assert_eq!((succeeded, failed), (0, 1));

    let (status, retry_count) = h.status_of(&h.root.join("a.jpg")).await?;
    assert_eq!(status, "failed_permanent");
    assert_eq!(retry_count, 1);

    let message: String = sqlx::query_scalar("SELECT error_message FROM images")
        .fetch_one(&h.pool)
        .await?;
    assert!(message.contains("Retries exhausted"), "got: {}", message);
    Ok(())
}

#[tokio::test]
async fn queue_stats_groups_by_status() -> Result<()> {
    let h = Harness::new().await?;
    fs::write(h.root.join("good.jpg"), b"good")?;
    let ingestor = h.ingestor(Arc::new(OkEmbedder), embedding_config());
    let job_id = h.tracker.create("ingest");
    ingestor.ingest_directory(&h.root, &job_id, &exts(), 2).await?;

    let bad = h.root.parent().unwrap().join("bad");
    fs::create_dir_all(&bad)?;
    fs::write(bad.join("bad.jpg"), b"bad")?;
    let failing = h.ingestor(Arc::new(FailingEmbedder { status: 503 }), embedding_config());
    let job_id = h.tracker.create("ingest");
    failing.ingest_directory(&bad, &job_id, &exts(), 2).await?;

    let stats = queue::queue_stats(&h.pool).await?;
    assert_eq!(stats.get(&pixarc::models::EmbeddingStatus::Completed), Some(&1));
    assert_eq!(
        stats.get(&pixarc::models::EmbeddingStatus::FailedRetryable),
        Some(&1)
    );
    Ok(())
}
