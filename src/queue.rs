//! Embedding retry state machine.
//!
//! Each image row carries an `embedding_status` that moves through
//! pending -> processing -> completed, or into `failed_retryable` with an
//! exponential backoff schedule, or into `failed_permanent` once the error is
//! non-transient or the retry budget is spent. The retry pass picks up due
//! rows, re-submits them to the embedder, and mirrors successes into the
//! vector store.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbedError, Embedder};
use crate::models::EmbeddingStatus;
use crate::vector::{vec_to_blob, VectorEntry, VectorStore};

/// Upper bound on rows picked up by one retry pass.
const RETRY_PASS_LIMIT: i64 = 100;

/// Delay before attempt `retry_count + 1`, doubling per prior attempt.
pub fn backoff_secs(base_delay_secs: u64, retry_count: u32) -> i64 {
    (base_delay_secs as i64).saturating_mul(1i64 << retry_count.min(20))
}

pub async fn mark_processing(pool: &SqlitePool, image_id: i64) -> Result<()> {
    sqlx::query("UPDATE images SET embedding_status = 'processing' WHERE id = ?")
        .bind(image_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a successful embedding: link the row and clear retry bookkeeping.
pub async fn mark_completed(pool: &SqlitePool, image_id: i64, embedding_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE images
        SET embedding_id = ?, embedding_status = 'completed',
            next_retry_at = NULL, error_code = NULL, error_message = NULL
        WHERE id = ?
        "#,
    )
    .bind(embedding_id)
    .bind(image_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed embedding attempt.
///
/// Retryable errors schedule the next attempt at `now + base * 2^retry_count`
/// and increment the counter. Non-retryable errors, and retryable ones that
/// have exhausted `max_retries`, park the row as `failed_permanent`.
pub async fn mark_failed(
    pool: &SqlitePool,
    image_id: i64,
    config: &EmbeddingConfig,
    error: &EmbedError,
) -> Result<()> {
    let row = sqlx::query("SELECT retry_count FROM images WHERE id = ?")
        .bind(image_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(());
    };
    let retry_count: i64 = row.get("retry_count");
    let retry_count = retry_count.max(0) as u32;

    if error.is_retryable() && retry_count < config.max_retries {
        let next_retry_at = Utc::now().timestamp() + backoff_secs(config.retry_base_delay_secs, retry_count);
        sqlx::query(
            r#"
            UPDATE images
            SET embedding_status = 'failed_retryable', retry_count = retry_count + 1,
                next_retry_at = ?, error_code = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(next_retry_at)
        .bind(error.code())
        .bind(error.to_string())
        .bind(image_id)
        .execute(pool)
        .await?;
    } else {
        let message = if error.is_retryable() {
            format!("Retries exhausted after {} attempts: {}", retry_count + 1, error)
        } else {
            error.to_string()
        };
        sqlx::query(
            r#"
            UPDATE images
            SET embedding_status = 'failed_permanent', next_retry_at = NULL,
                error_code = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(error.code())
        .bind(message)
        .bind(image_id)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// An image row due for another embedding attempt.
#[derive(Debug, Clone)]
pub struct RetryCandidate {
    pub image_id: i64,
    pub file_path: PathBuf,
    pub file_hash: String,
}

/// Rows in `failed_retryable` whose backoff has elapsed, oldest due first.
pub async fn due_retries(pool: &SqlitePool, limit: i64) -> Result<Vec<RetryCandidate>> {
    let now = Utc::now().timestamp();
    let rows = sqlx::query(
        r#"
        SELECT id, file_path, file_hash FROM images
        WHERE embedding_status = 'failed_retryable' AND next_retry_at <= ?
        ORDER BY next_retry_at ASC
        LIMIT ?
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| RetryCandidate {
            image_id: row.get("id"),
            file_path: PathBuf::from(row.get::<String, _>("file_path")),
            file_hash: row.get("file_hash"),
        })
        .collect())
}

/// Run one retry pass. Returns (succeeded, failed) counts.
pub async fn run_retry_pass(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    vector_store: &dyn VectorStore,
    config: &EmbeddingConfig,
) -> Result<(usize, usize)> {
    let candidates = due_retries(pool, RETRY_PASS_LIMIT).await?;
    if candidates.is_empty() {
        return Ok((0, 0));
    }
    info!(count = candidates.len(), "Retrying failed embeddings");

    let mut succeeded = 0;
    let mut failed = 0;
    for chunk in candidates.chunks(config.batch_size.max(1)) {
        for candidate in chunk {
            mark_processing(pool, candidate.image_id).await?;
        }
        let paths: Vec<PathBuf> = chunk.iter().map(|c| c.file_path.clone()).collect();
        match embedder.embed_batch(&paths).await {
            Ok(vectors) => {
                let mut entries = Vec::with_capacity(chunk.len());
                for (candidate, vector) in chunk.iter().zip(vectors.iter()) {
                    let embedding_id =
                        insert_embedding(pool, vector, embedder.model_name()).await?;
                    mark_completed(pool, candidate.image_id, embedding_id).await?;
                    entries.push(VectorEntry {
                        image_id: candidate.image_id,
                        vector: vector.clone(),
                        file_hash: candidate.file_hash.clone(),
                        file_path: candidate.file_path.display().to_string(),
                    });
                }
                vector_store.upsert(&entries).await?;
                succeeded += chunk.len();
            }
            Err(err) => {
                warn!(error = %err, batch = chunk.len(), "Retry batch failed");
                for candidate in chunk {
                    mark_failed(pool, candidate.image_id, config, &err).await?;
                }
                failed += chunk.len();
            }
        }
    }
    Ok((succeeded, failed))
}

/// Insert an embedding row and return its id.
pub async fn insert_embedding(pool: &SqlitePool, vector: &[f32], model: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO embeddings (vector, model_name, created_at) VALUES (?, ?, ?)")
        .bind(vec_to_blob(vector))
        .bind(model)
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Image counts keyed by embedding status.
pub async fn queue_stats(pool: &SqlitePool) -> Result<HashMap<EmbeddingStatus, i64>> {
    let rows = sqlx::query(
        "SELECT embedding_status, COUNT(*) AS n FROM images GROUP BY embedding_status",
    )
    .fetch_all(pool)
    .await?;

    let mut stats = HashMap::new();
    for row in rows {
        let status: String = row.get("embedding_status");
        let n: i64 = row.get("n");
        if let Ok(status) = EmbeddingStatus::parse(&status) {
            stats.insert(status, n);
        }
    }
    Ok(stats)
}
