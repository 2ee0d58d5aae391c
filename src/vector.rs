//! Vector index abstraction.
//!
//! The pipeline mirrors every completed embedding into a [`VectorStore`] with
//! at-least-once semantics: upserts are idempotent by image id, and deletes
//! are issued when images disappear. The bundled implementation keeps vectors
//! in a SQLite table as little-endian f32 blobs and searches by brute-force
//! cosine similarity.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

/// One entry mirrored into the index.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub image_id: i64,
    pub vector: Vec<f32>,
    pub file_hash: String,
    pub file_path: String,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace entries by image id.
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<()>;
    async fn delete_by_ids(&self, image_ids: &[i64]) -> Result<()>;
    /// Nearest neighbours as (image id, cosine similarity), best first.
    async fn search_by_vector(&self, vector: &[f32], k: usize) -> Result<Vec<(i64, f32)>>;
    async fn count(&self) -> Result<i64>;
}

/// Encode a vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Decode a BLOB back into a vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Vector store backed by the `vector_index` table in the main database.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, entries: &[VectorEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO vector_index (image_id, embedding, file_hash, file_path)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(image_id) DO UPDATE SET
                    embedding = excluded.embedding,
                    file_hash = excluded.file_hash,
                    file_path = excluded.file_path
                "#,
            )
            .bind(entry.image_id)
            .bind(vec_to_blob(&entry.vector))
            .bind(&entry.file_hash)
            .bind(&entry.file_path)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_ids(&self, image_ids: &[i64]) -> Result<()> {
        for id in image_ids {
            sqlx::query("DELETE FROM vector_index WHERE image_id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn search_by_vector(&self, vector: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        let rows = sqlx::query("SELECT image_id, embedding FROM vector_index")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<(i64, f32)> = rows
            .iter()
            .map(|row| {
                let id: i64 = row.get("image_id");
                let blob: Vec<u8> = row.get("embedding");
                (id, cosine_similarity(vector, &blob_to_vec(&blob)))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_index")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
