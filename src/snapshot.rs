//! Snapshot-based change detection.
//!
//! Tracks each file's relative path, size, mtime, and content hash in the
//! `directory_snapshots` table. Detection is two-tier: size/mtime are compared
//! first and content is hashed only when they differ, so an unchanged corpus
//! costs one stat per file. A file whose mtime moved but whose hash did not is
//! counted unchanged and has its stored mtime refreshed (touch/clock skew).

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::models::{SyncReport, SyncStrategyKind, TrackedDirectory};
use crate::scan;

#[derive(Debug, Clone)]
struct SnapshotRow {
    file_hash: String,
    file_size: i64,
    modified_time: f64,
}

/// Outcome of the blocking scan/compare phase.
struct Detection {
    /// (relative, absolute, hash, size, mtime)
    added: Vec<(String, PathBuf, String, i64, f64)>,
    modified: Vec<(String, PathBuf, String, i64, f64)>,
    /// mtime moved but content did not; stored mtime is refreshed.
    refreshed: Vec<(String, f64)>,
    seen: Vec<String>,
    unchanged: usize,
    errors: Vec<String>,
}

pub async fn sync(
    pool: &SqlitePool,
    dir: &TrackedDirectory,
    extensions: &[String],
) -> Result<SyncReport> {
    let start = Instant::now();
    let root = dir.path.clone();

    if !root.is_dir() {
        return Ok(SyncReport::empty_with_error(
            dir.id,
            SyncStrategyKind::Snapshot,
            format!("Directory does not exist: {}", root.display()),
            start.elapsed(),
        ));
    }

    let existing = load_snapshots(pool, dir.id).await?;

    let exts = extensions.to_vec();
    let existing_for_scan = existing.clone();
    let scan_root = root.clone();
    let detection = tokio::task::spawn_blocking(move || {
        detect_changes(&scan_root, &exts, &existing_for_scan)
    })
    .await??;

    let deleted: Vec<String> = existing
        .keys()
        .filter(|rel| !detection.seen.contains(rel))
        .cloned()
        .collect();

    persist(pool, dir.id, &detection, &deleted).await?;

    Ok(SyncReport {
        tracked_directory_id: dir.id,
        added: detection.added.iter().map(|(_, p, ..)| p.clone()).collect(),
        modified: detection
            .modified
            .iter()
            .map(|(_, p, ..)| p.clone())
            .collect(),
        deleted,
        unchanged: detection.unchanged,
        errors: detection.errors,
        duration: start.elapsed(),
        strategy: SyncStrategyKind::Snapshot,
    })
}

pub async fn cleanup(pool: &SqlitePool, tracked_directory_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM directory_snapshots WHERE tracked_directory_id = ?")
        .bind(tracked_directory_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Count of files currently tracked by this strategy for a directory.
pub async fn tracked_count(pool: &SqlitePool, tracked_directory_id: i64) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM directory_snapshots WHERE tracked_directory_id = ?")
            .bind(tracked_directory_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

async fn load_snapshots(
    pool: &SqlitePool,
    tracked_directory_id: i64,
) -> Result<HashMap<String, SnapshotRow>> {
    let rows = sqlx::query(
        "SELECT relative_path, file_hash, file_size, modified_time
         FROM directory_snapshots WHERE tracked_directory_id = ?",
    )
    .bind(tracked_directory_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            (
                row.get::<String, _>("relative_path"),
                SnapshotRow {
                    file_hash: row.get("file_hash"),
                    file_size: row.get("file_size"),
                    modified_time: row.get("modified_time"),
                },
            )
        })
        .collect())
}

fn detect_changes(
    root: &Path,
    extensions: &[String],
    existing: &HashMap<String, SnapshotRow>,
) -> Result<Detection> {
    let mut detection = Detection {
        added: Vec::new(),
        modified: Vec::new(),
        refreshed: Vec::new(),
        seen: Vec::new(),
        unchanged: 0,
        errors: Vec::new(),
    };

    for path in scan::scan_images(root, extensions)? {
        let rel = scan::relative_to(root, &path);
        let stat = match scan::stat_file(&path) {
            Ok(s) => s,
            Err(e) => {
                detection.errors.push(format!("Error reading {}: {}", path.display(), e));
                continue;
            }
        };
        detection.seen.push(rel.clone());

        match existing.get(&rel) {
            None => {
                let hash = match scan::compute_file_hash(&path) {
                    Ok(h) => h,
                    Err(e) => {
                        detection
                            .errors
                            .push(format!("Error hashing {}: {}", path.display(), e));
                        continue;
                    }
                };
                detection.added.push((rel, path, hash, stat.size, stat.mtime));
            }
            Some(prev) if prev.file_size != stat.size || prev.modified_time != stat.mtime => {
                // Metadata moved; only a hash mismatch is a real change.
                let hash = match scan::compute_file_hash(&path) {
                    Ok(h) => h,
                    Err(e) => {
                        detection
                            .errors
                            .push(format!("Error hashing {}: {}", path.display(), e));
                        continue;
                    }
                };
                if hash != prev.file_hash {
                    detection
                        .modified
                        .push((rel, path, hash, stat.size, stat.mtime));
                } else {
                    detection.refreshed.push((rel, stat.mtime));
                    detection.unchanged += 1;
                }
            }
            Some(_) => detection.unchanged += 1,
        }
    }

    Ok(detection)
}

/// Upsert rows for added/modified, refresh touched mtimes, drop deleted rows.
async fn persist(
    pool: &SqlitePool,
    tracked_directory_id: i64,
    detection: &Detection,
    deleted: &[String],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    for (rel, _, hash, size, mtime) in detection.added.iter().chain(detection.modified.iter()) {
        sqlx::query(
            r#"
            INSERT INTO directory_snapshots
                (tracked_directory_id, relative_path, file_hash, file_size, modified_time, last_seen_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(tracked_directory_id, relative_path) DO UPDATE SET
                file_hash = excluded.file_hash,
                file_size = excluded.file_size,
                modified_time = excluded.modified_time,
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(tracked_directory_id)
        .bind(rel)
        .bind(hash)
        .bind(size)
        .bind(mtime)
        .bind(now)
        .execute(pool)
        .await?;
    }

    for (rel, mtime) in &detection.refreshed {
        sqlx::query(
            "UPDATE directory_snapshots SET modified_time = ?, last_seen_at = ?
             WHERE tracked_directory_id = ? AND relative_path = ?",
        )
        .bind(mtime)
        .bind(now)
        .bind(tracked_directory_id)
        .bind(rel)
        .execute(pool)
        .await?;
    }

    for rel in deleted {
        sqlx::query(
            "DELETE FROM directory_snapshots WHERE tracked_directory_id = ? AND relative_path = ?",
        )
        .bind(tracked_directory_id)
        .bind(rel)
        .execute(pool)
        .await?;
    }

    Ok(())
}
