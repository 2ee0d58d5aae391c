//! Strategy dispatch for change detection.
//!
//! Exactly two algorithms exist; callers select one via
//! [`SyncStrategyKind`](crate::models::SyncStrategyKind) and stay agnostic to
//! which is running.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::{SyncReport, SyncStrategyKind, TrackedDirectory};
use crate::{merkle, snapshot};

/// Detect changes under a tracked directory and update the strategy's stored
/// state. Does not touch `images` rows; that is the orchestrator's job.
pub async fn sync(
    pool: &SqlitePool,
    dir: &TrackedDirectory,
    extensions: &[String],
) -> Result<SyncReport> {
    match dir.strategy {
        SyncStrategyKind::Snapshot => snapshot::sync(pool, dir, extensions).await,
        SyncStrategyKind::Merkle => merkle::sync(pool, dir, extensions).await,
    }
}

/// Drop all strategy-owned rows for a directory being removed.
pub async fn cleanup(pool: &SqlitePool, dir: &TrackedDirectory) -> Result<()> {
    match dir.strategy {
        SyncStrategyKind::Snapshot => snapshot::cleanup(pool, dir.id).await,
        SyncStrategyKind::Merkle => merkle::cleanup(pool, dir.id).await,
    }
}

/// Files the strategy currently tracks for a directory.
pub async fn tracked_count(pool: &SqlitePool, dir: &TrackedDirectory) -> Result<i64> {
    match dir.strategy {
        SyncStrategyKind::Snapshot => snapshot::tracked_count(pool, dir.id).await,
        SyncStrategyKind::Merkle => merkle::tracked_count(pool, dir.id).await,
    }
}
