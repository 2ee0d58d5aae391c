//! Core data types used throughout pixarc.
//!
//! These types represent tracked directories, detected filesystem changes,
//! and the image rows that flow through the ingestion pipeline.

use anyhow::{bail, Result};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Which change-detection algorithm a tracked directory uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategyKind {
    Snapshot,
    Merkle,
}

impl SyncStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategyKind::Snapshot => "snapshot",
            SyncStrategyKind::Merkle => "merkle",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "snapshot" => Ok(SyncStrategyKind::Snapshot),
            "merkle" => Ok(SyncStrategyKind::Merkle),
            other => bail!(
                "Unknown sync strategy: '{}'. Available: snapshot, merkle",
                other
            ),
        }
    }
}

impl fmt::Display for SyncStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directory registered for periodic synchronization.
#[derive(Debug, Clone)]
pub struct TrackedDirectory {
    pub id: i64,
    /// Canonical absolute path. Unique.
    pub path: PathBuf,
    pub strategy: SyncStrategyKind,
    pub is_active: bool,
    pub sync_interval_secs: i64,
    /// Unix seconds of the last successful sync.
    pub last_synced_at: Option<i64>,
    /// Last failure message, cleared on success.
    pub last_error: Option<String>,
    pub created_at: i64,
}

/// Registry read view: a tracked directory plus live counts.
///
/// `indexed_files` counts `images` rows under the path; `tracked_files` is the
/// strategy's own bookkeeping. The two diverge when embedding lags detection.
#[derive(Debug, Clone)]
pub struct DirectoryDetails {
    pub directory: TrackedDirectory,
    pub indexed_files: i64,
    pub tracked_files: i64,
}

/// Result of one sync pass over a tracked directory. Not persisted.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub tracked_directory_id: i64,
    /// Absolute paths of files to (re)index.
    pub added: Vec<PathBuf>,
    /// Absolute paths of content-changed files (snapshot strategy only).
    pub modified: Vec<PathBuf>,
    /// Relative paths no longer present under the root.
    pub deleted: Vec<String>,
    pub unchanged: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
    pub strategy: SyncStrategyKind,
}

impl SyncReport {
    pub fn empty_with_error(
        tracked_directory_id: i64,
        strategy: SyncStrategyKind,
        error: String,
        duration: Duration,
    ) -> Self {
        Self {
            tracked_directory_id,
            added: Vec::new(),
            modified: Vec::new(),
            deleted: Vec::new(),
            unchanged: 0,
            errors: vec![error],
            duration,
            strategy,
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.modified.is_empty() || !self.deleted.is_empty()
    }
}

/// Lifecycle of an image's embedding. See the queue module for transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingStatus {
    Pending,
    Processing,
    Completed,
    FailedRetryable,
    FailedPermanent,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Processing => "processing",
            EmbeddingStatus::Completed => "completed",
            EmbeddingStatus::FailedRetryable => "failed_retryable",
            EmbeddingStatus::FailedPermanent => "failed_permanent",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(EmbeddingStatus::Pending),
            "processing" => Ok(EmbeddingStatus::Processing),
            "completed" => Ok(EmbeddingStatus::Completed),
            "failed_retryable" => Ok(EmbeddingStatus::FailedRetryable),
            "failed_permanent" => Ok(EmbeddingStatus::FailedPermanent),
            other => bail!("Unknown embedding status: '{}'", other),
        }
    }
}

/// An image row. Identity is the content hash, not the path.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub id: i64,
    pub file_hash: String,
    /// Most recently seen location of this content.
    pub file_path: PathBuf,
    pub thumbnail_path: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub embedding_id: Option<i64>,
    pub embedding_status: EmbeddingStatus,
    pub retry_count: i64,
    pub next_retry_at: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
}

/// Basic image attributes extracted at ingest time.
#[derive(Debug, Clone, Default)]
pub struct ImageMeta {
    pub width: Option<u32>,
    pub height: Option<u32>,
}
