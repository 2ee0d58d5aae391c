//! In-process job tracker.
//!
//! Sync and ingestion runs report progress through here so the CLI can show
//! what background work is doing. State is process-local and intentionally
//! not persisted; a restart starts with an empty board.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Per-job error lines kept; older entries are dropped first.
const MAX_JOB_ERRORS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    pub id: String,
    pub kind: String,
    pub status: JobStatus,
    pub total: u64,
    pub processed: u64,
    pub progress: f64,
    pub message: Option<String>,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update merged into a job's current state.
#[derive(Debug, Default, Clone)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub total: Option<u64>,
    pub add_processed: u64,
    pub message: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Default)]
pub struct JobTracker {
    jobs: Mutex<HashMap<String, JobState>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending job and return its id.
    pub fn create(&self, kind: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let state = JobState {
            id: id.clone(),
            kind: kind.to_string(),
            status: JobStatus::Pending,
            total: 0,
            processed: 0,
            progress: 0.0,
            message: None,
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.jobs.lock().insert(id.clone(), state);
        id
    }

    /// Merge a partial update into the job. Unknown ids are ignored so a
    /// worker can keep reporting after its job was evicted.
    pub fn apply(&self, id: &str, update: JobUpdate) {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(id) else {
            return;
        };
        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(total) = update.total {
            job.total = total;
        }
        job.processed += update.add_processed;
        if update.message.is_some() {
            job.message = update.message;
        }
        job.errors.extend(update.errors);
        if job.errors.len() > MAX_JOB_ERRORS {
            let excess = job.errors.len() - MAX_JOB_ERRORS;
            job.errors.drain(..excess);
        }
        job.progress = if job.total == 0 {
            match job.status {
                JobStatus::Completed => 1.0,
                _ => 0.0,
            }
        } else {
            (job.processed as f64 / job.total as f64).min(1.0)
        };
        job.updated_at = Utc::now();
    }

    /// Mark the job finished; progress snaps to 1.0 even for empty jobs.
    pub fn complete(&self, id: &str, message: Option<String>) {
        self.apply(
            id,
            JobUpdate {
                status: Some(JobStatus::Completed),
                message,
                ..Default::default()
            },
        );
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.get_mut(id) {
            job.progress = 1.0;
        }
    }

    pub fn fail(&self, id: &str, message: String) {
        self.apply(
            id,
            JobUpdate {
                status: Some(JobStatus::Error),
                message: Some(message),
                ..Default::default()
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<JobState> {
        self.jobs.lock().get(id).cloned()
    }

    /// Jobs newest-first.
    pub fn list(&self) -> Vec<JobState> {
        let mut jobs: Vec<JobState> = self.jobs.lock().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_tracks_processed_over_total() {
        let tracker = JobTracker::new();
        let id = tracker.create("ingest");
        tracker.apply(
            &id,
            JobUpdate {
                status: Some(JobStatus::Processing),
                total: Some(4),
                ..Default::default()
            },
        );
        tracker.apply(
            &id,
            JobUpdate {
                add_processed: 1,
                ..Default::default()
            },
        );
        let job = tracker.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!((job.progress - 0.25).abs() < 1e-9);

        tracker.apply(
            &id,
            JobUpdate {
                add_processed: 3,
                ..Default::default()
            },
        );
        tracker.complete(&id, None);
        let job = tracker.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 1.0);
    }

    #[test]
    fn empty_job_completes_at_full_progress() {
        let tracker = JobTracker::new();
        let id = tracker.create("sync");
        tracker.complete(&id, Some("nothing to do".to_string()));
        let job = tracker.get(&id).unwrap();
        assert_eq!(job.total, 0);
        assert_eq!(job.progress, 1.0);
    }

    #[test]
    fn errors_are_bounded() {
        let tracker = JobTracker::new();
        let id = tracker.create("ingest");
        for i in 0..(MAX_JOB_ERRORS + 10) {
            tracker.apply(
                &id,
                JobUpdate {
                    errors: vec![format!("err {}", i)],
                    ..Default::default()
                },
            );
        }
        let job = tracker.get(&id).unwrap();
        assert_eq!(job.errors.len(), MAX_JOB_ERRORS);
        assert_eq!(job.errors.last().unwrap(), &format!("err {}", MAX_JOB_ERRORS + 9));
    }

    #[test]
    fn unknown_job_update_is_ignored() {
        let tracker = JobTracker::new();
        tracker.apply("missing", JobUpdate::default());
        assert!(tracker.get("missing").is_none());
        assert!(tracker.list().is_empty());
    }
}
