//! Background sync engine and scheduler.
//!
//! [`SyncEngine`] runs one full sync-and-ingest pass for a directory and is
//! shared by the CLI's manual sync and the background [`SyncScheduler`]. A
//! per-directory async mutex keeps the two from running the same directory
//! concurrently. The scheduler ticks on a fixed interval, re-reads runtime
//! settings each tick, syncs directories whose interval has elapsed, and
//! finishes each tick with an embedding retry pass.

use anyhow::{bail, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::ingest::{IngestOutcome, Ingestor};
use crate::jobs::JobTracker;
use crate::models::{SyncReport, TrackedDirectory};
use crate::queue;
use crate::registry::DirectoryRegistry;
use crate::settings::{self, Settings};
use crate::strategy;
use crate::vector::VectorStore;
use crate::embedding::Embedder;

/// One async mutex per tracked directory id, created on demand.
#[derive(Default)]
pub struct DirectoryLocks {
    inner: parking_lot::Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl DirectoryLocks {
    pub fn lock_for(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Result of one sync-and-ingest pass over a directory.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub job_id: String,
    pub report: SyncReport,
    pub outcome: IngestOutcome,
}

pub struct SyncEngine {
    pool: SqlitePool,
    config: Config,
    registry: Arc<DirectoryRegistry>,
    ingestor: Arc<Ingestor>,
    tracker: Arc<JobTracker>,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    locks: DirectoryLocks,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        config: Config,
        registry: Arc<DirectoryRegistry>,
        ingestor: Arc<Ingestor>,
        tracker: Arc<JobTracker>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            pool,
            config,
            registry,
            ingestor,
            tracker,
            embedder,
            vector_store,
            locks: DirectoryLocks::default(),
        }
    }

    pub fn registry(&self) -> &DirectoryRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    /// Sync one directory and ingest the resulting changes. Waits for any
    /// in-flight run on the same directory to finish first.
    pub async fn sync_directory(&self, id: i64) -> Result<SyncSummary> {
        let Some(dir) = self.registry.get_directory(id).await? else {
            bail!("No tracked directory with id {}", id);
        };
        let settings = settings::load_settings(&self.pool, &self.config).await?;
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;
        self.run_locked(&dir, &settings).await
    }

    /// Like [`sync_directory`](Self::sync_directory) but skips instead of
    /// waiting when the directory is already being synced.
    pub async fn try_sync_directory(
        &self,
        dir: &TrackedDirectory,
        settings: &Settings,
    ) -> Result<Option<SyncSummary>> {
        let lock = self.locks.lock_for(dir.id);
        let Ok(_guard) = lock.try_lock() else {
            debug!(id = dir.id, "Sync already in progress, skipping");
            return Ok(None);
        };
        self.run_locked(dir, settings).await.map(Some)
    }

    async fn run_locked(&self, dir: &TrackedDirectory, settings: &Settings) -> Result<SyncSummary> {
        let job_id = self.tracker.create("sync");
        match self.run_job(dir, settings, &job_id).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                self.tracker.fail(&job_id, e.to_string());
                Err(e)
            }
        }
    }

    async fn run_job(
        &self,
        dir: &TrackedDirectory,
        settings: &Settings,
        job_id: &str,
    ) -> Result<SyncSummary> {
        info!(id = dir.id, path = %dir.path.display(), strategy = %dir.strategy, "Syncing directory");

        let report = strategy::sync(&self.pool, dir, &settings.image_extensions).await?;
        let outcome = self
            .ingestor
            .apply_sync_report(&report, &dir.path, job_id, settings.batch_size)
            .await?;

        let first_error = report.errors.first().map(String::as_str);
        self.registry.record_sync_outcome(dir.id, first_error).await?;

        info!(
            id = dir.id,
            added = report.added.len(),
            modified = report.modified.len(),
            deleted = report.deleted.len(),
            unchanged = report.unchanged,
            "Sync complete"
        );
        Ok(SyncSummary {
            job_id: job_id.to_string(),
            report,
            outcome,
        })
    }

    /// One scheduler tick: sync due directories, then retry failed embeddings.
    pub async fn run_tick(&self) -> Result<()> {
        let settings = settings::load_settings(&self.pool, &self.config).await?;
        if settings.auto_sync_enabled {
            let dirs = self.registry.list_active().await?;
            for dir in &dirs {
                if !is_due(dir, &settings) {
                    continue;
                }
                if let Err(e) = self.try_sync_directory(dir, &settings).await {
                    error!(id = dir.id, error = %e, "Scheduled sync failed");
                    self.registry
                        .record_sync_outcome(dir.id, Some(&e.to_string()))
                        .await?;
                }
            }
        } else {
            debug!("Auto-sync disabled, skipping tick");
        }

        if self.config.embedding.is_enabled() {
            // The embedder is wired at startup; a model change in settings
            // only takes effect after a restart.
            if let Some(model) = &settings.embedding_model {
                if model != self.embedder.model_name() {
                    warn!(
                        requested = %model,
                        active = %self.embedder.model_name(),
                        "Embedding model setting differs from the active model; restart to apply"
                    );
                }
            }
            let mut embed_cfg = self.config.embedding.clone();
            embed_cfg.batch_size = settings.batch_size;
            let (succeeded, failed) = queue::run_retry_pass(
                &self.pool,
                self.embedder.as_ref(),
                self.vector_store.as_ref(),
                &embed_cfg,
            )
            .await?;
            if succeeded + failed > 0 {
                info!(succeeded, failed, "Embedding retry pass finished");
            }
        }
        Ok(())
    }
}

fn is_due(dir: &TrackedDirectory, settings: &Settings) -> bool {
    let interval = if dir.sync_interval_secs > 0 {
        dir.sync_interval_secs
    } else {
        settings.sync_interval_secs as i64
    };
    match dir.last_synced_at {
        None => true,
        Some(last) => Utc::now().timestamp() - last >= interval,
    }
}

/// Owns the background tick task. Start is idempotent; stop is cooperative
/// and waits for the current tick to finish.
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    tick: Duration,
    state: parking_lot::Mutex<Option<RunningScheduler>>,
}

struct RunningScheduler {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, tick_secs: u64) -> Self {
        Self {
            engine,
            tick: Duration::from_secs(tick_secs.max(1)),
            state: parking_lot::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }

    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = self.engine.clone();
        let tick = self.tick;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(tick_secs = tick.as_secs(), "Sync scheduler started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = engine.run_tick().await {
                            error!(error = %e, "Scheduler tick failed");
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Sync scheduler stopped");
        });
        *state = Some(RunningScheduler { stop_tx, handle });
    }

    pub async fn stop(&self) {
        let running = self.state.lock().take();
        if let Some(running) = running {
            let _ = running.stop_tx.send(true);
            let _ = running.handle.await;
        }
    }
}
