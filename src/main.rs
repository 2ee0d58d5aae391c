//! # Pixarc CLI (`pxc`)
//!
//! The `pxc` binary manages the image catalog: registering directories,
//! running syncs, ingesting ad-hoc folders, and supervising the background
//! scheduler.
//!
//! ## Usage
//!
//! ```bash
//! pxc --config ./pixarc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pxc init` | Create the SQLite database and run schema migrations |
//! | `pxc dir add <path>` | Register a directory for tracking |
//! | `pxc dir list` | List tracked directories with file counts |
//! | `pxc dir get <id>` | Show one tracked directory in detail |
//! | `pxc dir remove <id>` | Untrack a directory and purge its images |
//! | `pxc sync <id>` | Detect changes in a directory and ingest them |
//! | `pxc ingest <path>` | Ingest every image under a path, untracked |
//! | `pxc watch` | Run the background sync scheduler until Ctrl-C |
//! | `pxc jobs` | Show jobs from the current process |
//! | `pxc retry` | Run one embedding retry pass |
//! | `pxc status` | Catalog and embedding-queue counts |

use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

use pixarc::config::{self, parse_duration, Config};
use pixarc::embedding::{create_embedder, Embedder};
use pixarc::ingest::Ingestor;
use pixarc::jobs::JobTracker;
use pixarc::media::{ImageMetadataExtractor, ImageThumbnailer};
use pixarc::models::SyncStrategyKind;
use pixarc::registry::DirectoryRegistry;
use pixarc::scheduler::{SyncEngine, SyncScheduler};
use pixarc::vector::{SqliteVectorStore, VectorStore};
use pixarc::{db, migrate, queue, settings};

/// Pixarc CLI — a local-first image catalog with directory tracking,
/// change detection, and embedding-backed search indexing.
#[derive(Parser)]
#[command(
    name = "pxc",
    about = "Pixarc — track image directories, detect changes, and build a searchable catalog",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./pixarc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent;
    /// running it multiple times is safe.
    Init,

    /// Manage tracked directories.
    Dir {
        #[command(subcommand)]
        action: DirAction,
    },

    /// Sync one tracked directory now.
    ///
    /// Runs change detection with the directory's strategy and ingests the
    /// resulting additions, modifications, and removals.
    Sync {
        /// Tracked directory id (see `pxc dir list`).
        id: i64,
    },

    /// Ingest all images under a path without tracking it.
    ///
    /// Walks the directory, deduplicates by content hash, and runs the full
    /// thumbnail/metadata/embedding pipeline over what it finds.
    Ingest {
        /// Directory to ingest.
        path: PathBuf,
    },

    /// Run the background scheduler until interrupted.
    ///
    /// Each tick syncs due directories and retries failed embeddings.
    /// Runtime settings are re-read every tick.
    Watch,

    /// Show jobs tracked by the current process.
    Jobs {
        /// Show a single job instead of all of them.
        id: Option<String>,
    },

    /// Run one embedding retry pass over due failures.
    Retry,

    /// Show catalog counts and the embedding queue breakdown.
    Status,
}

/// Tracked-directory subcommands.
#[derive(Subcommand)]
enum DirAction {
    /// Register a directory, or update it if already registered.
    Add {
        /// Directory to track. Stored canonicalized.
        path: PathBuf,

        /// Change-detection strategy: `snapshot` or `merkle`.
        #[arg(long, default_value = "snapshot")]
        strategy: String,

        /// Sync interval, e.g. "30s", "5m", "2h".
        #[arg(long)]
        interval: Option<String>,
    },

    /// List all tracked directories.
    List,

    /// Show one tracked directory with its file counts.
    Get {
        /// Tracked directory id.
        id: i64,
    },

    /// Untrack a directory and delete its images, embeddings, and vectors.
    Remove {
        /// Tracked directory id.
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Dir { action } => {
            run_dir(&cfg, action).await?;
        }
        Commands::Sync { id } => {
            let (_, engine) = build_engine(&cfg).await?;
            let summary = engine.sync_directory(id).await?;
            println!("Job {}", summary.job_id);
            println!(
                "Sync finished: {} added, {} modified, {} deleted, {} unchanged",
                summary.report.added.len(),
                summary.report.modified.len(),
                summary.report.deleted.len(),
                summary.report.unchanged
            );
            println!(
                "Ingested {} ({} deduplicated, {} removed, {} failed)",
                summary.outcome.ingested,
                summary.outcome.deduplicated,
                summary.outcome.removed,
                summary.outcome.failed
            );
            for error in &summary.report.errors {
                println!("  warning: {}", error);
            }
        }
        Commands::Ingest { path } => {
            let (pool, engine) = build_engine(&cfg).await?;
            let effective = settings::load_settings(&pool, &cfg).await?;
            let job_id = engine.tracker().create("ingest");
            let outcome = engine
                .ingestor()
                .ingest_directory(
                    &path,
                    &job_id,
                    &effective.image_extensions,
                    effective.batch_size,
                )
                .await?;
            println!(
                "Ingested {} ({} deduplicated, {} failed)",
                outcome.ingested, outcome.deduplicated, outcome.failed
            );
        }
        Commands::Watch => {
            let (_, engine) = build_engine(&cfg).await?;
            let scheduler = SyncScheduler::new(engine, cfg.sync.tick_secs);
            scheduler.start();
            println!("Scheduler running, press Ctrl-C to stop.");
            tokio::signal::ctrl_c().await?;
            scheduler.stop().await;
        }
        Commands::Jobs { id } => {
            let (_, engine) = build_engine(&cfg).await?;
            match id {
                Some(id) => match engine.tracker().get(&id) {
                    Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                    None => println!("No job with id {}", id),
                },
                None => {
                    let jobs = engine.tracker().list();
                    if jobs.is_empty() {
                        println!("No jobs in this process.");
                    }
                    for job in jobs {
                        println!("{}", serde_json::to_string_pretty(&job)?);
                    }
                }
            }
        }
        Commands::Retry => {
            let pool = db::connect(&cfg).await?;
            let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&cfg.embedding)?);
            let vector_store = SqliteVectorStore::new(pool.clone());
            let (succeeded, failed) =
                queue::run_retry_pass(&pool, embedder.as_ref(), &vector_store, &cfg.embedding)
                    .await?;
            println!("Retry pass: {} succeeded, {} failed", succeeded, failed);
        }
        Commands::Status => {
            run_status(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_dir(cfg: &Config, action: DirAction) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let registry = DirectoryRegistry::new(pool.clone(), cfg.security.allowed_prefixes.clone());

    match action {
        DirAction::Add {
            path,
            strategy,
            interval,
        } => {
            let strategy = SyncStrategyKind::parse(&strategy)?;
            let interval_secs = match interval {
                Some(s) => parse_duration(&s)?.as_secs() as i64,
                None => parse_duration(&cfg.sync.default_interval)?.as_secs() as i64,
            };
            let dir = registry.add(&path, strategy, interval_secs).await?;
            println!(
                "Tracking [{}] {} (strategy: {}, every {}s)",
                dir.id,
                dir.path.display(),
                dir.strategy,
                dir.sync_interval_secs
            );
        }
        DirAction::List => {
            let dirs = registry.list().await?;
            if dirs.is_empty() {
                println!("No tracked directories. Add one with `pxc dir add <path>`.");
                return Ok(());
            }
            for details in dirs {
                let d = &details.directory;
                let status = if d.is_active { "active" } else { "inactive" };
                println!(
                    "[{}] {} ({}, {}) indexed: {} tracked: {}",
                    d.id,
                    d.path.display(),
                    d.strategy,
                    status,
                    details.indexed_files,
                    details.tracked_files
                );
                if let Some(err) = &d.last_error {
                    println!("    last error: {}", err);
                }
            }
        }
        DirAction::Get { id } => {
            let Some(details) = registry.get(id).await? else {
                println!("No tracked directory with id {}", id);
                return Ok(());
            };
            let d = &details.directory;
            println!("id:             {}", d.id);
            println!("path:           {}", d.path.display());
            println!("strategy:       {}", d.strategy);
            println!("active:         {}", d.is_active);
            println!("interval:       {}s", d.sync_interval_secs);
            println!("indexed files:  {}", details.indexed_files);
            println!("tracked files:  {}", details.tracked_files);
            match d.last_synced_at {
                Some(ts) => println!("last synced:    {}", ts),
                None => println!("last synced:    never"),
            }
            if let Some(err) = &d.last_error {
                println!("last error:     {}", err);
            }
        }
        DirAction::Remove { id } => {
            let vector_store = SqliteVectorStore::new(pool.clone());
            if registry.remove(id, &vector_store).await? {
                println!("Removed tracked directory {}", id);
            } else {
                println!("No tracked directory with id {}", id);
            }
        }
    }
    Ok(())
}

async fn run_status(cfg: &Config) -> Result<()> {
    let pool = db::connect(cfg).await?;

    let images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
        .fetch_one(&pool)
        .await?;
    let directories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracked_directories")
        .fetch_one(&pool)
        .await?;
    let vector_store = SqliteVectorStore::new(pool.clone());
    let vectors = vector_store.count().await?;
    let effective = settings::load_settings(&pool, cfg).await?;

    println!("tracked directories: {}", directories);
    println!("images:              {}", images);
    println!("vectors:             {}", vectors);
    println!(
        "auto-sync:           {} (every {}s)",
        if effective.auto_sync_enabled { "on" } else { "off" },
        effective.sync_interval_secs
    );

    let stats = queue::queue_stats(&pool).await?;
    if !stats.is_empty() {
        println!("embedding queue:");
        let mut entries: Vec<_> = stats.iter().collect();
        entries.sort_by_key(|(status, _)| status.as_str());
        for (status, count) in entries {
            println!("  {:<17} {}", status.as_str(), count);
        }
    }
    Ok(())
}

/// Wire the full pipeline from configuration.
async fn build_engine(cfg: &Config) -> Result<(SqlitePool, Arc<SyncEngine>)> {
    let pool = db::connect(cfg).await?;
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&cfg.embedding)?);
    let vector_store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(pool.clone()));
    let tracker = Arc::new(JobTracker::new());
    let registry = Arc::new(DirectoryRegistry::new(
        pool.clone(),
        cfg.security.allowed_prefixes.clone(),
    ));
    let ingestor = Arc::new(Ingestor::new(
        pool.clone(),
        embedder.clone(),
        Arc::new(ImageThumbnailer::new(
            cfg.scan.thumbnails_dir.clone(),
            cfg.scan.thumbnail_size,
        )),
        Arc::new(ImageMetadataExtractor),
        vector_store.clone(),
        cfg.embedding.clone(),
        tracker.clone(),
    ));
    let engine = Arc::new(SyncEngine::new(
        pool.clone(),
        cfg.clone(),
        registry,
        ingestor,
        tracker,
        embedder,
        vector_store,
    ));
    Ok((pool, engine))
}
