//! # Pixarc
//!
//! A local-first image catalog pipeline: directories are registered for
//! tracking, changes are detected with a snapshot or Merkle-tree strategy,
//! and new files flow through content-hash deduplication, thumbnailing,
//! metadata extraction, and batched embedding into a vector index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │   Registry   │──▶│ Sync engine  │──▶│  SQLite    │
//! │ tracked dirs │   │ detect+ingest│   │ catalog +  │
//! └──────────────┘   └──────┬───────┘   │ vectors    │
//!                           │           └─────┬──────┘
//!                    ┌──────┴──────┐          │
//!                    ▼             ▼          ▼
//!              ┌──────────┐  ┌──────────┐ ┌────────┐
//!              │ Scheduler │  │ Embedding│ │  CLI   │
//!              │ (ticks)   │  │ + retry  │ │ (pxc)  │
//!              └──────────┘  └──────────┘ └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pxc init                          # create database
//! pxc dir add ~/Pictures            # register a directory
//! pxc sync 1                        # detect changes and ingest
//! pxc watch                         # run the background scheduler
//! pxc status                        # catalog and queue counts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`registry`] | Tracked-directory registry |
//! | [`scan`] | Filesystem walking and content hashing |
//! | [`snapshot`] | Snapshot change-detection strategy |
//! | [`merkle`] | Merkle-tree change-detection strategy |
//! | [`strategy`] | Strategy dispatch |
//! | [`ingest`] | Ingestion orchestrator |
//! | [`media`] | Thumbnails and image metadata |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`queue`] | Embedding retry state machine |
//! | [`vector`] | Vector index |
//! | [`jobs`] | In-process job tracker |
//! | [`scheduler`] | Background sync scheduler |
//! | [`settings`] | Runtime settings |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod jobs;
pub mod media;
pub mod merkle;
pub mod migrate;
pub mod models;
pub mod queue;
pub mod registry;
pub mod scan;
pub mod scheduler;
pub mod settings;
pub mod snapshot;
pub mod strategy;
pub mod vector;
