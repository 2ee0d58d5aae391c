//! Runtime settings stored in the database.
//!
//! A single `settings` row overrides selected config values at runtime; the
//! scheduler re-reads it each tick, so changes take effect without a restart.
//! Absent row or absent columns fall back to the loaded config.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::{parse_duration, Config};

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub auto_sync_enabled: bool,
    pub sync_interval_secs: u64,
    pub batch_size: usize,
    pub image_extensions: Vec<String>,
    pub embedding_model: Option<String>,
}

impl Settings {
    /// Settings as they stand with no database row present.
    pub fn from_config(config: &Config) -> Self {
        let sync_interval_secs = parse_duration(&config.sync.default_interval)
            .map(|d| d.as_secs())
            .unwrap_or(300);
        Self {
            auto_sync_enabled: config.sync.auto_sync,
            sync_interval_secs,
            batch_size: config.embedding.batch_size,
            image_extensions: config.scan.extensions.clone(),
            embedding_model: config.embedding.model.clone(),
        }
    }
}

/// Load effective settings: the config defaults overlaid with the database row.
pub async fn load_settings(pool: &SqlitePool, config: &Config) -> Result<Settings> {
    let mut settings = Settings::from_config(config);

    let row = sqlx::query(
        "SELECT auto_sync_enabled, sync_interval, batch_size, image_extensions, embedding_model \
         FROM settings WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    if let Some(row) = row {
        settings.auto_sync_enabled = row.get::<i64, _>("auto_sync_enabled") != 0;
        let interval: String = row.get("sync_interval");
        if let Ok(duration) = parse_duration(&interval) {
            settings.sync_interval_secs = duration.as_secs();
        }
        let batch_size: i64 = row.get("batch_size");
        if batch_size > 0 {
            settings.batch_size = batch_size as usize;
        }
        if let Some(extensions) = row.get::<Option<String>, _>("image_extensions") {
            let parsed: Vec<String> = extensions
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                settings.image_extensions = parsed;
            }
        }
        if let Some(model) = row.get::<Option<String>, _>("embedding_model") {
            settings.embedding_model = Some(model);
        }
    }

    Ok(settings)
}

/// Persist the auto-sync flag and interval, creating the row if needed.
pub async fn save_sync_settings(
    pool: &SqlitePool,
    auto_sync_enabled: bool,
    sync_interval: &str,
) -> Result<()> {
    parse_duration(sync_interval)?;
    sqlx::query(
        r#"
        INSERT INTO settings (id, auto_sync_enabled, sync_interval)
        VALUES (1, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            auto_sync_enabled = excluded.auto_sync_enabled,
            sync_interval = excluded.sync_interval
        "#,
    )
    .bind(auto_sync_enabled as i64)
    .bind(sync_interval)
    .execute(pool)
    .await?;
    Ok(())
}
