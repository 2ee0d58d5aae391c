use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables and indexes. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracked_directories (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            sync_strategy TEXT NOT NULL DEFAULT 'snapshot',
            is_active INTEGER NOT NULL DEFAULT 1,
            sync_interval_secs INTEGER NOT NULL DEFAULT 300,
            last_synced_at INTEGER,
            last_error TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS directory_snapshots (
            id INTEGER PRIMARY KEY,
            tracked_directory_id INTEGER NOT NULL,
            relative_path TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            modified_time REAL NOT NULL,
            last_seen_at INTEGER NOT NULL,
            UNIQUE(tracked_directory_id, relative_path),
            FOREIGN KEY (tracked_directory_id) REFERENCES tracked_directories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merkle_nodes (
            id INTEGER PRIMARY KEY,
            tracked_directory_id INTEGER NOT NULL,
            node_hash TEXT NOT NULL,
            node_type TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            parent_id INTEGER,
            file_hash TEXT,
            file_size INTEGER,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (tracked_directory_id) REFERENCES tracked_directories(id),
            FOREIGN KEY (parent_id) REFERENCES merkle_nodes(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            id INTEGER PRIMARY KEY,
            vector BLOB NOT NULL,
            model_name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            id INTEGER PRIMARY KEY,
            file_hash TEXT NOT NULL UNIQUE,
            file_path TEXT NOT NULL,
            thumbnail_path TEXT,
            width INTEGER,
            height INTEGER,
            embedding_id INTEGER,
            embedding_status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            next_retry_at INTEGER,
            error_code TEXT,
            error_message TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (embedding_id) REFERENCES embeddings(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Written by the clustering layer; participates in cascade deletion here.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cluster_assignments (
            id INTEGER PRIMARY KEY,
            image_id INTEGER NOT NULL,
            cluster_label INTEGER,
            x REAL,
            y REAL,
            FOREIGN KEY (image_id) REFERENCES images(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Backing table for the SQLite vector store.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_index (
            image_id INTEGER PRIMARY KEY,
            embedding BLOB NOT NULL,
            file_hash TEXT NOT NULL,
            file_path TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single-row settings consumed by the scheduler.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            auto_sync_enabled INTEGER NOT NULL DEFAULT 1,
            sync_interval TEXT NOT NULL DEFAULT '5m',
            batch_size INTEGER NOT NULL DEFAULT 12,
            image_extensions TEXT,
            embedding_model TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_directory ON directory_snapshots(tracked_directory_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_merkle_directory ON merkle_nodes(tracked_directory_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_path ON images(file_path)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_images_retry ON images(embedding_status, next_retry_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cluster_assignments_image ON cluster_assignments(image_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
