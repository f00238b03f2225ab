//! Database access for the resolver
//!
//! The catalog tables (`albums`, `tracks`, `playlist_tracks`, `settings`) are
//! created by `platter-common`; this module adds the engine's own tables.

pub mod matches;
pub mod progress;
pub mod resolutions;
pub mod settings;
pub mod tracks;

use platter_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open the shared database and make sure the engine tables exist
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = platter_common::db::init_database(db_path).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create engine tables (idempotent)
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duration_resolutions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL UNIQUE REFERENCES tracks(id) ON DELETE CASCADE,
            status TEXT NOT NULL,
            consensus_count INTEGER NOT NULL DEFAULT 0,
            total_sources_queried INTEGER NOT NULL DEFAULT 0,
            successful_queries INTEGER NOT NULL DEFAULT 0,
            original_duration INTEGER,
            resolved_duration INTEGER,
            auto_applied INTEGER NOT NULL DEFAULT 0,
            applied_at TEXT,
            manually_reviewed INTEGER NOT NULL DEFAULT 0,
            reviewed_at TEXT,
            reviewed_by TEXT,
            review_notes TEXT,
            review_action TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_duration_resolutions_status ON duration_resolutions(status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duration_sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            resolution_id INTEGER NOT NULL REFERENCES duration_resolutions(id) ON DELETE CASCADE,
            track_id INTEGER NOT NULL,
            source_name TEXT NOT NULL,
            duration INTEGER NOT NULL DEFAULT 0,
            confidence REAL NOT NULL DEFAULT 0,
            match_score REAL NOT NULL DEFAULT 0,
            external_id TEXT,
            external_url TEXT,
            query_ms INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_duration_sources_resolution ON duration_sources(resolution_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resolver_progress (
            job TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            status TEXT NOT NULL,
            total INTEGER NOT NULL DEFAULT 0,
            processed INTEGER NOT NULL DEFAULT 0,
            resolved INTEGER NOT NULL DEFAULT 0,
            needs_review INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            current_track_id INTEGER,
            current_track TEXT,
            last_processed_id INTEGER,
            started_at TEXT NOT NULL,
            paused_at TEXT,
            resumed_at TEXT,
            completed_at TEXT,
            last_activity_at TEXT NOT NULL,
            last_error TEXT,
            consecutive_errors INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resolver_checkpoint_tracks (
            job TEXT NOT NULL,
            position INTEGER NOT NULL,
            track_id INTEGER NOT NULL,
            PRIMARY KEY (job, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track_video_matches (
            track_id INTEGER PRIMARY KEY REFERENCES tracks(id) ON DELETE CASCADE,
            video_id TEXT,
            video_title TEXT,
            channel TEXT,
            video_duration INTEGER NOT NULL DEFAULT 0,
            thumbnail_url TEXT,
            view_count INTEGER,
            score_composite REAL NOT NULL DEFAULT 0,
            score_title REAL NOT NULL DEFAULT 0,
            score_artist REAL NOT NULL DEFAULT 0,
            score_duration REAL NOT NULL DEFAULT 0,
            score_channel REAL NOT NULL DEFAULT 0,
            method TEXT NOT NULL,
            status TEXT NOT NULL,
            needs_review INTEGER NOT NULL DEFAULT 0,
            matched_at TEXT,
            reviewed_at TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track_video_candidates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
            rank INTEGER NOT NULL,
            video_id TEXT NOT NULL,
            video_title TEXT NOT NULL,
            channel TEXT NOT NULL,
            video_duration INTEGER NOT NULL DEFAULT 0,
            thumbnail_url TEXT,
            view_count INTEGER,
            score_composite REAL NOT NULL DEFAULT 0,
            score_title REAL NOT NULL DEFAULT 0,
            score_artist REAL NOT NULL DEFAULT 0,
            score_duration REAL NOT NULL DEFAULT 0,
            score_channel REAL NOT NULL DEFAULT 0,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (track_id, video_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Resolver tables initialized");

    Ok(())
}
