//! Database Test Utilities

use anyhow::Result;
use platter_resolver::db;
use sqlx::SqlitePool;
use std::path::Path;
use tempfile::TempDir;

/// Create a temporary file-backed database with every table
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let pool = open_test_db(temp_dir.path()).await?;
    Ok((temp_dir, pool))
}

/// Open (or reopen) the test database inside `dir`
pub async fn open_test_db(dir: &Path) -> Result<SqlitePool> {
    let pool = db::init_database_pool(&dir.join("platter.db")).await?;
    Ok(pool)
}

pub async fn seed_album(pool: &SqlitePool, title: &str, artist: &str) -> Result<i64> {
    Ok(db::tracks::insert_album(pool, title, artist).await?)
}

/// Insert a track; `duration` 0 means unknown
pub async fn seed_track(
    pool: &SqlitePool,
    album_id: Option<i64>,
    title: &str,
    artist: &str,
    duration: i64,
) -> Result<i64> {
    Ok(db::tracks::insert_track(pool, album_id, None, title, artist, duration).await?)
}
