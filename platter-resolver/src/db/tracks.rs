//! Catalog reads and duration writes

use platter_common::time::{from_db_opt, to_db};
use platter_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Album, Track};
use crate::utils::{max_lock_wait_ms, retry_on_lock};

const TRACK_COLUMNS: &str = r#"
    t.id, t.album_id, a.title AS album_title, t.title, t.artist,
    t.duration, t.duration_source, t.duration_resolved_at
"#;

fn track_from_row(row: &SqliteRow) -> Result<Track> {
    Ok(Track {
        id: row.get("id"),
        album_id: row.get("album_id"),
        album_title: row.get("album_title"),
        title: row.get("title"),
        artist: row.get("artist"),
        duration: row.get("duration"),
        duration_source: row.get("duration_source"),
        duration_resolved_at: from_db_opt(row.get("duration_resolved_at"))?,
    })
}

/// Load a track joined with its album title
pub async fn get_track(pool: &SqlitePool, track_id: i64) -> Result<Option<Track>> {
    let query = format!(
        "SELECT {} FROM tracks t LEFT JOIN albums a ON a.id = t.album_id WHERE t.id = ?",
        TRACK_COLUMNS
    );
    let row = sqlx::query(&query).bind(track_id).fetch_optional(pool).await?;
    row.as_ref().map(track_from_row).transpose()
}

/// Load a track or fail with NotFound
pub async fn require_track(pool: &SqlitePool, track_id: i64) -> Result<Track> {
    get_track(pool, track_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("track {}", track_id)))
}

pub async fn get_album(pool: &SqlitePool, album_id: i64) -> Result<Option<Album>> {
    let row = sqlx::query("SELECT id, title, artist FROM albums WHERE id = ?")
        .bind(album_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| Album {
        id: row.get("id"),
        title: row.get("title"),
        artist: row.get("artist"),
    }))
}

/// Ids of tracks whose duration is unknown, in catalog order
pub async fn track_ids_missing_duration(pool: &SqlitePool) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar("SELECT id FROM tracks WHERE duration IS NULL OR duration = 0 ORDER BY id")
        .fetch_all(pool)
        .await?)
}

/// Every track id, in catalog order
pub async fn all_track_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar("SELECT id FROM tracks ORDER BY id")
        .fetch_all(pool)
        .await?)
}

/// Tracks of one album that still lack a duration, by track number
pub async fn album_tracks_missing_duration(pool: &SqlitePool, album_id: i64) -> Result<Vec<Track>> {
    let query = format!(
        "SELECT {} FROM tracks t LEFT JOIN albums a ON a.id = t.album_id \
         WHERE t.album_id = ? AND (t.duration IS NULL OR t.duration = 0) \
         ORDER BY t.track_number, t.id",
        TRACK_COLUMNS
    );
    let rows = sqlx::query(&query).bind(album_id).fetch_all(pool).await?;
    rows.iter().map(track_from_row).collect()
}

/// Track ids of a playlist in playback order
pub async fn playlist_track_ids(pool: &SqlitePool, playlist_id: i64) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar(
        "SELECT track_id FROM playlist_tracks WHERE playlist_id = ? ORDER BY position",
    )
    .bind(playlist_id)
    .fetch_all(pool)
    .await?)
}

/// Write a duration onto the catalog track and record where it came from
pub async fn apply_duration(pool: &SqlitePool, track_id: i64, duration: i64, source: &str) -> Result<()> {
    let now = to_db(&chrono::Utc::now());
    let max_wait = max_lock_wait_ms(pool).await;

    let updated = retry_on_lock("apply_duration", max_wait, || async {
        let result = sqlx::query(
            "UPDATE tracks SET duration = ?, duration_source = ?, duration_resolved_at = ? WHERE id = ?",
        )
        .bind(duration)
        .bind(source)
        .bind(&now)
        .bind(track_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    })
    .await?;

    if updated == 0 {
        return Err(Error::NotFound(format!("track {}", track_id)));
    }

    tracing::debug!(track_id, duration, source, "Track duration updated");
    Ok(())
}

/// Insert an album row
pub async fn insert_album(pool: &SqlitePool, title: &str, artist: &str) -> Result<i64> {
    let result = sqlx::query("INSERT INTO albums (title, artist) VALUES (?, ?)")
        .bind(title)
        .bind(artist)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Insert a track row; `duration` 0 means unknown
pub async fn insert_track(
    pool: &SqlitePool,
    album_id: Option<i64>,
    track_number: Option<i64>,
    title: &str,
    artist: &str,
    duration: i64,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO tracks (album_id, track_number, title, artist, duration) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(album_id)
    .bind(track_number)
    .bind(title)
    .bind(artist)
    .bind(duration)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Place a track in a playlist
pub async fn add_to_playlist(pool: &SqlitePool, playlist_id: i64, track_id: i64, position: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO playlist_tracks (playlist_id, track_id, position) VALUES (?, ?, ?) \
         ON CONFLICT(playlist_id, track_id) DO UPDATE SET position = excluded.position",
    )
    .bind(playlist_id)
    .bind(track_id)
    .bind(position)
    .execute(pool)
    .await?;
    Ok(())
}
