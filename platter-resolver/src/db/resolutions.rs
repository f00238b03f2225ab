//! Duration resolutions and their per-source answers

use platter_common::time::{from_db, from_db_opt, to_db};
use platter_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{NewSourceResult, Resolution, ResolutionStatus, ReviewAction, SourceResult};
use crate::utils::{max_lock_wait_ms, retry_on_lock};

fn parse_err(e: String) -> Error {
    Error::Internal(e)
}

fn resolution_from_row(row: &SqliteRow) -> Result<Resolution> {
    let status: String = row.get("status");
    let review_action: Option<String> = row.get("review_action");

    Ok(Resolution {
        id: row.get("id"),
        track_id: row.get("track_id"),
        status: status.parse::<ResolutionStatus>().map_err(parse_err)?,
        consensus_count: row.get("consensus_count"),
        total_sources_queried: row.get("total_sources_queried"),
        successful_queries: row.get("successful_queries"),
        original_duration: row.get("original_duration"),
        resolved_duration: row.get("resolved_duration"),
        auto_applied: row.get::<i64, _>("auto_applied") != 0,
        applied_at: from_db_opt(row.get("applied_at"))?,
        manually_reviewed: row.get::<i64, _>("manually_reviewed") != 0,
        reviewed_at: from_db_opt(row.get("reviewed_at"))?,
        reviewed_by: row.get("reviewed_by"),
        review_notes: row.get("review_notes"),
        review_action: review_action
            .map(|a| a.parse::<ReviewAction>())
            .transpose()
            .map_err(parse_err)?,
        created_at: from_db(&row.get::<String, _>("created_at"))?,
        updated_at: from_db(&row.get::<String, _>("updated_at"))?,
        sources: Vec::new(),
    })
}

fn source_from_row(row: &SqliteRow) -> Result<SourceResult> {
    Ok(SourceResult {
        id: row.get("id"),
        resolution_id: row.get("resolution_id"),
        track_id: row.get("track_id"),
        source_name: row.get("source_name"),
        duration: row.get("duration"),
        confidence: row.get("confidence"),
        match_score: row.get("match_score"),
        external_id: row.get("external_id"),
        external_url: row.get("external_url"),
        query_ms: row.get("query_ms"),
        error_message: row.get("error_message"),
        created_at: from_db(&row.get::<String, _>("created_at"))?,
    })
}

async fn attach_sources(pool: &SqlitePool, mut resolution: Resolution) -> Result<Resolution> {
    resolution.sources = list_sources(pool, resolution.id).await?;
    Ok(resolution)
}

/// Resolution for a track, with its source answers
pub async fn get_for_track(pool: &SqlitePool, track_id: i64) -> Result<Option<Resolution>> {
    let row = sqlx::query("SELECT * FROM duration_resolutions WHERE track_id = ?")
        .bind(track_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(attach_sources(pool, resolution_from_row(&row)?).await?)),
        None => Ok(None),
    }
}

/// Resolution by id, with its source answers
pub async fn get(pool: &SqlitePool, resolution_id: i64) -> Result<Option<Resolution>> {
    let row = sqlx::query("SELECT * FROM duration_resolutions WHERE id = ?")
        .bind(resolution_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(attach_sources(pool, resolution_from_row(&row)?).await?)),
        None => Ok(None),
    }
}

pub async fn require(pool: &SqlitePool, resolution_id: i64) -> Result<Resolution> {
    get(pool, resolution_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("resolution {}", resolution_id)))
}

/// Resolutions in a given status, oldest first
pub async fn list_by_status(pool: &SqlitePool, status: ResolutionStatus) -> Result<Vec<Resolution>> {
    let rows = sqlx::query("SELECT * FROM duration_resolutions WHERE status = ? ORDER BY created_at, id")
        .bind(status.as_str())
        .fetch_all(pool)
        .await?;

    let mut resolutions = Vec::with_capacity(rows.len());
    for row in &rows {
        resolutions.push(attach_sources(pool, resolution_from_row(row)?).await?);
    }
    Ok(resolutions)
}

pub async fn list_sources(pool: &SqlitePool, resolution_id: i64) -> Result<Vec<SourceResult>> {
    let rows = sqlx::query("SELECT * FROM duration_sources WHERE resolution_id = ? ORDER BY id")
        .bind(resolution_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(source_from_row).collect()
}

/// Start a fresh in-progress resolution for a track
pub async fn create(pool: &SqlitePool, track_id: i64, original_duration: Option<i64>) -> Result<Resolution> {
    let now = to_db(&chrono::Utc::now());
    let max_wait = max_lock_wait_ms(pool).await;

    let id = retry_on_lock("create_resolution", max_wait, || async {
        let result = sqlx::query(
            r#"
            INSERT INTO duration_resolutions (track_id, status, original_duration, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(track_id)
        .bind(ResolutionStatus::InProgress.as_str())
        .bind(original_duration)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(result.last_insert_rowid())
    })
    .await?;

    require(pool, id).await
}

/// Persist every mutable column of a resolution
pub async fn update(pool: &SqlitePool, resolution: &Resolution) -> Result<()> {
    let applied_at = resolution.applied_at.as_ref().map(to_db);
    let reviewed_at = resolution.reviewed_at.as_ref().map(to_db);
    let review_action = resolution.review_action.map(|a| a.as_str());
    let now = to_db(&chrono::Utc::now());
    let max_wait = max_lock_wait_ms(pool).await;

    retry_on_lock("update_resolution", max_wait, || async {
        sqlx::query(
            r#"
            UPDATE duration_resolutions SET
                status = ?, consensus_count = ?, total_sources_queried = ?,
                successful_queries = ?, resolved_duration = ?, auto_applied = ?,
                applied_at = ?, manually_reviewed = ?, reviewed_at = ?,
                reviewed_by = ?, review_notes = ?, review_action = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(resolution.status.as_str())
        .bind(resolution.consensus_count)
        .bind(resolution.total_sources_queried)
        .bind(resolution.successful_queries)
        .bind(resolution.resolved_duration)
        .bind(resolution.auto_applied as i64)
        .bind(&applied_at)
        .bind(resolution.manually_reviewed as i64)
        .bind(&reviewed_at)
        .bind(&resolution.reviewed_by)
        .bind(&resolution.review_notes)
        .bind(review_action)
        .bind(&now)
        .bind(resolution.id)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Remove a resolution and its source answers
pub async fn delete(pool: &SqlitePool, resolution_id: i64) -> Result<()> {
    let max_wait = max_lock_wait_ms(pool).await;

    retry_on_lock("delete_resolution", max_wait, || async {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM duration_sources WHERE resolution_id = ?")
            .bind(resolution_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM duration_resolutions WHERE id = ?")
            .bind(resolution_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    })
    .await
}

/// Record one source answer (or failure) against a resolution
pub async fn record_source(
    pool: &SqlitePool,
    resolution_id: i64,
    track_id: i64,
    source: &NewSourceResult,
) -> Result<SourceResult> {
    let now = chrono::Utc::now();
    let created_at = to_db(&now);
    let max_wait = max_lock_wait_ms(pool).await;

    let id = retry_on_lock("record_source", max_wait, || async {
        let result = sqlx::query(
            r#"
            INSERT INTO duration_sources (
                resolution_id, track_id, source_name, duration, confidence, match_score,
                external_id, external_url, query_ms, error_message, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(resolution_id)
        .bind(track_id)
        .bind(&source.source_name)
        .bind(source.duration)
        .bind(source.confidence)
        .bind(source.match_score)
        .bind(&source.external_id)
        .bind(&source.external_url)
        .bind(source.query_ms)
        .bind(&source.error_message)
        .bind(&created_at)
        .execute(pool)
        .await?;
        Ok(result.last_insert_rowid())
    })
    .await?;

    Ok(SourceResult {
        id,
        resolution_id,
        track_id,
        source_name: source.source_name.clone(),
        duration: source.duration,
        confidence: source.confidence,
        match_score: source.match_score,
        external_id: source.external_id.clone(),
        external_url: source.external_url.clone(),
        query_ms: source.query_ms,
        error_message: source.error_message.clone(),
        created_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;
    use crate::db::tracks::insert_track;

    #[tokio::test]
    async fn test_create_record_update_and_reload() {
        let pool = memory_pool().await;
        let track = insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();

        let mut resolution = create(&pool, track, Some(0)).await.unwrap();
        assert_eq!(resolution.status, ResolutionStatus::InProgress);

        record_source(
            &pool,
            resolution.id,
            track,
            &NewSourceResult {
                source_name: "musicbrainz".into(),
                duration: 200,
                confidence: 0.9,
                match_score: 0.95,
                external_id: Some("mbid".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        record_source(
            &pool,
            resolution.id,
            track,
            &NewSourceResult {
                source_name: "lastfm".into(),
                error_message: Some("timeout".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        resolution.status = ResolutionStatus::NeedsReview;
        resolution.resolved_duration = Some(200);
        resolution.review_action = Some(ReviewAction::Manual);
        update(&pool, &resolution).await.unwrap();

        let loaded = get_for_track(&pool, track).await.unwrap().unwrap();
        assert_eq!(loaded.status, ResolutionStatus::NeedsReview);
        assert_eq!(loaded.resolved_duration, Some(200));
        assert_eq!(loaded.review_action, Some(ReviewAction::Manual));
        assert_eq!(loaded.sources.len(), 2);
        assert!(loaded.sources[1].is_error());

        let pending = list_by_status(&pool, ResolutionStatus::NeedsReview).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_sources() {
        let pool = memory_pool().await;
        let track = insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();
        let resolution = create(&pool, track, None).await.unwrap();
        record_source(&pool, resolution.id, track, &NewSourceResult::default()).await.unwrap();

        delete(&pool, resolution.id).await.unwrap();
        assert!(get_for_track(&pool, track).await.unwrap().is_none());
        assert!(list_sources(&pool, resolution.id).await.unwrap().is_empty());

        // Unique per track: a new one can be created after deletion
        create(&pool, track, None).await.unwrap();
    }
}
