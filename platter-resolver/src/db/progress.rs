//! Bulk job checkpoints: one progress row per job kind plus the run's track list

use platter_common::time::{from_db, from_db_opt, to_db};
use platter_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{JobKind, ProgressCounters, ResolverProgress, WorkerStatus};
use crate::utils::{max_lock_wait_ms, retry_on_lock};

fn progress_from_row(row: &SqliteRow) -> Result<ResolverProgress> {
    let job: String = row.get("job");
    let run_id: String = row.get("run_id");
    let status: String = row.get("status");

    Ok(ResolverProgress {
        job: job.parse::<JobKind>().map_err(Error::Internal)?,
        run_id: Uuid::parse_str(&run_id).map_err(|e| Error::Internal(format!("run id: {}", e)))?,
        status: status.parse::<WorkerStatus>().map_err(Error::Internal)?,
        total: row.get("total"),
        counters: ProgressCounters {
            processed: row.get("processed"),
            resolved: row.get("resolved"),
            needs_review: row.get("needs_review"),
            failed: row.get("failed"),
            skipped: row.get("skipped"),
        },
        current_track_id: row.get("current_track_id"),
        current_track: row.get("current_track"),
        last_processed_id: row.get("last_processed_id"),
        started_at: from_db(&row.get::<String, _>("started_at"))?,
        paused_at: from_db_opt(row.get("paused_at"))?,
        resumed_at: from_db_opt(row.get("resumed_at"))?,
        completed_at: from_db_opt(row.get("completed_at"))?,
        last_activity_at: from_db(&row.get::<String, _>("last_activity_at"))?,
        last_error: row.get("last_error"),
        consecutive_errors: row.get("consecutive_errors"),
    })
}

pub async fn load(pool: &SqlitePool, job: JobKind) -> Result<Option<ResolverProgress>> {
    let row = sqlx::query("SELECT * FROM resolver_progress WHERE job = ?")
        .bind(job.as_str())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(progress_from_row).transpose()
}

/// Upsert the progress row for `progress.job`
pub async fn save(pool: &SqlitePool, progress: &ResolverProgress) -> Result<()> {
    let run_id = progress.run_id.to_string();
    let started_at = to_db(&progress.started_at);
    let paused_at = progress.paused_at.as_ref().map(to_db);
    let resumed_at = progress.resumed_at.as_ref().map(to_db);
    let completed_at = progress.completed_at.as_ref().map(to_db);
    let last_activity_at = to_db(&progress.last_activity_at);
    let c = progress.counters;
    let max_wait = max_lock_wait_ms(pool).await;

    retry_on_lock("save_progress", max_wait, || async {
        sqlx::query(
            r#"
            INSERT INTO resolver_progress (
                job, run_id, status, total, processed, resolved, needs_review, failed, skipped,
                current_track_id, current_track, last_processed_id, started_at, paused_at,
                resumed_at, completed_at, last_activity_at, last_error, consecutive_errors
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job) DO UPDATE SET
                run_id = excluded.run_id,
                status = excluded.status,
                total = excluded.total,
                processed = excluded.processed,
                resolved = excluded.resolved,
                needs_review = excluded.needs_review,
                failed = excluded.failed,
                skipped = excluded.skipped,
                current_track_id = excluded.current_track_id,
                current_track = excluded.current_track,
                last_processed_id = excluded.last_processed_id,
                started_at = excluded.started_at,
                paused_at = excluded.paused_at,
                resumed_at = excluded.resumed_at,
                completed_at = excluded.completed_at,
                last_activity_at = excluded.last_activity_at,
                last_error = excluded.last_error,
                consecutive_errors = excluded.consecutive_errors
            "#,
        )
        .bind(progress.job.as_str())
        .bind(&run_id)
        .bind(progress.status.as_str())
        .bind(progress.total)
        .bind(c.processed)
        .bind(c.resolved)
        .bind(c.needs_review)
        .bind(c.failed)
        .bind(c.skipped)
        .bind(progress.current_track_id)
        .bind(&progress.current_track)
        .bind(progress.last_processed_id)
        .bind(&started_at)
        .bind(&paused_at)
        .bind(&resumed_at)
        .bind(&completed_at)
        .bind(&last_activity_at)
        .bind(&progress.last_error)
        .bind(progress.consecutive_errors)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Mark a checkpoint failed without resuming it
pub async fn mark_failed(pool: &SqlitePool, job: JobKind, message: &str) -> Result<()> {
    let now = to_db(&chrono::Utc::now());
    sqlx::query(
        "UPDATE resolver_progress SET status = ?, last_error = ?, completed_at = ?, last_activity_at = ? WHERE job = ?",
    )
    .bind(WorkerStatus::Failed.as_str())
    .bind(message)
    .bind(&now)
    .bind(&now)
    .bind(job.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// Store the ordered track list of a run, replacing any previous one
pub async fn save_track_list(pool: &SqlitePool, job: JobKind, track_ids: &[i64]) -> Result<()> {
    let max_wait = max_lock_wait_ms(pool).await;

    retry_on_lock("save_track_list", max_wait, || async {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM resolver_checkpoint_tracks WHERE job = ?")
            .bind(job.as_str())
            .execute(&mut *tx)
            .await?;
        for (position, track_id) in track_ids.iter().enumerate() {
            sqlx::query("INSERT INTO resolver_checkpoint_tracks (job, position, track_id) VALUES (?, ?, ?)")
                .bind(job.as_str())
                .bind(position as i64)
                .bind(*track_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    })
    .await
}

/// Track list saved by the last run of `job`
pub async fn load_track_list(pool: &SqlitePool, job: JobKind) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar(
        "SELECT track_id FROM resolver_checkpoint_tracks WHERE job = ? ORDER BY position",
    )
    .bind(job.as_str())
    .fetch_all(pool)
    .await?)
}
