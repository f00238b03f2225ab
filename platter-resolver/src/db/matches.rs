//! Video matches (one per track) and review candidates

use platter_common::time::{from_db_opt, to_db};
use platter_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{MatchMethod, MatchStatus, ScoreBreakdown, StoredCandidate, VideoInfo, VideoMatch};
use crate::utils::{max_lock_wait_ms, retry_on_lock};

/// Candidate ready to be stored, in rank order
#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub video: VideoInfo,
    pub scores: ScoreBreakdown,
    pub source: MatchMethod,
}

fn scores_from_row(row: &SqliteRow) -> ScoreBreakdown {
    ScoreBreakdown {
        composite: row.get("score_composite"),
        title: row.get("score_title"),
        artist: row.get("score_artist"),
        duration: row.get("score_duration"),
        channel: row.get("score_channel"),
    }
}

fn match_from_row(row: &SqliteRow) -> Result<VideoMatch> {
    let method: String = row.get("method");
    let status: String = row.get("status");
    let video_id: Option<String> = row.get("video_id");

    let video = video_id.map(|video_id| VideoInfo {
        video_id,
        title: row.get::<Option<String>, _>("video_title").unwrap_or_default(),
        channel: row.get::<Option<String>, _>("channel").unwrap_or_default(),
        duration: row.get("video_duration"),
        thumbnail_url: row.get("thumbnail_url"),
        view_count: row.get("view_count"),
    });

    Ok(VideoMatch {
        track_id: row.get("track_id"),
        video,
        scores: scores_from_row(row),
        method: method.parse::<MatchMethod>().map_err(Error::Internal)?,
        status: status.parse::<MatchStatus>().map_err(Error::Internal)?,
        needs_review: row.get::<i64, _>("needs_review") != 0,
        matched_at: from_db_opt(row.get("matched_at"))?,
        reviewed_at: from_db_opt(row.get("reviewed_at"))?,
    })
}

fn candidate_from_row(row: &SqliteRow) -> Result<StoredCandidate> {
    let source: String = row.get("source");
    Ok(StoredCandidate {
        id: row.get("id"),
        track_id: row.get("track_id"),
        rank: row.get("rank"),
        video: VideoInfo {
            video_id: row.get("video_id"),
            title: row.get("video_title"),
            channel: row.get("channel"),
            duration: row.get("video_duration"),
            thumbnail_url: row.get("thumbnail_url"),
            view_count: row.get("view_count"),
        },
        scores: scores_from_row(row),
        source: source.parse::<MatchMethod>().map_err(Error::Internal)?,
    })
}

pub async fn get_match(pool: &SqlitePool, track_id: i64) -> Result<Option<VideoMatch>> {
    let row = sqlx::query("SELECT * FROM track_video_matches WHERE track_id = ?")
        .bind(track_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(match_from_row).transpose()
}

/// Insert or replace the match for a track
pub async fn save_match(pool: &SqlitePool, m: &VideoMatch) -> Result<()> {
    let matched_at = m.matched_at.as_ref().map(to_db);
    let reviewed_at = m.reviewed_at.as_ref().map(to_db);
    let now = to_db(&chrono::Utc::now());
    let video = m.video.as_ref();
    let max_wait = max_lock_wait_ms(pool).await;

    retry_on_lock("save_match", max_wait, || async {
        sqlx::query(
            r#"
            INSERT INTO track_video_matches (
                track_id, video_id, video_title, channel, video_duration, thumbnail_url, view_count,
                score_composite, score_title, score_artist, score_duration, score_channel,
                method, status, needs_review, matched_at, reviewed_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(track_id) DO UPDATE SET
                video_id = excluded.video_id,
                video_title = excluded.video_title,
                channel = excluded.channel,
                video_duration = excluded.video_duration,
                thumbnail_url = excluded.thumbnail_url,
                view_count = excluded.view_count,
                score_composite = excluded.score_composite,
                score_title = excluded.score_title,
                score_artist = excluded.score_artist,
                score_duration = excluded.score_duration,
                score_channel = excluded.score_channel,
                method = excluded.method,
                status = excluded.status,
                needs_review = excluded.needs_review,
                matched_at = excluded.matched_at,
                reviewed_at = excluded.reviewed_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(m.track_id)
        .bind(video.map(|v| v.video_id.as_str()))
        .bind(video.map(|v| v.title.as_str()))
        .bind(video.map(|v| v.channel.as_str()))
        .bind(video.map(|v| v.duration).unwrap_or(0))
        .bind(video.and_then(|v| v.thumbnail_url.as_deref()))
        .bind(video.and_then(|v| v.view_count))
        .bind(m.scores.composite)
        .bind(m.scores.title)
        .bind(m.scores.artist)
        .bind(m.scores.duration)
        .bind(m.scores.channel)
        .bind(m.method.as_str())
        .bind(m.status.as_str())
        .bind(m.needs_review as i64)
        .bind(&matched_at)
        .bind(&reviewed_at)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

pub async fn delete_match(pool: &SqlitePool, track_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM track_video_matches WHERE track_id = ?")
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Candidates for a track, best first
pub async fn list_candidates(pool: &SqlitePool, track_id: i64) -> Result<Vec<StoredCandidate>> {
    let rows = sqlx::query("SELECT * FROM track_video_candidates WHERE track_id = ? ORDER BY rank")
        .bind(track_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(candidate_from_row).collect()
}

pub async fn get_candidate(pool: &SqlitePool, candidate_id: i64) -> Result<Option<StoredCandidate>> {
    let row = sqlx::query("SELECT * FROM track_video_candidates WHERE id = ?")
        .bind(candidate_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(candidate_from_row).transpose()
}

pub async fn delete_candidates(pool: &SqlitePool, track_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM track_video_candidates WHERE track_id = ?")
        .bind(track_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Replace a track's candidate list; ranks follow slice order starting at 1
pub async fn replace_candidates(pool: &SqlitePool, track_id: i64, candidates: &[NewCandidate]) -> Result<()> {
    let now = to_db(&chrono::Utc::now());
    let max_wait = max_lock_wait_ms(pool).await;

    retry_on_lock("replace_candidates", max_wait, || async {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM track_video_candidates WHERE track_id = ?")
            .bind(track_id)
            .execute(&mut *tx)
            .await?;

        for (i, c) in candidates.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO track_video_candidates (
                    track_id, rank, video_id, video_title, channel, video_duration,
                    thumbnail_url, view_count, score_composite, score_title, score_artist,
                    score_duration, score_channel, source, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(track_id)
            .bind(i as i64 + 1)
            .bind(&c.video.video_id)
            .bind(&c.video.title)
            .bind(&c.video.channel)
            .bind(c.video.duration)
            .bind(&c.video.thumbnail_url)
            .bind(c.video.view_count)
            .bind(c.scores.composite)
            .bind(c.scores.title)
            .bind(c.scores.artist)
            .bind(c.scores.duration)
            .bind(c.scores.channel)
            .bind(c.source.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;
    use crate::db::tracks::insert_track;

    fn video(id: &str) -> VideoInfo {
        VideoInfo {
            video_id: id.to_string(),
            title: format!("Video {}", id),
            channel: "Channel".to_string(),
            duration: 200,
            thumbnail_url: None,
            view_count: Some(10),
        }
    }

    #[tokio::test]
    async fn test_save_and_replace_match() {
        let pool = memory_pool().await;
        let track = insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();

        save_match(&pool, &VideoMatch::unavailable(track, MatchMethod::None)).await.unwrap();
        let loaded = get_match(&pool, track).await.unwrap().unwrap();
        assert_eq!(loaded.status, MatchStatus::Unavailable);
        assert!(loaded.video.is_none());

        let matched = VideoMatch {
            track_id: track,
            video: Some(video("aaaaaaaaaaa")),
            scores: ScoreBreakdown { composite: 0.9, ..Default::default() },
            method: MatchMethod::WebSearch,
            status: MatchStatus::Matched,
            needs_review: false,
            matched_at: Some(chrono::Utc::now()),
            reviewed_at: None,
        };
        save_match(&pool, &matched).await.unwrap();

        let loaded = get_match(&pool, track).await.unwrap().unwrap();
        assert_eq!(loaded.status, MatchStatus::Matched);
        assert_eq!(loaded.video_id(), Some("aaaaaaaaaaa"));
        assert_eq!(loaded.video.unwrap().view_count, Some(10));

        delete_match(&pool, track).await.unwrap();
        assert!(get_match(&pool, track).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_candidates_ranked_and_replaced() {
        let pool = memory_pool().await;
        let track = insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();

        let new = |id: &str, score: f64| NewCandidate {
            video: video(id),
            scores: ScoreBreakdown { composite: score, ..Default::default() },
            source: MatchMethod::WebSearch,
        };

        replace_candidates(&pool, track, &[new("aaaaaaaaaaa", 0.8), new("bbbbbbbbbbb", 0.7)]).await.unwrap();
        let stored = list_candidates(&pool, track).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].rank, 1);
        assert_eq!(stored[0].video.video_id, "aaaaaaaaaaa");

        let fetched = get_candidate(&pool, stored[1].id).await.unwrap().unwrap();
        assert_eq!(fetched.video.video_id, "bbbbbbbbbbb");

        replace_candidates(&pool, track, &[new("ccccccccccc", 0.65)]).await.unwrap();
        assert_eq!(list_candidates(&pool, track).await.unwrap().len(), 1);

        assert_eq!(delete_candidates(&pool, track).await.unwrap(), 1);
        assert!(list_candidates(&pool, track).await.unwrap().is_empty());
    }
}
