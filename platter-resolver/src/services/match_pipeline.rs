//! Per-track video matching
//!
//! Web search is tried first. When nothing it finds is acceptable and the
//! authenticated API fallback is enabled, API results are merged in. The
//! best candidate decides the outcome:
//!
//! - auto match: stored as `matched`, no candidates kept
//! - acceptable: stored as `needs_review` with up to five ranked candidates
//! - otherwise: stored as `unavailable` with method `none`

use async_trait::async_trait;
use chrono::Utc;
use platter_common::events::{CatalogEvent, EventBus};
use platter_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::matcher::Matcher;
use crate::db::matches::{self, NewCandidate};
use crate::db::tracks;
use crate::models::{MatchMethod, MatchStatus, ScoreBreakdown, StoredCandidate, Track, VideoInfo, VideoMatch};
use crate::sources::web_search::{extract_video_id, is_valid_video_id};
use crate::sources::SourceError;

/// Candidates kept for review, best first
pub const MAX_REVIEW_CANDIDATES: usize = 5;

/// A search backend that returns candidate videos for a track
#[async_trait]
pub trait VideoCandidateSource: Send + Sync {
    /// Method recorded on matches found through this source
    fn method(&self) -> MatchMethod;

    fn is_available(&self) -> bool;

    async fn search_videos(&self, title: &str, artist: &str) -> std::result::Result<Vec<VideoInfo>, SourceError>;
}

/// Looks up metadata for a single video id
#[async_trait]
pub trait VideoMetadataFetcher: Send + Sync {
    /// `Ok(None)` when the video does not exist
    async fn fetch_video(&self, video_id: &str) -> std::result::Result<Option<VideoInfo>, SourceError>;
}

/// Scored candidate before persistence
#[derive(Debug, Clone)]
struct ScoredVideo {
    video: VideoInfo,
    scores: ScoreBreakdown,
    method: MatchMethod,
}

/// Totals for a playlist run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistMatchSummary {
    pub total: usize,
    pub matched: usize,
    pub needs_review: usize,
    pub unavailable: usize,
    pub errors: usize,
    pub cancelled: bool,
}

/// Keep the highest score per video id, best first
fn merge_ranked(candidates: Vec<ScoredVideo>) -> Vec<ScoredVideo> {
    let mut by_id: HashMap<String, ScoredVideo> = HashMap::new();
    for candidate in candidates {
        match by_id.get(&candidate.video.video_id) {
            Some(existing) if existing.scores.composite >= candidate.scores.composite => {}
            _ => {
                by_id.insert(candidate.video.video_id.clone(), candidate);
            }
        }
    }

    let mut ranked: Vec<ScoredVideo> = by_id.into_values().collect();
    ranked.sort_by(|a, b| {
        b.scores
            .composite
            .total_cmp(&a.scores.composite)
            .then_with(|| a.video.video_id.cmp(&b.video.video_id))
    });
    ranked
}

/// Matching service shared by the bulk worker and interactive requests
#[derive(Clone)]
pub struct MatchPipeline {
    pool: SqlitePool,
    matcher: Matcher,
    web_search: Arc<dyn VideoCandidateSource>,
    api: Option<Arc<dyn VideoCandidateSource>>,
    metadata: Arc<dyn VideoMetadataFetcher>,
    api_fallback_enabled: bool,
    event_bus: EventBus,
}

impl MatchPipeline {
    pub fn new(
        pool: SqlitePool,
        matcher: Matcher,
        web_search: Arc<dyn VideoCandidateSource>,
        api: Option<Arc<dyn VideoCandidateSource>>,
        metadata: Arc<dyn VideoMetadataFetcher>,
        api_fallback_enabled: bool,
        event_bus: EventBus,
    ) -> Self {
        Self {
            pool,
            matcher,
            web_search,
            api,
            metadata,
            api_fallback_enabled,
            event_bus,
        }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Find and store the best video for a track
    ///
    /// Without `force`, a matched or reviewed track is returned unchanged.
    pub async fn match_track(&self, track_id: i64, force: bool) -> Result<VideoMatch> {
        let track = tracks::require_track(&self.pool, track_id).await?;

        if force {
            matches::delete_match(&self.pool, track_id).await?;
            matches::delete_candidates(&self.pool, track_id).await?;
        } else if let Some(existing) = matches::get_match(&self.pool, track_id).await? {
            if existing.status.is_final() {
                tracing::debug!(track_id, status = %existing.status, "Track already matched");
                return Ok(existing);
            }
        }

        let ranked = self.gather(&track).await?;
        let result = self.store_outcome(track_id, ranked).await?;

        tracing::info!(
            track_id,
            status = %result.status,
            video_id = ?result.video_id(),
            score = result.scores.composite,
            method = result.method.as_str(),
            "Track matching finished"
        );
        self.emit_matched(&result);
        Ok(result)
    }

    async fn search_with(
        &self,
        source: &dyn VideoCandidateSource,
        track: &Track,
    ) -> std::result::Result<Vec<ScoredVideo>, SourceError> {
        let videos = source.search_videos(&track.title, &track.artist).await?;
        let method = source.method();
        Ok(videos
            .into_iter()
            .map(|video| ScoredVideo {
                scores: self.matcher.score_video(track, &video),
                video,
                method,
            })
            .collect())
    }

    /// Candidates from web search, plus the API when web search found nothing acceptable
    async fn gather(&self, track: &Track) -> Result<Vec<ScoredVideo>> {
        let mut candidates = Vec::new();
        let mut attempted = 0;
        let mut failures: Vec<SourceError> = Vec::new();

        if self.web_search.is_available() {
            attempted += 1;
            match self.search_with(self.web_search.as_ref(), track).await {
                Ok(found) => candidates.extend(found),
                Err(e) => {
                    tracing::warn!(track_id = track.id, error = %e, "Web search failed");
                    failures.push(e);
                }
            }
        }

        let acceptable = candidates.iter().any(|c| self.matcher.is_acceptable_match(&c.scores));
        if !acceptable && self.api_fallback_enabled {
            if let Some(api) = self.api.as_ref().filter(|a| a.is_available()) {
                attempted += 1;
                tracing::debug!(track_id = track.id, "No acceptable web result, trying video API");
                match self.search_with(api.as_ref(), track).await {
                    Ok(found) => candidates.extend(found),
                    Err(e) => {
                        tracing::warn!(track_id = track.id, error = %e, "Video API search failed");
                        failures.push(e);
                    }
                }
            }
        }

        // Every search failed: report instead of recording a false "unavailable"
        if attempted > 0 && failures.len() == attempted {
            if let Some(e) = failures.pop() {
                return Err(e.into());
            }
        }

        Ok(merge_ranked(candidates))
    }

    async fn store_outcome(&self, track_id: i64, ranked: Vec<ScoredVideo>) -> Result<VideoMatch> {
        let now = Utc::now();

        let Some(best) = ranked.first().filter(|b| self.matcher.is_acceptable_match(&b.scores)) else {
            let unavailable = VideoMatch::unavailable(track_id, MatchMethod::None);
            matches::save_match(&self.pool, &unavailable).await?;
            matches::delete_candidates(&self.pool, track_id).await?;
            return Ok(unavailable);
        };

        let auto = self.matcher.is_auto_match(&best.scores);
        let result = VideoMatch {
            track_id,
            video: Some(best.video.clone()),
            scores: best.scores,
            method: best.method,
            status: if auto { MatchStatus::Matched } else { MatchStatus::NeedsReview },
            needs_review: !auto,
            matched_at: Some(now),
            reviewed_at: None,
        };
        matches::save_match(&self.pool, &result).await?;

        if auto {
            matches::delete_candidates(&self.pool, track_id).await?;
        } else {
            let candidates: Vec<NewCandidate> = ranked
                .into_iter()
                .take(MAX_REVIEW_CANDIDATES)
                .map(|c| NewCandidate {
                    video: c.video,
                    scores: c.scores,
                    source: c.method,
                })
                .collect();
            matches::replace_candidates(&self.pool, track_id, &candidates).await?;
        }

        Ok(result)
    }

    /// Promote a stored review candidate to the track's match
    pub async fn select_candidate(&self, track_id: i64, candidate_id: i64) -> Result<VideoMatch> {
        let candidate = matches::get_candidate(&self.pool, candidate_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("candidate {}", candidate_id)))?;
        if candidate.track_id != track_id {
            return Err(Error::InvalidInput(format!(
                "candidate {} belongs to track {}, not {}",
                candidate_id, candidate.track_id, track_id
            )));
        }

        let now = Utc::now();
        let result = VideoMatch {
            track_id,
            video: Some(candidate.video),
            scores: candidate.scores,
            method: candidate.source,
            status: MatchStatus::Reviewed,
            needs_review: false,
            matched_at: Some(now),
            reviewed_at: Some(now),
        };
        self.store_reviewed(result).await
    }

    /// Match a track to a video given as a URL or bare 11-character id
    pub async fn set_manual_match(&self, track_id: i64, reference: &str) -> Result<VideoMatch> {
        let track = tracks::require_track(&self.pool, track_id).await?;

        let reference = reference.trim();
        let video_id = if is_valid_video_id(reference) {
            reference.to_string()
        } else {
            extract_video_id(reference)
                .ok_or_else(|| Error::InvalidInput(format!("not a video URL or id: {}", reference)))?
        };

        let video = self
            .metadata
            .fetch_video(&video_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("video {}", video_id)))?;

        let now = Utc::now();
        let result = VideoMatch {
            track_id,
            scores: self.matcher.score_video(&track, &video),
            video: Some(video),
            method: MatchMethod::Manual,
            status: MatchStatus::Reviewed,
            needs_review: false,
            matched_at: Some(now),
            reviewed_at: Some(now),
        };
        self.store_reviewed(result).await
    }

    /// Record that no video exists for a track
    pub async fn mark_unavailable(&self, track_id: i64) -> Result<VideoMatch> {
        tracks::require_track(&self.pool, track_id).await?;

        let mut result = VideoMatch::unavailable(track_id, MatchMethod::Manual);
        result.reviewed_at = Some(Utc::now());
        self.store_reviewed(result).await
    }

    async fn store_reviewed(&self, result: VideoMatch) -> Result<VideoMatch> {
        matches::save_match(&self.pool, &result).await?;
        matches::delete_candidates(&self.pool, result.track_id).await?;

        tracing::info!(
            track_id = result.track_id,
            status = %result.status,
            video_id = ?result.video_id(),
            "Match set by review"
        );
        self.emit_matched(&result);
        Ok(result)
    }

    pub async fn get_match(&self, track_id: i64) -> Result<Option<VideoMatch>> {
        matches::get_match(&self.pool, track_id).await
    }

    pub async fn get_candidates(&self, track_id: i64) -> Result<Vec<StoredCandidate>> {
        matches::list_candidates(&self.pool, track_id).await
    }

    /// Match every track of a playlist in order
    ///
    /// Stops between tracks once `cancel` fires; per-track errors are counted.
    pub async fn match_playlist(&self, playlist_id: i64, cancel: &CancellationToken) -> Result<PlaylistMatchSummary> {
        let track_ids = tracks::playlist_track_ids(&self.pool, playlist_id).await?;
        let mut summary = PlaylistMatchSummary {
            total: track_ids.len(),
            ..Default::default()
        };

        for track_id in track_ids {
            if cancel.is_cancelled() {
                tracing::info!(playlist_id, "Playlist matching cancelled");
                summary.cancelled = true;
                break;
            }

            match self.match_track(track_id, false).await {
                Ok(result) => match result.status {
                    MatchStatus::Matched | MatchStatus::Reviewed => summary.matched += 1,
                    MatchStatus::NeedsReview => summary.needs_review += 1,
                    MatchStatus::Unavailable | MatchStatus::Pending => summary.unavailable += 1,
                },
                Err(e) => {
                    tracing::warn!(playlist_id, track_id, error = %e, "Playlist track matching failed");
                    summary.errors += 1;
                }
            }
        }

        tracing::info!(
            playlist_id,
            total = summary.total,
            matched = summary.matched,
            needs_review = summary.needs_review,
            unavailable = summary.unavailable,
            errors = summary.errors,
            "Playlist matching finished"
        );
        Ok(summary)
    }

    fn emit_matched(&self, result: &VideoMatch) {
        self.event_bus.emit_lossy(CatalogEvent::TrackMatched {
            track_id: result.track_id,
            status: result.status.as_str().to_string(),
            video_id: result.video_id().map(str::to_string),
            match_score: result.scores.composite,
            timestamp: Utc::now(),
        });
    }
}
