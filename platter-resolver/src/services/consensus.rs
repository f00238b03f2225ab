//! Duration consensus across independent lookup sources
//!
//! Each configured source is queried in registry order and its answer is
//! recorded. Usable answers (duration > 0, match score above the floor) are
//! grouped within a tolerance window; the largest group decides.

use chrono::Utc;
use platter_common::events::{CatalogEvent, EventBus};
use platter_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::time::Instant;

use crate::db::{resolutions, tracks};
use crate::models::{NewSourceResult, Resolution, ResolutionStatus, ReviewAction, Track};
use crate::sources::SourceRegistry;

/// Track `duration_source` values written by this module
pub const APPLIED_BY_CONSENSUS: &str = "consensus";
pub const APPLIED_BY_REVIEW: &str = "review";
pub const APPLIED_MANUALLY: &str = "manual";

/// `[consensus]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Two durations agree when they differ by at most this many seconds
    pub tolerance_secs: i64,
    pub min_agreeing_sources: usize,
    /// Answers whose title match is below this are ignored
    pub min_match_score: f64,
    pub auto_apply_on_consensus: bool,
    pub auto_apply_min_confidence: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            tolerance_secs: 3,
            min_agreeing_sources: 2,
            min_match_score: 0.6,
            auto_apply_on_consensus: true,
            auto_apply_min_confidence: 0.5,
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tolerance_secs < 0 {
            return Err(Error::Config("consensus tolerance_secs must not be negative".to_string()));
        }
        if self.min_agreeing_sources < 2 {
            return Err(Error::Config("consensus min_agreeing_sources must be at least 2".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_match_score)
            || !(0.0..=1.0).contains(&self.auto_apply_min_confidence)
        {
            return Err(Error::Config("consensus scores must be within 0.0-1.0".to_string()));
        }
        Ok(())
    }
}

/// Best agreeing group among the usable answers
#[derive(Debug, Clone, PartialEq)]
pub struct DurationGroup {
    /// Rounded mean of the group, seconds
    pub duration: i64,
    pub size: usize,
    pub mean_confidence: f64,
    pub sources: Vec<String>,
}

/// Outcome for one track
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: ResolutionStatus,
    pub resolved_duration: Option<i64>,
    pub consensus_count: i64,
    pub auto_apply: bool,
}

fn is_usable(result: &NewSourceResult, config: &ConsensusConfig) -> bool {
    result.error_message.is_none() && result.duration > 0 && result.match_score >= config.min_match_score
}

/// Largest group of usable answers within the tolerance window
///
/// Ties go to the higher mean confidence, then to the shorter duration.
pub fn find_consensus(results: &[NewSourceResult], config: &ConsensusConfig) -> Option<DurationGroup> {
    let mut usable: Vec<&NewSourceResult> = results.iter().filter(|r| is_usable(r, config)).collect();
    usable.sort_by_key(|r| r.duration);

    let mut best: Option<DurationGroup> = None;
    for (start, anchor) in usable.iter().enumerate() {
        let members: Vec<&NewSourceResult> = usable[start..]
            .iter()
            .take_while(|r| r.duration - anchor.duration <= config.tolerance_secs)
            .copied()
            .collect();

        let size = members.len();
        let mean_duration = members.iter().map(|r| r.duration as f64).sum::<f64>() / size as f64;
        let mean_confidence = members.iter().map(|r| r.confidence).sum::<f64>() / size as f64;
        let group = DurationGroup {
            duration: mean_duration.round() as i64,
            size,
            mean_confidence,
            sources: members.iter().map(|r| r.source_name.clone()).collect(),
        };

        let better = match &best {
            None => true,
            Some(current) => {
                group.size > current.size
                    || (group.size == current.size && group.mean_confidence > current.mean_confidence)
            }
        };
        if better {
            best = Some(group);
        }
    }

    best
}

/// Decide the resolution status from the collected answers
pub fn decide(results: &[NewSourceResult], config: &ConsensusConfig) -> Verdict {
    let Some(group) = find_consensus(results, config) else {
        return Verdict {
            status: ResolutionStatus::Failed,
            resolved_duration: None,
            consensus_count: 0,
            auto_apply: false,
        };
    };

    let agreed = group.size >= config.min_agreeing_sources;
    let auto_apply = agreed
        && config.auto_apply_on_consensus
        && group.mean_confidence >= config.auto_apply_min_confidence;

    Verdict {
        status: if auto_apply {
            ResolutionStatus::Resolved
        } else {
            ResolutionStatus::NeedsReview
        },
        resolved_duration: Some(group.duration),
        consensus_count: group.size as i64,
        auto_apply,
    }
}

/// Runs duration lookups for tracks and manages the review workflow
#[derive(Clone)]
pub struct ConsensusResolver {
    pool: SqlitePool,
    sources: SourceRegistry,
    config: ConsensusConfig,
    event_bus: EventBus,
}

impl ConsensusResolver {
    pub fn new(pool: SqlitePool, sources: SourceRegistry, config: ConsensusConfig, event_bus: EventBus) -> Self {
        Self {
            pool,
            sources,
            config,
            event_bus,
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Resolve one track's duration
    ///
    /// A resolved or approved resolution is returned unchanged; anything else
    /// is discarded with its source answers and queried again.
    pub async fn resolve_track(&self, track_id: i64) -> Result<Resolution> {
        self.resolve(track_id, None).await
    }

    /// Sources are queried with `artist` when given, else the track's own artist
    async fn resolve(&self, track_id: i64, artist: Option<&str>) -> Result<Resolution> {
        let track = tracks::require_track(&self.pool, track_id).await?;
        let artist = artist.unwrap_or(track.artist.as_str());

        if let Some(mut existing) = resolutions::get_for_track(&self.pool, track_id).await? {
            if existing.status.is_settled() {
                tracing::debug!(track_id, status = %existing.status, "Resolution already settled");
                existing.sources = resolutions::list_sources(&self.pool, existing.id).await?;
                return Ok(existing);
            }
            resolutions::delete(&self.pool, existing.id).await?;
        }

        let original = track.has_duration().then_some(track.duration);
        let mut resolution = resolutions::create(&self.pool, track_id, original).await?;

        let answers = self.query_sources(&track, artist, resolution.id).await?;
        let verdict = decide(&answers, &self.config);

        resolution.status = verdict.status;
        resolution.resolved_duration = verdict.resolved_duration;
        resolution.consensus_count = verdict.consensus_count;
        resolution.total_sources_queried = answers.len() as i64;
        resolution.successful_queries = answers
            .iter()
            .filter(|a| a.error_message.is_none() && a.duration > 0)
            .count() as i64;

        if let (true, Some(duration)) = (verdict.auto_apply, verdict.resolved_duration) {
            tracks::apply_duration(&self.pool, track_id, duration, APPLIED_BY_CONSENSUS).await?;
            resolution.auto_applied = true;
            resolution.applied_at = Some(Utc::now());
        }

        resolutions::update(&self.pool, &resolution).await?;

        tracing::info!(
            track_id,
            status = %resolution.status,
            resolved_duration = ?resolution.resolved_duration,
            consensus_count = resolution.consensus_count,
            queried = resolution.total_sources_queried,
            auto_applied = resolution.auto_applied,
            "Track duration resolution finished"
        );
        self.emit_resolved(&resolution);

        let mut stored = resolutions::require(&self.pool, resolution.id).await?;
        stored.sources = resolutions::list_sources(&self.pool, stored.id).await?;
        Ok(stored)
    }

    async fn query_sources(&self, track: &Track, artist: &str, resolution_id: i64) -> Result<Vec<NewSourceResult>> {
        let album = track.album_title.as_deref();
        let mut answers: Vec<NewSourceResult> = Vec::new();

        for source in &self.sources {
            if !source.is_configured() {
                tracing::debug!(track_id = track.id, source = source.name(), "Source not configured, skipping");
                continue;
            }

            if source.is_expensive() {
                let agreed = find_consensus(&answers, &self.config)
                    .is_some_and(|g| g.size >= self.config.min_agreeing_sources);
                if agreed {
                    tracing::debug!(track_id = track.id, source = source.name(), "Consensus reached, skipping expensive source");
                    continue;
                }
            }

            let started = Instant::now();
            let outcome = source.search_track(&track.title, artist, album).await;
            let query_ms = started.elapsed().as_millis() as i64;

            let answer = match outcome {
                Ok(Some(found)) => NewSourceResult {
                    source_name: source.name().to_string(),
                    duration: found.duration,
                    confidence: found.confidence,
                    match_score: found.match_score,
                    external_id: Some(found.external_id),
                    external_url: Some(found.external_url).filter(|u| !u.is_empty()),
                    query_ms,
                    error_message: None,
                },
                Ok(None) => NewSourceResult {
                    source_name: source.name().to_string(),
                    query_ms,
                    ..Default::default()
                },
                Err(e) => {
                    tracing::warn!(track_id = track.id, source = source.name(), error = %e, "Source lookup failed");
                    NewSourceResult {
                        source_name: source.name().to_string(),
                        query_ms,
                        error_message: Some(e.to_string()),
                        ..Default::default()
                    }
                }
            };

            resolutions::record_source(&self.pool, resolution_id, track.id, &answer).await?;
            answers.push(answer);
        }

        Ok(answers)
    }

    /// Resolve every track of an album that has no duration
    ///
    /// Sources are asked with the album artist when the album has one.
    /// Per-track failures are logged and do not stop the album.
    pub async fn resolve_album(&self, album_id: i64) -> Result<Vec<Resolution>> {
        let album = tracks::get_album(&self.pool, album_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("album {}", album_id)))?;
        let album_artist = Some(album.artist.trim()).filter(|a| !a.is_empty());

        let pending = tracks::album_tracks_missing_duration(&self.pool, album_id).await?;
        tracing::info!(album_id, tracks = pending.len(), "Resolving album durations");

        let mut results = Vec::with_capacity(pending.len());
        for track in pending {
            match self.resolve(track.id, album_artist).await {
                Ok(resolution) => results.push(resolution),
                Err(e) => tracing::warn!(album_id, track_id = track.id, error = %e, "Track resolution failed"),
            }
        }
        Ok(results)
    }

    /// Accept the suggested duration of a resolution and write it to the track
    pub async fn approve(&self, resolution_id: i64, reviewer: Option<&str>, notes: Option<&str>) -> Result<Resolution> {
        let mut resolution = resolutions::require(&self.pool, resolution_id).await?;
        let duration = match (resolution.status, resolution.resolved_duration) {
            (ResolutionStatus::Resolved | ResolutionStatus::NeedsReview, Some(d)) if d > 0 => d,
            (status, _) => {
                return Err(Error::InvalidInput(format!(
                    "resolution {} has no suggested duration to approve (status {})",
                    resolution_id, status
                )))
            }
        };

        tracks::apply_duration(&self.pool, resolution.track_id, duration, APPLIED_BY_REVIEW).await?;

        let now = Utc::now();
        resolution.status = ResolutionStatus::Approved;
        resolution.applied_at = Some(now);
        self.mark_reviewed(&mut resolution, ReviewAction::Apply, reviewer, notes);
        resolutions::update(&self.pool, &resolution).await?;

        tracing::info!(resolution_id, track_id = resolution.track_id, duration, "Resolution approved");
        self.emit_resolved(&resolution);
        self.reload(resolution_id).await
    }

    /// Decline a resolution; the track keeps its current duration
    pub async fn reject(&self, resolution_id: i64, reviewer: Option<&str>, notes: Option<&str>) -> Result<Resolution> {
        let mut resolution = resolutions::require(&self.pool, resolution_id).await?;
        if resolution.status == ResolutionStatus::Approved {
            return Err(Error::Conflict(format!("resolution {} is already approved", resolution_id)));
        }

        resolution.status = ResolutionStatus::Rejected;
        self.mark_reviewed(&mut resolution, ReviewAction::Reject, reviewer, notes);
        resolutions::update(&self.pool, &resolution).await?;

        tracing::info!(resolution_id, track_id = resolution.track_id, "Resolution rejected");
        self.emit_resolved(&resolution);
        self.reload(resolution_id).await
    }

    /// Write a resolved (consensus) duration that was not auto-applied
    pub async fn apply(&self, resolution_id: i64) -> Result<Resolution> {
        let mut resolution = resolutions::require(&self.pool, resolution_id).await?;
        let duration = match (resolution.status, resolution.resolved_duration) {
            (ResolutionStatus::Resolved | ResolutionStatus::Approved, Some(d)) if d > 0 => d,
            (ResolutionStatus::NeedsReview, _) => {
                return Err(Error::InvalidInput(format!(
                    "resolution {} needs review; approve it instead",
                    resolution_id
                )))
            }
            (status, _) => {
                return Err(Error::InvalidInput(format!(
                    "resolution {} cannot be applied (status {})",
                    resolution_id, status
                )))
            }
        };

        tracks::apply_duration(&self.pool, resolution.track_id, duration, APPLIED_BY_CONSENSUS).await?;
        resolution.applied_at = Some(Utc::now());
        resolutions::update(&self.pool, &resolution).await?;

        tracing::info!(resolution_id, track_id = resolution.track_id, duration, "Resolution applied");
        self.reload(resolution_id).await
    }

    /// Record a duration entered by a person and write it to the track
    pub async fn set_manual_duration(
        &self,
        track_id: i64,
        duration: i64,
        reviewer: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Resolution> {
        if duration <= 0 {
            return Err(Error::InvalidInput(format!("duration must be positive (got {})", duration)));
        }

        let track = tracks::require_track(&self.pool, track_id).await?;
        let mut resolution = match resolutions::get_for_track(&self.pool, track_id).await? {
            Some(existing) => existing,
            None => {
                let original = track.has_duration().then_some(track.duration);
                resolutions::create(&self.pool, track_id, original).await?
            }
        };

        tracks::apply_duration(&self.pool, track_id, duration, APPLIED_MANUALLY).await?;

        resolution.status = ResolutionStatus::Approved;
        resolution.resolved_duration = Some(duration);
        resolution.applied_at = Some(Utc::now());
        self.mark_reviewed(&mut resolution, ReviewAction::Manual, reviewer, notes);
        resolutions::update(&self.pool, &resolution).await?;

        tracing::info!(track_id, duration, "Manual duration set");
        self.emit_resolved(&resolution);
        self.reload(resolution.id).await
    }

    /// Resolutions waiting for a person, with their source answers
    pub async fn list_pending(&self) -> Result<Vec<Resolution>> {
        let mut pending = resolutions::list_by_status(&self.pool, ResolutionStatus::NeedsReview).await?;
        for resolution in &mut pending {
            resolution.sources = resolutions::list_sources(&self.pool, resolution.id).await?;
        }
        Ok(pending)
    }

    pub async fn get_resolution(&self, track_id: i64) -> Result<Option<Resolution>> {
        let Some(mut resolution) = resolutions::get_for_track(&self.pool, track_id).await? else {
            return Ok(None);
        };
        resolution.sources = resolutions::list_sources(&self.pool, resolution.id).await?;
        Ok(Some(resolution))
    }

    fn mark_reviewed(
        &self,
        resolution: &mut Resolution,
        action: ReviewAction,
        reviewer: Option<&str>,
        notes: Option<&str>,
    ) {
        resolution.manually_reviewed = true;
        resolution.reviewed_at = Some(Utc::now());
        resolution.reviewed_by = reviewer.map(str::to_string);
        resolution.review_notes = notes.map(str::to_string);
        resolution.review_action = Some(action);
    }

    async fn reload(&self, resolution_id: i64) -> Result<Resolution> {
        let mut resolution = resolutions::require(&self.pool, resolution_id).await?;
        resolution.sources = resolutions::list_sources(&self.pool, resolution_id).await?;
        Ok(resolution)
    }

    fn emit_resolved(&self, resolution: &Resolution) {
        self.event_bus.emit_lossy(CatalogEvent::TrackResolved {
            track_id: resolution.track_id,
            status: resolution.status.as_str().to_string(),
            resolved_duration: resolution.resolved_duration,
            auto_applied: resolution.auto_applied,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;
    use crate::sources::{DurationSource, SourceError, TrackSearchResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn answer(source: &str, duration: i64, confidence: f64) -> NewSourceResult {
        NewSourceResult {
            source_name: source.to_string(),
            duration,
            confidence,
            match_score: 0.9,
            ..Default::default()
        }
    }

    /// Canned answer; `None` duration means not found, negative means error
    struct FixedSource {
        name: &'static str,
        duration: Option<i64>,
        expensive: bool,
        calls: AtomicUsize,
        artists: std::sync::Mutex<Vec<String>>,
    }

    impl FixedSource {
        fn new(name: &'static str, duration: Option<i64>) -> Arc<Self> {
            Arc::new(Self { name, duration, expensive: false, calls: AtomicUsize::new(0), artists: Default::default() })
        }

        fn expensive(name: &'static str, duration: Option<i64>) -> Arc<Self> {
            Arc::new(Self { name, duration, expensive: true, calls: AtomicUsize::new(0), artists: Default::default() })
        }
    }

    #[async_trait]
    impl DurationSource for FixedSource {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_configured(&self) -> bool {
            true
        }

        fn rate_limit_remaining(&self) -> u32 {
            100
        }

        fn is_expensive(&self) -> bool {
            self.expensive
        }

        async fn search_track(
            &self,
            title: &str,
            artist: &str,
            _album: Option<&str>,
        ) -> std::result::Result<Option<TrackSearchResult>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.artists.lock().unwrap().push(artist.to_string());
            match self.duration {
                Some(d) if d < 0 => Err(SourceError::Network("connection refused".to_string())),
                Some(d) => Ok(Some(TrackSearchResult {
                    external_id: format!("{}:1", self.name),
                    external_url: String::new(),
                    title: title.to_string(),
                    artist: artist.to_string(),
                    album: None,
                    duration: d,
                    match_score: 1.0,
                    confidence: 0.9,
                })),
                None => Ok(None),
            }
        }
    }

    async fn resolver_with(pool: &SqlitePool, sources: Vec<Arc<FixedSource>>) -> ConsensusResolver {
        let registry: SourceRegistry = sources.into_iter().map(|s| s as Arc<dyn DurationSource>).collect();
        ConsensusResolver::new(pool.clone(), registry, ConsensusConfig::default(), EventBus::new(16))
    }

    #[test]
    fn test_group_within_tolerance() {
        let config = ConsensusConfig::default();
        let results = vec![answer("a", 354, 0.9), answer("b", 356, 0.7), answer("c", 420, 0.9)];
        let group = find_consensus(&results, &config).unwrap();
        assert_eq!(group.size, 2);
        assert_eq!(group.duration, 355);
        assert_eq!(group.sources, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_low_match_score_and_errors_ignored() {
        let config = ConsensusConfig::default();
        let mut weak = answer("a", 200, 0.9);
        weak.match_score = 0.3;
        let mut failed = answer("b", 200, 0.9);
        failed.error_message = Some("timeout".to_string());
        assert!(find_consensus(&[weak, failed], &config).is_none());
    }

    #[test]
    fn test_tie_prefers_confidence_then_shorter() {
        let config = ConsensusConfig::default();
        let results = vec![answer("a", 100, 0.5), answer("b", 300, 0.9)];
        assert_eq!(find_consensus(&results, &config).unwrap().duration, 300);

        let results = vec![answer("a", 300, 0.8), answer("b", 100, 0.8)];
        assert_eq!(find_consensus(&results, &config).unwrap().duration, 100);
    }

    #[test]
    fn test_decide_statuses() {
        let config = ConsensusConfig::default();

        let agreed = decide(&[answer("a", 200, 0.8), answer("b", 201, 0.6)], &config);
        assert_eq!(agreed.status, ResolutionStatus::Resolved);
        assert!(agreed.auto_apply);
        assert_eq!(agreed.consensus_count, 2);

        let single = decide(&[answer("a", 200, 0.8)], &config);
        assert_eq!(single.status, ResolutionStatus::NeedsReview);
        assert_eq!(single.resolved_duration, Some(200));
        assert!(!single.auto_apply);

        let low_confidence = decide(&[answer("a", 200, 0.3), answer("b", 200, 0.3)], &config);
        assert_eq!(low_confidence.status, ResolutionStatus::NeedsReview);

        let none = decide(&[answer("a", 0, 0.8)], &config);
        assert_eq!(none.status, ResolutionStatus::Failed);
        assert_eq!(none.resolved_duration, None);
    }

    #[tokio::test]
    async fn test_resolve_track_auto_applies_consensus() {
        let pool = memory_pool().await;
        let track_id = tracks::insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();
        let resolver = resolver_with(
            &pool,
            vec![FixedSource::new("one", Some(240)), FixedSource::new("two", Some(242)), FixedSource::new("three", None)],
        )
        .await;

        let resolution = resolver.resolve_track(track_id).await.unwrap();
        assert_eq!(resolution.status, ResolutionStatus::Resolved);
        assert_eq!(resolution.resolved_duration, Some(241));
        assert_eq!(resolution.total_sources_queried, 3);
        assert_eq!(resolution.successful_queries, 2);
        assert!(resolution.auto_applied);
        assert_eq!(resolution.sources.len(), 3);

        let track = tracks::require_track(&pool, track_id).await.unwrap();
        assert_eq!(track.duration, 241);
        assert_eq!(track.duration_source.as_deref(), Some(APPLIED_BY_CONSENSUS));
    }

    #[tokio::test]
    async fn test_expensive_source_skipped_after_consensus() {
        let pool = memory_pool().await;
        let track_id = tracks::insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();
        let expensive = FixedSource::expensive("paid", Some(240));
        let resolver = resolver_with(
            &pool,
            vec![FixedSource::new("one", Some(240)), FixedSource::new("two", Some(240)), expensive.clone()],
        )
        .await;

        let resolution = resolver.resolve_track(track_id).await.unwrap();
        assert_eq!(expensive.calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolution.total_sources_queried, 2);
    }

    #[tokio::test]
    async fn test_source_errors_recorded_without_aborting() {
        let pool = memory_pool().await;
        let track_id = tracks::insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();
        let resolver =
            resolver_with(&pool, vec![FixedSource::new("down", Some(-1)), FixedSource::new("up", Some(200))]).await;

        let resolution = resolver.resolve_track(track_id).await.unwrap();
        assert_eq!(resolution.status, ResolutionStatus::NeedsReview);
        assert_eq!(resolution.resolved_duration, Some(200));
        assert!(resolution.sources.iter().any(|s| s.is_error()));

        let pending = resolver.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sources.len(), 2);
    }

    #[tokio::test]
    async fn test_settled_resolution_returned_unchanged() {
        let pool = memory_pool().await;
        let track_id = tracks::insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();
        let first = FixedSource::new("one", Some(180));
        let resolver = resolver_with(&pool, vec![first.clone(), FixedSource::new("two", Some(180))]).await;

        let initial = resolver.resolve_track(track_id).await.unwrap();
        let again = resolver.resolve_track(track_id).await.unwrap();
        assert_eq!(initial.id, again.id);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_resolution_is_retried() {
        let pool = memory_pool().await;
        let track_id = tracks::insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();
        let source = FixedSource::new("one", None);
        let resolver = resolver_with(&pool, vec![source.clone()]).await;

        let failed = resolver.resolve_track(track_id).await.unwrap();
        assert_eq!(failed.status, ResolutionStatus::Failed);
        let retried = resolver.resolve_track(track_id).await.unwrap();
        assert_ne!(failed.id, retried.id);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(retried.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_review_workflow() {
        let pool = memory_pool().await;
        let track_id = tracks::insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();
        let resolver = resolver_with(&pool, vec![FixedSource::new("one", Some(300))]).await;

        let pending = resolver.resolve_track(track_id).await.unwrap();
        assert!(resolver.apply(pending.id).await.is_err());

        let approved = resolver.approve(pending.id, Some("alex"), Some("checked")).await.unwrap();
        assert_eq!(approved.status, ResolutionStatus::Approved);
        assert_eq!(approved.review_action, Some(ReviewAction::Apply));
        assert_eq!(approved.reviewed_by.as_deref(), Some("alex"));
        assert!(resolver.reject(pending.id, None, None).await.is_err());

        let track = tracks::require_track(&pool, track_id).await.unwrap();
        assert_eq!(track.duration, 300);
        assert_eq!(track.duration_source.as_deref(), Some(APPLIED_BY_REVIEW));
    }

    #[tokio::test]
    async fn test_reject_leaves_track_untouched() {
        let pool = memory_pool().await;
        let track_id = tracks::insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();
        let resolver = resolver_with(&pool, vec![FixedSource::new("one", Some(300))]).await;

        let pending = resolver.resolve_track(track_id).await.unwrap();
        let rejected = resolver.reject(pending.id, None, Some("wrong edit")).await.unwrap();
        assert_eq!(rejected.status, ResolutionStatus::Rejected);
        assert_eq!(tracks::require_track(&pool, track_id).await.unwrap().duration, 0);
    }

    #[tokio::test]
    async fn test_manual_duration() {
        let pool = memory_pool().await;
        let track_id = tracks::insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();
        let resolver = resolver_with(&pool, vec![]).await;

        assert!(matches!(
            resolver.set_manual_duration(track_id, 0, None, None).await,
            Err(Error::InvalidInput(_))
        ));

        let manual = resolver.set_manual_duration(track_id, 212, Some("sam"), None).await.unwrap();
        assert_eq!(manual.status, ResolutionStatus::Approved);
        assert_eq!(manual.review_action, Some(ReviewAction::Manual));
        assert_eq!(manual.resolved_duration, Some(212));

        let track = tracks::require_track(&pool, track_id).await.unwrap();
        assert_eq!(track.duration, 212);
        assert_eq!(track.duration_source.as_deref(), Some(APPLIED_MANUALLY));
    }

    #[tokio::test]
    async fn test_resolve_album_only_missing_durations() {
        let pool = memory_pool().await;
        let album_id = tracks::insert_album(&pool, "Record", "Band").await.unwrap();
        tracks::insert_track(&pool, Some(album_id), Some(1), "Known", "Band", 100).await.unwrap();
        tracks::insert_track(&pool, Some(album_id), Some(2), "Unknown", "Band", 0).await.unwrap();
        let resolver =
            resolver_with(&pool, vec![FixedSource::new("one", Some(90)), FixedSource::new("two", Some(90))]).await;

        let results = resolver.resolve_album(album_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(resolver.resolve_album(999).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_resolve_album_queries_album_artist() {
        let pool = memory_pool().await;
        let album_id = tracks::insert_album(&pool, "Compilation", "Various Artists").await.unwrap();
        let track_id = tracks::insert_track(&pool, Some(album_id), Some(1), "Song", "Guest Band", 0).await.unwrap();
        let source = FixedSource::new("one", Some(90));
        let resolver = resolver_with(&pool, vec![source.clone()]).await;

        resolver.resolve_album(album_id).await.unwrap();
        assert_eq!(*source.artists.lock().unwrap(), vec!["Various Artists".to_string()]);

        // A single track lookup keeps the track's own artist
        resolver.resolve_track(track_id).await.unwrap();
        assert_eq!(source.artists.lock().unwrap().last().map(String::as_str), Some("Guest Band"));
    }

    #[tokio::test]
    async fn test_resolve_album_without_artist_uses_track_artist() {
        let pool = memory_pool().await;
        let album_id = tracks::insert_album(&pool, "Untitled", " ").await.unwrap();
        tracks::insert_track(&pool, Some(album_id), Some(1), "Song", "Band", 0).await.unwrap();
        let source = FixedSource::new("one", Some(90));
        let resolver = resolver_with(&pool, vec![source.clone()]).await;

        resolver.resolve_album(album_id).await.unwrap();
        assert_eq!(*source.artists.lock().unwrap(), vec!["Band".to_string()]);
    }

    #[tokio::test]
    async fn test_resolved_event_emitted() {
        let pool = memory_pool().await;
        let track_id = tracks::insert_track(&pool, None, None, "Song", "Band", 0).await.unwrap();
        let resolver = resolver_with(&pool, vec![FixedSource::new("one", None)]).await;
        let mut rx = resolver.event_bus.subscribe();

        resolver.resolve_track(track_id).await.unwrap();
        match rx.recv().await.unwrap() {
            CatalogEvent::TrackResolved { track_id: id, status, .. } => {
                assert_eq!(id, track_id);
                assert_eq!(status, "failed");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
