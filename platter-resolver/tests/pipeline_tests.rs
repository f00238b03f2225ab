//! Video matching pipeline against scripted search sources

mod helpers;

use helpers::{create_test_db, seed_track, video, FakeMetadata, FakeVideoSource};
use platter_common::events::EventBus;
use platter_common::Error;
use platter_resolver::db;
use platter_resolver::models::{MatchMethod, MatchStatus};
use platter_resolver::services::{MatchPipeline, Matcher};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const QUEEN_VIDEO: &str = "fJ9rUzIMcZQ";

fn queen_official() -> platter_resolver::models::VideoInfo {
    video(QUEEN_VIDEO, "Queen - Bohemian Rhapsody (Official Video)", "Queen Official", 355)
}

/// Same title on an unrelated channel at increasingly wrong lengths
fn reuploads() -> Vec<platter_resolver::models::VideoInfo> {
    [354, 362, 380, 400, 450, 600]
        .iter()
        .enumerate()
        .map(|(i, secs)| video(&format!("reupload000{}", i), "Bohemian Rhapsody", "Random Uploads", *secs))
        .collect()
}

fn off_target() -> Vec<platter_resolver::models::VideoInfo> {
    vec![video("unrelated01", "Some Other Track", "Nobody", 500)]
}

fn pipeline(
    pool: &SqlitePool,
    web: Arc<FakeVideoSource>,
    api: Option<Arc<FakeVideoSource>>,
    fallback: bool,
) -> MatchPipeline {
    pipeline_with_metadata(pool, web, api, fallback, FakeMetadata::default())
}

fn pipeline_with_metadata(
    pool: &SqlitePool,
    web: Arc<FakeVideoSource>,
    api: Option<Arc<FakeVideoSource>>,
    fallback: bool,
    metadata: FakeMetadata,
) -> MatchPipeline {
    MatchPipeline::new(
        pool.clone(),
        Matcher::default(),
        web,
        api.map(|a| a as Arc<dyn platter_resolver::services::VideoCandidateSource>),
        Arc::new(metadata),
        fallback,
        EventBus::new(16),
    )
}

#[tokio::test]
async fn test_official_video_is_matched_without_candidates() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let track = seed_track(&pool, None, "Bohemian Rhapsody", "Queen", 354).await.unwrap();

    let web = Arc::new(
        FakeVideoSource::new(MatchMethod::WebSearch).with_results("Bohemian Rhapsody", vec![queen_official()]),
    );
    let pipeline = pipeline(&pool, web.clone(), None, true);

    let result = pipeline.match_track(track, false).await.unwrap();

    assert_eq!(result.status, MatchStatus::Matched);
    assert!(!result.needs_review);
    assert_eq!(result.method, MatchMethod::WebSearch);
    assert_eq!(result.video_id(), Some(QUEEN_VIDEO));
    assert!(result.scores.composite >= 0.85);
    assert!(pipeline.get_candidates(track).await.unwrap().is_empty());

    let stored = pipeline.get_match(track).await.unwrap().unwrap();
    assert_eq!(stored.status, MatchStatus::Matched);
    assert_eq!(stored.video_id(), Some(QUEEN_VIDEO));
}

#[tokio::test]
async fn test_plausible_results_need_review_with_five_ranked_candidates() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let track = seed_track(&pool, None, "Bohemian Rhapsody", "Queen", 354).await.unwrap();

    let web = Arc::new(FakeVideoSource::new(MatchMethod::WebSearch).with_results("Bohemian Rhapsody", reuploads()));
    let pipeline = pipeline(&pool, web, None, true);

    let result = pipeline.match_track(track, false).await.unwrap();

    assert_eq!(result.status, MatchStatus::NeedsReview);
    assert!(result.needs_review);
    assert_eq!(result.video_id(), Some("reupload0000"));
    assert!(result.scores.composite >= 0.6 && result.scores.composite < 0.85);

    let candidates = pipeline.get_candidates(track).await.unwrap();
    assert_eq!(candidates.len(), 5);
    assert_eq!(candidates[0].video.video_id, "reupload0000");
    for (i, c) in candidates.iter().enumerate() {
        assert_eq!(c.rank, i as i64 + 1);
        assert_eq!(c.source, MatchMethod::WebSearch);
    }
    for pair in candidates.windows(2) {
        assert!(pair[0].scores.composite > pair[1].scores.composite);
    }
    // The worst-length reupload falls off the list
    assert!(candidates.iter().all(|c| c.video.video_id != "reupload0005"));
}

#[tokio::test]
async fn test_no_acceptable_result_is_unavailable_without_fallback() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let track = seed_track(&pool, None, "Completely Different Song", "Queen", 100).await.unwrap();

    let web = Arc::new(
        FakeVideoSource::new(MatchMethod::WebSearch).with_results("Completely Different Song", off_target()),
    );
    let api = Arc::new(FakeVideoSource::new(MatchMethod::ApiSearch));
    let pipeline = pipeline(&pool, web.clone(), Some(api.clone()), false);

    let result = pipeline.match_track(track, false).await.unwrap();

    assert_eq!(result.status, MatchStatus::Unavailable);
    assert_eq!(result.method, MatchMethod::None);
    assert!(result.video.is_none());
    assert_eq!(web.calls(), 1);
    assert_eq!(api.calls(), 0);
    assert!(pipeline.get_candidates(track).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_api_fallback_finds_what_web_search_missed() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let track = seed_track(&pool, None, "Bohemian Rhapsody", "Queen", 354).await.unwrap();

    let web = Arc::new(FakeVideoSource::new(MatchMethod::WebSearch).with_results("Bohemian Rhapsody", off_target()));
    let api = Arc::new(
        FakeVideoSource::new(MatchMethod::ApiSearch).with_results("Bohemian Rhapsody", vec![queen_official()]),
    );
    let pipeline = pipeline(&pool, web.clone(), Some(api.clone()), true);

    let result = pipeline.match_track(track, false).await.unwrap();

    assert_eq!(result.status, MatchStatus::Matched);
    assert_eq!(result.method, MatchMethod::ApiSearch);
    assert_eq!(result.video_id(), Some(QUEEN_VIDEO));
    assert_eq!(web.calls(), 1);
    assert_eq!(api.calls(), 1);
}

#[tokio::test]
async fn test_api_not_consulted_when_web_result_is_acceptable() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let track = seed_track(&pool, None, "Bohemian Rhapsody", "Queen", 354).await.unwrap();

    let web = Arc::new(FakeVideoSource::new(MatchMethod::WebSearch).with_results("Bohemian Rhapsody", reuploads()));
    let api = Arc::new(
        FakeVideoSource::new(MatchMethod::ApiSearch).with_results("Bohemian Rhapsody", vec![queen_official()]),
    );
    let pipeline = pipeline(&pool, web, Some(api.clone()), true);

    let result = pipeline.match_track(track, false).await.unwrap();

    assert_eq!(result.status, MatchStatus::NeedsReview);
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn test_existing_match_kept_unless_forced() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let track = seed_track(&pool, None, "Bohemian Rhapsody", "Queen", 354).await.unwrap();

    let web = Arc::new(
        FakeVideoSource::new(MatchMethod::WebSearch).with_results("Bohemian Rhapsody", vec![queen_official()]),
    );
    let pipeline = pipeline(&pool, web.clone(), None, true);

    pipeline.match_track(track, false).await.unwrap();
    let again = pipeline.match_track(track, false).await.unwrap();
    assert_eq!(again.status, MatchStatus::Matched);
    assert_eq!(web.calls(), 1);

    let forced = pipeline.match_track(track, true).await.unwrap();
    assert_eq!(forced.status, MatchStatus::Matched);
    assert_eq!(web.calls(), 2);
}

#[tokio::test]
async fn test_every_search_failing_is_an_error_and_stores_nothing() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let track = seed_track(&pool, None, "Bohemian Rhapsody", "Queen", 354).await.unwrap();

    let web = Arc::new(FakeVideoSource::failing(MatchMethod::WebSearch));
    let api = Arc::new(FakeVideoSource::failing(MatchMethod::ApiSearch));
    let pipeline = pipeline(&pool, web, Some(api.clone()), true);

    let err = pipeline.match_track(track, false).await.unwrap_err();
    assert!(matches!(err, Error::External(_)));
    assert_eq!(api.calls(), 1);
    assert!(pipeline.get_match(track).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_track_is_not_found() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let web = Arc::new(FakeVideoSource::new(MatchMethod::WebSearch));
    let pipeline = pipeline(&pool, web.clone(), None, true);

    let err = pipeline.match_track(999, false).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(web.calls(), 0);
}

#[tokio::test]
async fn test_selecting_a_candidate_marks_track_reviewed() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let track = seed_track(&pool, None, "Bohemian Rhapsody", "Queen", 354).await.unwrap();
    let other = seed_track(&pool, None, "Another One Bites the Dust", "Queen", 215).await.unwrap();

    let web = Arc::new(FakeVideoSource::new(MatchMethod::WebSearch).with_results("Bohemian Rhapsody", reuploads()));
    let pipeline = pipeline(&pool, web, None, true);
    pipeline.match_track(track, false).await.unwrap();

    let candidates = pipeline.get_candidates(track).await.unwrap();
    let third = &candidates[2];

    let err = pipeline.select_candidate(other, third.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = pipeline.select_candidate(track, 987_654).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let result = pipeline.select_candidate(track, third.id).await.unwrap();
    assert_eq!(result.status, MatchStatus::Reviewed);
    assert!(!result.needs_review);
    assert_eq!(result.method, MatchMethod::WebSearch);
    assert_eq!(result.video_id(), Some(third.video.video_id.as_str()));
    assert!(result.reviewed_at.is_some());
    assert!(pipeline.get_candidates(track).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_match_accepts_urls_and_bare_ids() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let track = seed_track(&pool, None, "Bohemian Rhapsody", "Queen", 354).await.unwrap();

    let web = Arc::new(FakeVideoSource::new(MatchMethod::WebSearch));
    let metadata = FakeMetadata::default().with_video(queen_official());
    let pipeline = pipeline_with_metadata(&pool, web, None, true, metadata);

    let result = pipeline
        .set_manual_match(track, "https://youtu.be/fJ9rUzIMcZQ")
        .await
        .unwrap();
    assert_eq!(result.status, MatchStatus::Reviewed);
    assert_eq!(result.method, MatchMethod::Manual);
    assert_eq!(result.video_id(), Some(QUEEN_VIDEO));
    assert!(result.scores.composite > 0.85);

    let result = pipeline.set_manual_match(track, QUEEN_VIDEO).await.unwrap();
    assert_eq!(result.video_id(), Some(QUEEN_VIDEO));

    let err = pipeline.set_manual_match(track, "not a video").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = pipeline.set_manual_match(track, "zzzzzzzzzzz").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_mark_unavailable_is_final_review() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let track = seed_track(&pool, None, "Bohemian Rhapsody", "Queen", 354).await.unwrap();

    let web = Arc::new(FakeVideoSource::new(MatchMethod::WebSearch).with_results("Bohemian Rhapsody", reuploads()));
    let pipeline = pipeline(&pool, web, None, true);
    pipeline.match_track(track, false).await.unwrap();

    let result = pipeline.mark_unavailable(track).await.unwrap();
    assert_eq!(result.status, MatchStatus::Unavailable);
    assert_eq!(result.method, MatchMethod::Manual);
    assert!(result.reviewed_at.is_some());
    assert!(pipeline.get_candidates(track).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_playlist_summary_counts_each_outcome() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let matched = seed_track(&pool, None, "Bohemian Rhapsody", "Queen", 354).await.unwrap();
    let review = seed_track(&pool, None, "Somebody to Love", "Queen", 296).await.unwrap();
    let missing = seed_track(&pool, None, "Completely Different Song", "Queen", 100).await.unwrap();
    for (position, id) in [matched, review, missing].iter().enumerate() {
        db::tracks::add_to_playlist(&pool, 7, *id, position as i64).await.unwrap();
    }

    let web = Arc::new(
        FakeVideoSource::new(MatchMethod::WebSearch)
            .with_results("Bohemian Rhapsody", vec![queen_official()])
            .with_results(
                "Somebody to Love",
                vec![video("somebody001", "Somebody to Love", "Random Uploads", 296)],
            )
            .with_results("Completely Different Song", off_target()),
    );
    let pipeline = pipeline(&pool, web.clone(), None, false);

    let summary = pipeline.match_playlist(7, &CancellationToken::new()).await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.needs_review, 1);
    assert_eq!(summary.unavailable, 1);
    assert_eq!(summary.errors, 0);
    assert!(!summary.cancelled);
    assert_eq!(web.calls(), 3);
}

#[tokio::test]
async fn test_cancelled_playlist_run_stops_before_next_track() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let track = seed_track(&pool, None, "Bohemian Rhapsody", "Queen", 354).await.unwrap();
    db::tracks::add_to_playlist(&pool, 3, track, 0).await.unwrap();

    let web = Arc::new(FakeVideoSource::new(MatchMethod::WebSearch));
    let pipeline = pipeline(&pool, web.clone(), None, true);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = pipeline.match_playlist(3, &cancel).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.total, 1);
    assert_eq!(web.calls(), 0);
    assert!(pipeline.get_match(track).await.unwrap().is_none());
}
