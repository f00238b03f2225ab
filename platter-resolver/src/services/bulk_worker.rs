//! Resumable catalog-wide worker
//!
//! Drives one [`TrackProcessor`] over an ordered track list, one track at a
//! time. Pause and stop are honoured between tracks; progress is snapshotted
//! every few tracks so a restarted process can pick up after the last
//! processed track.

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use platter_common::events::{CatalogEvent, EventBus};
use platter_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use super::consensus::ConsensusResolver;
use super::match_pipeline::MatchPipeline;
use super::state_manager::StateManager;
use crate::db::{matches, progress, tracks};
use crate::models::{
    Checkpoint, JobKind, MatchStatus, ResolutionStatus, ResolverProgress, Track, WorkerStatus,
};

/// `[worker]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pause between tracks, independent of source rate limits
    pub inter_track_delay_ms: u64,
    /// Persist a progress snapshot every N processed tracks
    pub snapshot_every: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            inter_track_delay_ms: 100,
            snapshot_every: 10,
        }
    }
}

/// Result of processing one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Resolved,
    NeedsReview,
    Failed,
    Skipped,
}

/// One bulk process (duration resolution or video matching)
#[async_trait]
pub trait TrackProcessor: Send + Sync {
    fn job(&self) -> JobKind;

    /// Ordered ids of every track this run should visit
    async fn load_track_ids(&self) -> Result<Vec<i64>>;

    async fn process(&self, track: &Track) -> Result<TrackOutcome>;
}

/// Fills in missing durations through the consensus resolver
pub struct DurationProcessor {
    pool: SqlitePool,
    resolver: ConsensusResolver,
}

impl DurationProcessor {
    pub fn new(pool: SqlitePool, resolver: ConsensusResolver) -> Self {
        Self { pool, resolver }
    }
}

#[async_trait]
impl TrackProcessor for DurationProcessor {
    fn job(&self) -> JobKind {
        JobKind::Duration
    }

    async fn load_track_ids(&self) -> Result<Vec<i64>> {
        tracks::track_ids_missing_duration(&self.pool).await
    }

    async fn process(&self, track: &Track) -> Result<TrackOutcome> {
        if track.has_duration() {
            return Ok(TrackOutcome::Skipped);
        }

        let resolution = self.resolver.resolve_track(track.id).await?;
        Ok(match resolution.status {
            ResolutionStatus::Resolved | ResolutionStatus::Approved => TrackOutcome::Resolved,
            ResolutionStatus::NeedsReview => TrackOutcome::NeedsReview,
            ResolutionStatus::Failed => TrackOutcome::Failed,
            ResolutionStatus::Pending | ResolutionStatus::InProgress | ResolutionStatus::Rejected => {
                TrackOutcome::Skipped
            }
        })
    }
}

/// Matches every catalog track to a video
pub struct MatchProcessor {
    pool: SqlitePool,
    pipeline: MatchPipeline,
}

impl MatchProcessor {
    pub fn new(pool: SqlitePool, pipeline: MatchPipeline) -> Self {
        Self { pool, pipeline }
    }
}

#[async_trait]
impl TrackProcessor for MatchProcessor {
    fn job(&self) -> JobKind {
        JobKind::Matching
    }

    async fn load_track_ids(&self) -> Result<Vec<i64>> {
        tracks::all_track_ids(&self.pool).await
    }

    async fn process(&self, track: &Track) -> Result<TrackOutcome> {
        if let Some(existing) = matches::get_match(&self.pool, track.id).await? {
            if existing.status.is_final() {
                return Ok(TrackOutcome::Skipped);
            }
        }

        let result = self.pipeline.match_track(track.id, false).await?;
        Ok(match result.status {
            MatchStatus::Matched => TrackOutcome::Resolved,
            MatchStatus::NeedsReview => TrackOutcome::NeedsReview,
            MatchStatus::Unavailable => TrackOutcome::Failed,
            MatchStatus::Reviewed | MatchStatus::Pending => TrackOutcome::Skipped,
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs one processor until completion, stop or failure
pub struct BulkWorker {
    pool: SqlitePool,
    processor: Arc<dyn TrackProcessor>,
    state: Arc<StateManager>,
    config: WorkerConfig,
    event_bus: EventBus,
}

impl BulkWorker {
    pub fn new(
        pool: SqlitePool,
        processor: Arc<dyn TrackProcessor>,
        state: Arc<StateManager>,
        config: WorkerConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            pool,
            processor,
            state,
            config,
            event_bus,
        }
    }

    /// Run to the end; panics and errors leave the checkpoint `failed`
    pub async fn run(&self) -> Result<ResolverProgress> {
        let job = self.processor.job();
        if !self.state.status().is_active() {
            self.state.transition(WorkerStatus::Running)?;
        }

        let outcome = AssertUnwindSafe(self.run_loop()).catch_unwind().await;
        let message = match outcome {
            Ok(Ok(progress)) => return Ok(progress),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("worker panicked: {}", panic_message(payload)),
        };

        tracing::error!(job = %job, error = %message, "Bulk worker failed");
        if let Err(e) = progress::mark_failed(&self.pool, job, &message).await {
            tracing::warn!(job = %job, error = %e, "Failed to record worker failure");
        }
        let previous = self.state.transition(WorkerStatus::Failed).unwrap_or(WorkerStatus::Running);
        self.emit_status(job, None, previous, WorkerStatus::Failed);

        Err(Error::Internal(message))
    }

    /// Fresh checkpoint, or the previous one if it is recent enough to resume
    async fn prepare(&self) -> Result<(ResolverProgress, Checkpoint)> {
        let job = self.processor.job();
        let now = Utc::now();

        if let Some(previous) = progress::load(&self.pool, job).await? {
            if previous.is_resumable(now) {
                let track_ids = progress::load_track_list(&self.pool, job).await?;
                if !track_ids.is_empty() {
                    let checkpoint = Checkpoint::resume_after(track_ids, previous.last_processed_id);
                    let mut resumed = previous;
                    resumed.status = WorkerStatus::Running;
                    resumed.paused_at = None;
                    resumed.resumed_at = Some(now);
                    resumed.last_activity_at = now;

                    tracing::info!(
                        job = %job,
                        run_id = %resumed.run_id,
                        processed = resumed.counters.processed,
                        remaining = checkpoint.remaining().len(),
                        "Resuming from checkpoint"
                    );
                    return Ok((resumed, checkpoint));
                }
            } else if !previous.status.is_terminal() {
                tracing::warn!(job = %job, run_id = %previous.run_id, "Discarding stale checkpoint");
                progress::mark_failed(&self.pool, job, "Timed out").await?;
            }
        }

        let track_ids = self.processor.load_track_ids().await?;
        progress::save_track_list(&self.pool, job, &track_ids).await?;
        let fresh = ResolverProgress::new(job, track_ids.len() as i64);
        tracing::info!(job = %job, run_id = %fresh.run_id, total = fresh.total, "Starting bulk run");
        Ok((fresh, Checkpoint::new(track_ids)))
    }

    async fn run_loop(&self) -> Result<ResolverProgress> {
        let job = self.processor.job();
        let (mut current, mut checkpoint) = self.prepare().await?;
        progress::save(&self.pool, &current).await?;
        self.emit_status(job, Some(&current), WorkerStatus::Idle, WorkerStatus::Running);

        let delay = Duration::from_millis(self.config.inter_track_delay_ms);
        let snapshot_every = self.config.snapshot_every.max(1);

        while let Some(&track_id) = checkpoint.remaining().first() {
            if self.state.is_stop_requested() {
                return self.stop(current).await;
            }

            if self.state.status() == WorkerStatus::Paused {
                current.status = WorkerStatus::Paused;
                current.paused_at = Some(Utc::now());
                current.last_activity_at = Utc::now();
                progress::save(&self.pool, &current).await?;
                self.emit_status(job, Some(&current), WorkerStatus::Running, WorkerStatus::Paused);
                tracing::info!(job = %job, processed = current.counters.processed, "Bulk run paused");

                if !self.state.wait_while_paused().await {
                    continue;
                }

                current.status = WorkerStatus::Running;
                current.resumed_at = Some(Utc::now());
                current.last_activity_at = Utc::now();
                progress::save(&self.pool, &current).await?;
                self.emit_status(job, Some(&current), WorkerStatus::Paused, WorkerStatus::Running);
                tracing::info!(job = %job, "Bulk run resumed");
            }

            self.process_one(&mut current, track_id).await;
            checkpoint.advance();

            if current.counters.processed % snapshot_every == 0 {
                progress::save(&self.pool, &current).await?;
                self.emit_progress(&current);
            }

            if !checkpoint.is_done() && !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.state.cancellation_token().cancelled() => {}
                }
            }
        }

        let now = Utc::now();
        current.status = WorkerStatus::Completed;
        current.completed_at = Some(now);
        current.last_activity_at = now;
        current.current_track_id = None;
        current.current_track = None;
        progress::save(&self.pool, &current).await?;

        let previous = self.state.transition(WorkerStatus::Completed)?;
        self.emit_progress(&current);
        self.emit_status(job, Some(&current), previous, WorkerStatus::Completed);

        let c = current.counters;
        tracing::info!(
            job = %job,
            processed = c.processed,
            resolved = c.resolved,
            needs_review = c.needs_review,
            failed = c.failed,
            skipped = c.skipped,
            "Bulk run completed"
        );
        Ok(current)
    }

    /// Process one track; its errors are counted, never propagated
    async fn process_one(&self, current: &mut ResolverProgress, track_id: i64) {
        let job = self.processor.job();

        let outcome = match tracks::get_track(&self.pool, track_id).await {
            Ok(None) => {
                tracing::debug!(job = %job, track_id, "Track no longer exists, skipping");
                Ok(TrackOutcome::Skipped)
            }
            Ok(Some(track)) => {
                current.current_track_id = Some(track.id);
                current.current_track = Some(track.display_name());
                self.processor.process(&track).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(outcome) => {
                current.consecutive_errors = 0;
                match outcome {
                    TrackOutcome::Resolved => current.counters.resolved += 1,
                    TrackOutcome::NeedsReview => current.counters.needs_review += 1,
                    TrackOutcome::Failed => current.counters.failed += 1,
                    TrackOutcome::Skipped => current.counters.skipped += 1,
                }
            }
            Err(e) => {
                tracing::warn!(job = %job, track_id, error = %e, "Track processing failed");
                current.counters.failed += 1;
                current.consecutive_errors += 1;
                current.last_error = Some(e.to_string());
            }
        }

        current.counters.processed += 1;
        current.last_processed_id = Some(track_id);
        current.last_activity_at = Utc::now();
    }

    async fn stop(&self, mut current: ResolverProgress) -> Result<ResolverProgress> {
        let job = self.processor.job();
        let previous = self.state.status();

        current.status = WorkerStatus::Idle;
        current.last_activity_at = Utc::now();
        current.current_track_id = None;
        current.current_track = None;
        progress::save(&self.pool, &current).await?;

        if previous.is_active() {
            self.state.transition(WorkerStatus::Idle)?;
        }
        self.emit_status(job, Some(&current), previous, WorkerStatus::Idle);
        tracing::info!(job = %job, processed = current.counters.processed, "Bulk run stopped");
        Ok(current)
    }

    fn emit_status(&self, job: JobKind, current: Option<&ResolverProgress>, old: WorkerStatus, new: WorkerStatus) {
        self.event_bus.emit_lossy(CatalogEvent::BulkStatusChanged {
            job: job.as_str().to_string(),
            run_id: current.map(|p| p.run_id).unwrap_or_default(),
            old_status: old.as_str().to_string(),
            new_status: new.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }

    fn emit_progress(&self, current: &ResolverProgress) {
        self.event_bus.emit_lossy(CatalogEvent::BulkProgress {
            job: current.job.as_str().to_string(),
            run_id: current.run_id,
            processed: current.counters.processed,
            total: current.total,
            current_track: current.current_track.clone(),
            timestamp: Utc::now(),
        });
    }
}
