//! Bulk job registry: one worker task per job kind

use platter_common::events::EventBus;
use platter_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::bulk_worker::{BulkWorker, TrackProcessor, WorkerConfig};
use super::state_manager::StateManager;
use crate::db::progress;
use crate::models::{JobKind, ResolverProgress, WorkerStatus};

struct RunningJob {
    state: Arc<StateManager>,
    handle: Option<JoinHandle<Result<ResolverProgress>>>,
}

/// Starts and controls the bulk workers
pub struct BulkJobs {
    pool: SqlitePool,
    processors: HashMap<JobKind, Arc<dyn TrackProcessor>>,
    config: WorkerConfig,
    event_bus: EventBus,
    shutdown: CancellationToken,
    running: Mutex<HashMap<JobKind, RunningJob>>,
}

impl BulkJobs {
    pub fn new(pool: SqlitePool, config: WorkerConfig, event_bus: EventBus, shutdown: CancellationToken) -> Self {
        Self {
            pool,
            processors: HashMap::new(),
            config,
            event_bus,
            shutdown,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, processor: Arc<dyn TrackProcessor>) {
        self.processors.insert(processor.job(), processor);
    }

    /// Spawn a worker for `job`; a second concurrent run is refused
    pub async fn start(&self, job: JobKind) -> Result<()> {
        let processor = self
            .processors
            .get(&job)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no processor registered for {} jobs", job)))?;

        let mut running = self.running.lock().await;
        if let Some(existing) = running.get(&job) {
            let finished = existing.handle.as_ref().map_or(true, |h| h.is_finished());
            if !finished {
                return Err(Error::Conflict(format!("{} job is already {}", job, existing.state.status())));
            }
        }

        let state = Arc::new(StateManager::new(&self.shutdown));
        state.transition(WorkerStatus::Running)?;

        let worker = BulkWorker::new(
            self.pool.clone(),
            processor,
            state.clone(),
            self.config.clone(),
            self.event_bus.clone(),
        );
        let handle = tokio::spawn(async move { worker.run().await });

        tracing::info!(job = %job, "Bulk job started");
        running.insert(
            job,
            RunningJob {
                state,
                handle: Some(handle),
            },
        );
        Ok(())
    }

    pub async fn pause(&self, job: JobKind) -> Result<bool> {
        Ok(self.with_state(job, |s| s.request_pause()).await)
    }

    pub async fn resume(&self, job: JobKind) -> Result<bool> {
        Ok(self.with_state(job, |s| s.request_resume()).await)
    }

    pub async fn cancel(&self, job: JobKind) -> Result<bool> {
        Ok(self.with_state(job, |s| s.request_stop()).await)
    }

    async fn with_state(&self, job: JobKind, f: impl FnOnce(&StateManager) -> bool) -> bool {
        let running = self.running.lock().await;
        let changed = running.get(&job).is_some_and(|r| f(&r.state));
        tracing::debug!(job = %job, changed, "Bulk job control request");
        changed
    }

    /// Live status of the current worker, or `None` when none was started
    pub async fn status(&self, job: JobKind) -> Option<WorkerStatus> {
        let running = self.running.lock().await;
        running.get(&job).map(|r| r.state.status())
    }

    /// Last persisted snapshot, with the live worker status when one is running
    ///
    /// Counters advance in snapshot steps while the worker runs.
    pub async fn progress(&self, job: JobKind) -> Result<Option<ResolverProgress>> {
        let Some(mut snapshot) = progress::load(&self.pool, job).await? else {
            return Ok(None);
        };
        if let Some(status) = self.status(job).await.filter(|s| s.is_active()) {
            snapshot.status = status;
        }
        Ok(Some(snapshot))
    }

    /// Wait for the current run of `job` to finish and return its outcome
    pub async fn wait(&self, job: JobKind) -> Result<ResolverProgress> {
        let handle = {
            let mut running = self.running.lock().await;
            running.get_mut(&job).and_then(|r| r.handle.take())
        };
        let handle = handle.ok_or_else(|| Error::NotFound(format!("no running {} job", job)))?;
        handle
            .await
            .map_err(|e| Error::Internal(format!("{} worker task failed: {}", job, e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_support::memory_pool, tracks};
    use crate::models::Track;
    use crate::services::bulk_worker::TrackOutcome;
    use async_trait::async_trait;
    use std::time::Duration;

    struct SlowProcessor {
        pool: SqlitePool,
    }

    #[async_trait]
    impl TrackProcessor for SlowProcessor {
        fn job(&self) -> JobKind {
            JobKind::Matching
        }

        async fn load_track_ids(&self) -> Result<Vec<i64>> {
            tracks::all_track_ids(&self.pool).await
        }

        async fn process(&self, _track: &Track) -> Result<TrackOutcome> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(TrackOutcome::Skipped)
        }
    }

    async fn jobs_with_tracks(count: usize) -> BulkJobs {
        let pool = memory_pool().await;
        for i in 0..count {
            tracks::insert_track(&pool, None, None, &format!("t{}", i), "Band", 0).await.unwrap();
        }
        let config = WorkerConfig {
            inter_track_delay_ms: 10,
            snapshot_every: 1,
        };
        let mut jobs = BulkJobs::new(pool.clone(), config, EventBus::new(64), CancellationToken::new());
        jobs.register(Arc::new(SlowProcessor { pool }));
        jobs
    }

    #[tokio::test]
    async fn test_duplicate_start_refused() {
        let jobs = jobs_with_tracks(20).await;
        jobs.start(JobKind::Matching).await.unwrap();
        assert!(matches!(jobs.start(JobKind::Matching).await, Err(Error::Conflict(_))));

        assert!(jobs.cancel(JobKind::Matching).await.unwrap());
        let result = jobs.wait(JobKind::Matching).await.unwrap();
        assert_eq!(result.status, WorkerStatus::Idle);
        assert!(result.counters.processed < 20);
    }

    #[tokio::test]
    async fn test_cancelled_run_restarts_where_it_stopped() {
        let jobs = jobs_with_tracks(20).await;
        jobs.start(JobKind::Matching).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(jobs.cancel(JobKind::Matching).await.unwrap());
        let stopped = jobs.wait(JobKind::Matching).await.unwrap();
        assert_eq!(stopped.status, WorkerStatus::Idle);
        assert!(stopped.counters.processed < 20);

        jobs.start(JobKind::Matching).await.unwrap();
        let finished = jobs.wait(JobKind::Matching).await.unwrap();
        assert_eq!(finished.status, WorkerStatus::Completed);
        assert_eq!(finished.run_id, stopped.run_id);
        assert_eq!(finished.counters.processed, 20);
        assert_eq!(finished.counters.skipped, 20);
    }

    #[tokio::test]
    async fn test_unregistered_job_is_not_found() {
        let jobs = jobs_with_tracks(1).await;
        assert!(matches!(jobs.start(JobKind::Duration).await, Err(Error::NotFound(_))));
        assert!(!jobs.pause(JobKind::Duration).await.unwrap());
    }

    #[tokio::test]
    async fn test_pause_resume_and_complete() {
        let jobs = jobs_with_tracks(5).await;
        jobs.start(JobKind::Matching).await.unwrap();

        assert!(jobs.pause(JobKind::Matching).await.unwrap());
        assert!(!jobs.pause(JobKind::Matching).await.unwrap());
        assert_eq!(jobs.status(JobKind::Matching).await, Some(WorkerStatus::Paused));

        assert!(jobs.resume(JobKind::Matching).await.unwrap());
        let result = jobs.wait(JobKind::Matching).await.unwrap();
        assert_eq!(result.status, WorkerStatus::Completed);
        assert_eq!(result.counters.processed, 5);
        assert_eq!(result.counters.skipped, 5);

        let stored = jobs.progress(JobKind::Matching).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkerStatus::Completed);

        // Finished runs can be started again
        jobs.start(JobKind::Matching).await.unwrap();
        jobs.wait(JobKind::Matching).await.unwrap();
    }
}
