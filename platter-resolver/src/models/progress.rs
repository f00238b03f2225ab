//! Bulk job progress checkpoint

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Checkpoints older than this are not resumed
pub const STALE_AFTER_MINUTES: i64 = 30;
/// Paused checkpoints get a longer grace period
pub const STALE_PAUSED_AFTER_HOURS: i64 = 4;

/// Which bulk process a checkpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Duration,
    Matching,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duration => "duration",
            Self::Matching => "matching",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "duration" => Ok(Self::Duration),
            "matching" => Ok(Self::Matching),
            other => Err(format!("unknown job kind: {}", other)),
        }
    }
}

/// Worker state
///
/// `Idle → Running ⇄ Paused → {Completed, Failed}`; stop or cancellation
/// from a non-terminal state returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown worker status: {}", other)),
        }
    }
}

/// Per-outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub processed: i64,
    pub resolved: i64,
    pub needs_review: i64,
    pub failed: i64,
    pub skipped: i64,
}

/// Single mutable checkpoint row per job kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverProgress {
    pub job: JobKind,
    pub run_id: Uuid,
    pub status: WorkerStatus,
    pub total: i64,
    pub counters: ProgressCounters,
    pub current_track_id: Option<i64>,
    pub current_track: Option<String>,
    pub last_processed_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub consecutive_errors: i64,
}

impl ResolverProgress {
    pub fn new(job: JobKind, total: i64) -> Self {
        let now = Utc::now();
        Self {
            job,
            run_id: Uuid::new_v4(),
            status: WorkerStatus::Running,
            total,
            counters: ProgressCounters::default(),
            current_track_id: None,
            current_track: None,
            last_processed_id: None,
            started_at: now,
            paused_at: None,
            resumed_at: None,
            completed_at: None,
            last_activity_at: now,
            last_error: None,
            consecutive_errors: 0,
        }
    }

    /// Stale checkpoints are marked failed instead of resumed
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let limit = if self.status == WorkerStatus::Paused {
            Duration::hours(STALE_PAUSED_AFTER_HOURS)
        } else {
            Duration::minutes(STALE_AFTER_MINUTES)
        };
        now - self.last_activity_at > limit
    }

    /// Whether a new run may pick up where this checkpoint left off
    ///
    /// Stopped (`Idle`) runs resume too; only finished runs start over.
    pub fn is_resumable(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && !self.is_stale(now)
    }

    pub fn percentage(&self) -> f64 {
        if self.total > 0 {
            (self.counters.processed as f64 / self.total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Ordered track list of a run plus the position of the next track
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub track_ids: Vec<i64>,
    pub cursor: usize,
}

impl Checkpoint {
    pub fn new(track_ids: Vec<i64>) -> Self {
        Self {
            track_ids,
            cursor: 0,
        }
    }

    /// Place the cursor right after `last_processed_id`
    ///
    /// An id missing from the list leaves the cursor at the start.
    pub fn resume_after(track_ids: Vec<i64>, last_processed_id: Option<i64>) -> Self {
        let cursor = last_processed_id
            .and_then(|last| track_ids.iter().position(|id| *id == last))
            .map(|pos| pos + 1)
            .unwrap_or(0);
        Self { track_ids, cursor }
    }

    pub fn remaining(&self) -> &[i64] {
        &self.track_ids[self.cursor.min(self.track_ids.len())..]
    }

    pub fn advance(&mut self) {
        if self.cursor < self.track_ids.len() {
            self.cursor += 1;
        }
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.track_ids.len()
    }
}
