//! Bulk worker state machine
//!
//! `Idle → Running ⇄ Paused → {Completed, Failed}`. Stop returns any
//! non-terminal state to `Idle`. The current state lives in a watch channel;
//! transitions are checked and applied under the channel's lock, and the
//! worker blocks on the same channel while paused.

use platter_common::{Error, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::models::WorkerStatus;

/// Whether `from → to` is a legal transition
pub fn can_transition(from: WorkerStatus, to: WorkerStatus) -> bool {
    use WorkerStatus::*;
    matches!(
        (from, to),
        (Idle | Completed | Failed, Running)
            | (Running, Paused)
            | (Paused, Running)
            | (Running | Paused, Completed | Failed | Idle)
    )
}

/// Shared control surface between a running worker and its callers
#[derive(Debug)]
pub struct StateManager {
    tx: watch::Sender<WorkerStatus>,
    cancel: CancellationToken,
}

impl StateManager {
    /// The stop token is a child of `parent`, so host shutdown stops the worker too
    pub fn new(parent: &CancellationToken) -> Self {
        let (tx, _) = watch::channel(WorkerStatus::Idle);
        Self {
            tx,
            cancel: parent.child_token(),
        }
    }

    pub fn status(&self) -> WorkerStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerStatus> {
        self.tx.subscribe()
    }

    /// Apply a transition if legal; returns the previous state
    pub fn transition(&self, to: WorkerStatus) -> Result<WorkerStatus> {
        self.apply(None, to)
    }

    /// Like [`transition`](Self::transition), but only from `expected`
    ///
    /// The check and the change happen under one lock acquisition.
    pub fn transition_from(&self, expected: WorkerStatus, to: WorkerStatus) -> Result<WorkerStatus> {
        self.apply(Some(expected), to)
    }

    fn apply(&self, expected: Option<WorkerStatus>, to: WorkerStatus) -> Result<WorkerStatus> {
        let mut previous = WorkerStatus::Idle;
        let mut legal = false;
        self.tx.send_if_modified(|current| {
            previous = *current;
            legal = expected.map_or(true, |e| e == *current) && can_transition(*current, to);
            if legal {
                *current = to;
            }
            legal
        });

        if legal {
            tracing::debug!(from = %previous, to = %to, "Worker state changed");
            Ok(previous)
        } else {
            Err(Error::Conflict(format!("cannot move worker from {} to {}", previous, to)))
        }
    }

    pub fn request_start(&self) -> bool {
        self.transition(WorkerStatus::Running).is_ok()
    }

    /// Only legal while running
    pub fn request_pause(&self) -> bool {
        self.transition_from(WorkerStatus::Running, WorkerStatus::Paused).is_ok()
    }

    /// Only legal while paused
    pub fn request_resume(&self) -> bool {
        self.transition_from(WorkerStatus::Paused, WorkerStatus::Running).is_ok()
    }

    /// Signal the worker to stop at the next track boundary
    ///
    /// Returns false when the worker is not active.
    pub fn request_stop(&self) -> bool {
        if !self.status().is_active() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Block while paused; returns false if a stop arrived instead of a resume
    pub async fn wait_while_paused(&self) -> bool {
        let mut rx = self.tx.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if *rx.borrow_and_update() != WorkerStatus::Paused {
                return true;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = self.cancel.cancelled() => return false,
            }
        }
    }
}
