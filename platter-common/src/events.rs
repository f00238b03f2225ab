//! Catalog event types and EventBus
//!
//! Long-running jobs publish their status here; front-ends subscribe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by the resolution and matching engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CatalogEvent {
    /// A bulk job changed state (running, paused, completed, ...)
    BulkStatusChanged {
        /// "duration" or "matching"
        job: String,
        run_id: Uuid,
        old_status: String,
        new_status: String,
        timestamp: DateTime<Utc>,
    },

    /// Periodic bulk progress snapshot
    BulkProgress {
        job: String,
        run_id: Uuid,
        processed: i64,
        total: i64,
        current_track: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Duration resolution for one track finished
    TrackResolved {
        track_id: i64,
        status: String,
        resolved_duration: Option<i64>,
        auto_applied: bool,
        timestamp: DateTime<Utc>,
    },

    /// Video matching for one track finished
    TrackMatched {
        track_id: i64,
        status: String,
        video_id: Option<String>,
        match_score: f64,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`CatalogEvent`]
///
/// Slow subscribers lose the oldest events once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CatalogEvent>,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CatalogEvent,
    ) -> Result<usize, broadcast::error::SendError<CatalogEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CatalogEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(track_id: i64) -> CatalogEvent {
        CatalogEvent::TrackResolved {
            track_id,
            status: "resolved".to_string(),
            resolved_duration: Some(354),
            auto_applied: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(10);
        assert!(bus.emit(resolved(1)).is_err());
        bus.emit_lossy(resolved(1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        assert_eq!(bus.emit(resolved(7)).unwrap(), 1);

        match rx.recv().await.unwrap() {
            CatalogEvent::TrackResolved { track_id, .. } => assert_eq!(track_id, 7),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(resolved(3)).unwrap();
        assert_eq!(json["type"], "TrackResolved");
        assert_eq!(json["track_id"], 3);
    }
}
