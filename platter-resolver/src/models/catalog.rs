//! Catalog rows the engine reads and updates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Album as stored in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub title: String,
    pub artist: String,
}

/// Track as stored in the catalog, joined with its album title
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub album_id: Option<i64>,
    pub album_title: Option<String>,
    pub title: String,
    pub artist: String,
    /// Seconds; 0 when unknown
    pub duration: i64,
    pub duration_source: Option<String>,
    pub duration_resolved_at: Option<DateTime<Utc>>,
}

impl Track {
    pub fn has_duration(&self) -> bool {
        self.duration > 0
    }

    /// "Artist - Title" for progress display
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}
