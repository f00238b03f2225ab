//! Video match records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Match lifecycle for a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Matched,
    NeedsReview,
    Reviewed,
    Unavailable,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Matched => "matched",
            Self::NeedsReview => "needs_review",
            Self::Reviewed => "reviewed",
            Self::Unavailable => "unavailable",
        }
    }

    /// Matched and reviewed rows are kept unless a re-match is forced
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Matched | Self::Reviewed)
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "matched" => Ok(Self::Matched),
            "needs_review" => Ok(Self::NeedsReview),
            "reviewed" => Ok(Self::Reviewed),
            "unavailable" => Ok(Self::Unavailable),
            other => Err(format!("unknown match status: {}", other)),
        }
    }
}

/// How a match was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    WebSearch,
    ApiSearch,
    Manual,
    None,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::ApiSearch => "api_search",
            Self::Manual => "manual",
            Self::None => "none",
        }
    }
}

impl FromStr for MatchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web_search" => Ok(Self::WebSearch),
            "api_search" => Ok(Self::ApiSearch),
            "manual" => Ok(Self::Manual),
            "none" => Ok(Self::None),
            other => Err(format!("unknown match method: {}", other)),
        }
    }
}

/// Video metadata returned by a search source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub video_id: String,
    pub title: String,
    pub channel: String,
    /// Seconds; 0 when the source does not report durations
    pub duration: i64,
    pub thumbnail_url: Option<String>,
    pub view_count: Option<i64>,
}

impl VideoInfo {
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}

/// Score breakdown carried on persisted rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub composite: f64,
    pub title: f64,
    pub artist: f64,
    pub duration: f64,
    pub channel: f64,
}

/// Chosen video for a track (one per track)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMatch {
    pub track_id: i64,
    /// None when unavailable
    pub video: Option<VideoInfo>,
    pub scores: ScoreBreakdown,
    pub method: MatchMethod,
    pub status: MatchStatus,
    pub needs_review: bool,
    pub matched_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl VideoMatch {
    pub fn unavailable(track_id: i64, method: MatchMethod) -> Self {
        Self {
            track_id,
            video: None,
            scores: ScoreBreakdown::default(),
            method,
            status: MatchStatus::Unavailable,
            needs_review: false,
            matched_at: None,
            reviewed_at: None,
        }
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video.as_ref().map(|v| v.video_id.as_str())
    }
}

/// Ranked alternate kept while a match awaits review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCandidate {
    pub id: i64,
    pub track_id: i64,
    /// 1 = best
    pub rank: i64,
    pub video: VideoInfo,
    pub scores: ScoreBreakdown,
    pub source: MatchMethod,
}
