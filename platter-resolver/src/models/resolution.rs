//! Duration resolution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resolution lifecycle
///
/// `Pending → InProgress → {Resolved, NeedsReview, Failed} → {Approved, Rejected}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    InProgress,
    Resolved,
    NeedsReview,
    Failed,
    Approved,
    Rejected,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::NeedsReview => "needs_review",
            Self::Failed => "failed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Settled resolutions are returned as-is instead of being re-queried
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Resolved | Self::Approved)
    }
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            "needs_review" => Ok(Self::NeedsReview),
            "failed" => Ok(Self::Failed),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown resolution status: {}", other)),
        }
    }
}

/// Action taken by a reviewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Apply,
    Reject,
    Manual,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Reject => "reject",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for ReviewAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apply" => Ok(Self::Apply),
            "reject" => Ok(Self::Reject),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown review action: {}", other)),
        }
    }
}

/// One service's answer for one track (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceResult {
    pub id: i64,
    pub resolution_id: i64,
    pub track_id: i64,
    pub source_name: String,
    /// Seconds; 0 = not found
    pub duration: i64,
    pub confidence: f64,
    pub match_score: f64,
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub query_ms: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SourceResult {
    pub fn is_error(&self) -> bool {
        self.error_message.is_some() && self.duration == 0
    }
}

/// Values written when a source answer is recorded
#[derive(Debug, Clone, Default)]
pub struct NewSourceResult {
    pub source_name: String,
    pub duration: i64,
    pub confidence: f64,
    pub match_score: f64,
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub query_ms: i64,
    pub error_message: Option<String>,
}

/// Resolution record, one per track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub id: i64,
    pub track_id: i64,
    pub status: ResolutionStatus,
    /// Size of the largest agreeing group
    pub consensus_count: i64,
    pub total_sources_queried: i64,
    pub successful_queries: i64,
    pub original_duration: Option<i64>,
    /// Consensus (or suggested) value in seconds
    pub resolved_duration: Option<i64>,
    pub auto_applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
    pub manually_reviewed: bool,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub review_notes: Option<String>,
    pub review_action: Option<ReviewAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Loaded on demand
    #[serde(default)]
    pub sources: Vec<SourceResult>,
}
