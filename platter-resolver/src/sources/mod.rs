//! External lookup sources
//!
//! Duration sources implement [`DurationSource`] and are queried in registry
//! order by the consensus resolver. Video search sources feed the matching
//! pipeline through [`crate::services::match_pipeline::VideoCandidateSource`].
//!
//! Uniform result contract:
//! - unconfigured source: `Ok(None)` (skip)
//! - nothing matched: `Ok(None)` (not found)
//! - transport or parse failure: `Err(SourceError)`

pub mod cache;
pub mod lastfm;
pub mod musicbrainz;
pub mod rate_limiter;
pub mod text;
pub mod video_api;
pub mod web_search;
pub mod wikipedia;
pub mod youtube;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use cache::{DurationCache, PersistentCache, SearchCache};
pub use lastfm::LastFmClient;
pub use musicbrainz::MusicBrainzClient;
pub use rate_limiter::RateLimiter;
pub use video_api::{ApiCredentials, VideoApiClient};
pub use web_search::{WebSearchClient, WebSearchConfig};
pub use wikipedia::WikipediaClient;
pub use youtube::YouTubeDurationClient;

/// Product token sent in every User-Agent header
pub const USER_AGENT_PRODUCT: &str = "Platter/1.0";

/// Timeout applied to every outbound request
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Source client errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by service")]
    RateLimited,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid query: {0}")]
    InvalidInput(String),

    #[error("Cache error: {0}")]
    Cache(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Network(e.to_string())
    }
}

impl From<SourceError> for platter_common::Error {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::InvalidInput(msg) => platter_common::Error::InvalidInput(msg),
            other => platter_common::Error::External(other.to_string()),
        }
    }
}

/// Best candidate a duration source found for one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSearchResult {
    pub external_id: String,
    pub external_url: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    /// Seconds
    pub duration: i64,
    /// How well the result matches the query, 0.0-1.0
    pub match_score: f64,
    /// How much the source itself is trusted, 0.0-1.0
    pub confidence: f64,
}

/// A third-party service that can report a track's duration
#[async_trait]
pub trait DurationSource: Send + Sync {
    /// Stable identifier stored on source records ("musicbrainz", ...)
    fn name(&self) -> &'static str;

    /// False when required credentials are missing
    fn is_configured(&self) -> bool;

    /// Requests left in the current rate-limit window
    fn rate_limit_remaining(&self) -> u32;

    /// Quota-metered sources are skipped once free sources agree
    fn is_expensive(&self) -> bool {
        false
    }

    async fn search_track(
        &self,
        title: &str,
        artist: &str,
        album: Option<&str>,
    ) -> Result<Option<TrackSearchResult>, SourceError>;
}

/// Ordered list of duration sources
pub type SourceRegistry = Vec<Arc<dyn DurationSource>>;

/// Shared HTTP client settings for every source
pub(crate) fn build_http_client(user_agent: &str) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| SourceError::Network(e.to_string()))
}

/// Title and artist are mandatory for every lookup
pub(crate) fn require_title_artist(title: &str, artist: &str) -> Result<(), SourceError> {
    if title.trim().is_empty() || artist.trim().is_empty() {
        return Err(SourceError::InvalidInput(
            "title and artist are required".to_string(),
        ));
    }
    Ok(())
}

/// Album names that carry information (non-empty)
pub(crate) fn non_empty(album: Option<&str>) -> Option<&str> {
    album.map(str::trim).filter(|a| !a.is_empty())
}

/// Map a non-success response to an error, honouring Retry-After on 429/503
pub(crate) async fn error_for_status(
    response: reqwest::Response,
    limiter: &RateLimiter,
) -> SourceError {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
    {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        limiter.wait_for_retry_after(retry_after.as_deref());
        return SourceError::RateLimited;
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();
    SourceError::Api(status.as_u16(), body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_title_artist() {
        assert!(require_title_artist("Song", "Band").is_ok());
        assert!(matches!(
            require_title_artist("  ", "Band"),
            Err(SourceError::InvalidInput(_))
        ));
        assert!(require_title_artist("Song", "").is_err());
    }

    #[test]
    fn test_non_empty_album() {
        assert_eq!(non_empty(Some(" Abbey Road ")), Some("Abbey Road"));
        assert_eq!(non_empty(Some("   ")), None);
        assert_eq!(non_empty(None), None);
    }

    #[test]
    fn test_source_error_converts_to_common_error() {
        let err: platter_common::Error = SourceError::Api(500, "boom".to_string()).into();
        assert!(matches!(err, platter_common::Error::External(_)));
        let err: platter_common::Error = SourceError::InvalidInput("x".to_string()).into();
        assert!(matches!(err, platter_common::Error::InvalidInput(_)));
    }
}
