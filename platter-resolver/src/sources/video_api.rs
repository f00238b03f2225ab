//! Video platform Data API as a match candidate source
//!
//! Used as the fallback after web search. Authenticates with either an API
//! key or an OAuth bearer token; the token wins when both are present.

use async_trait::async_trait;
use std::collections::HashMap;

use super::rate_limiter::RateLimiter;
use super::text::{normalize_artist, normalize_title};
use super::youtube::{parse_iso_duration, SearchResponse, VideoItem, VideosResponse, YOUTUBE_API_BASE_URL};
use super::{build_http_client, error_for_status, SourceError, USER_AGENT_PRODUCT};
use crate::models::{MatchMethod, VideoInfo};
use crate::services::match_pipeline::{VideoCandidateSource, VideoMetadataFetcher};

const RATE_LIMIT_PER_MINUTE: u32 = 100;
const SEARCH_MAX_RESULTS: &str = "10";

/// How requests are authorised
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCredentials {
    ApiKey(String),
    BearerToken(String),
}

impl ApiCredentials {
    /// Pick credentials from the configured values; blank values are ignored
    pub fn from_parts(api_key: Option<String>, oauth_token: Option<String>) -> Option<Self> {
        let nonblank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        nonblank(oauth_token)
            .map(Self::BearerToken)
            .or_else(|| nonblank(api_key).map(Self::ApiKey))
    }
}

fn video_info(item: VideoItem) -> VideoInfo {
    VideoInfo {
        thumbnail_url: item.snippet.best_thumbnail(),
        duration: item
            .content_details
            .map(|c| parse_iso_duration(&c.duration))
            .unwrap_or(0),
        view_count: item
            .statistics
            .and_then(|s| s.view_count)
            .and_then(|v| v.parse().ok()),
        title: item.snippet.title,
        channel: item.snippet.channel_title,
        video_id: item.id,
    }
}

/// Authenticated platform API client
pub struct VideoApiClient {
    http_client: reqwest::Client,
    base_url: String,
    credentials: Option<ApiCredentials>,
    rate_limiter: RateLimiter,
}

impl VideoApiClient {
    pub fn new(credentials: Option<ApiCredentials>) -> Result<Self, SourceError> {
        Self::with_base_url(credentials, YOUTUBE_API_BASE_URL)
    }

    pub fn with_base_url(
        credentials: Option<ApiCredentials>,
        base_url: impl Into<String>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http_client: build_http_client(USER_AGENT_PRODUCT)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            rate_limiter: RateLimiter::per_minute(RATE_LIMIT_PER_MINUTE),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let Some(credentials) = &self.credentials else {
            return Err(SourceError::InvalidInput("video API credentials not configured".to_string()));
        };

        self.rate_limiter.wait().await;

        let mut request = self
            .http_client
            .get(format!("{}/{}", self.base_url, endpoint))
            .query(params);
        request = match credentials {
            ApiCredentials::ApiKey(key) => request.query(&[("key", key.as_str())]),
            ApiCredentials::BearerToken(token) => request.bearer_auth(token),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(error_for_status(response, &self.rate_limiter).await);
        }

        response.json().await.map_err(|e| SourceError::Parse(e.to_string()))
    }

    async fn videos(&self, ids: &[&str]) -> Result<Vec<VideoInfo>, SourceError> {
        let joined = ids.join(",");
        let response: VideosResponse = self
            .get(
                "videos",
                &[("part", "snippet,contentDetails,statistics"), ("id", joined.as_str())],
            )
            .await?;
        Ok(response.items.into_iter().map(video_info).collect())
    }
}

#[async_trait]
impl VideoCandidateSource for VideoApiClient {
    fn method(&self) -> MatchMethod {
        MatchMethod::ApiSearch
    }

    fn is_available(&self) -> bool {
        self.credentials.is_some()
    }

    async fn search_videos(&self, title: &str, artist: &str) -> Result<Vec<VideoInfo>, SourceError> {
        let query = format!("{} {}", normalize_title(title), normalize_artist(artist));
        let search: SearchResponse = self
            .get(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "video"),
                    ("q", query.as_str()),
                    ("maxResults", SEARCH_MAX_RESULTS),
                ],
            )
            .await?;

        let ids: Vec<&str> = search
            .items
            .iter()
            .filter_map(|item| item.id.video_id.as_deref())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // Keep search ranking order; details come back in arbitrary order
        let mut details: HashMap<String, VideoInfo> = self
            .videos(&ids)
            .await?
            .into_iter()
            .map(|v| (v.video_id.clone(), v))
            .collect();

        let results: Vec<VideoInfo> = ids.iter().filter_map(|id| details.remove(*id)).collect();
        tracing::info!(query = %query, found = results.len(), "Video API search complete");
        Ok(results)
    }
}

#[async_trait]
impl VideoMetadataFetcher for VideoApiClient {
    async fn fetch_video(&self, video_id: &str) -> Result<Option<VideoInfo>, SourceError> {
        Ok(self.videos(&[video_id]).await?.into_iter().next())
    }
}
