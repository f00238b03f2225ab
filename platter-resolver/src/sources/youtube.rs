//! Video-platform duration source (Data API v3, key authenticated)
//!
//! Metered by a daily quota, so results are cached on disk, including
//! confirmed misses.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::cache::DurationCache;
use super::rate_limiter::RateLimiter;
use super::text::{calculate_match_score, normalize_artist, normalize_title};
use super::{
    build_http_client, error_for_status, non_empty, require_title_artist, DurationSource,
    SourceError, TrackSearchResult, USER_AGENT_PRODUCT,
};

pub const YOUTUBE_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
const RATE_LIMIT_PER_MINUTE: u32 = 100;
const SEARCH_MAX_RESULTS: &str = "10";
const MIN_MATCH_SCORE: f64 = 0.3;
const CONFIDENCE_FACTOR: f64 = 0.6;

static ISO_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?").expect("valid ISO-8601 duration regex")
});

/// `PT#H#M#S` to seconds; unparsable input is 0
pub fn parse_iso_duration(value: &str) -> i64 {
    let Some(caps) = ISO_DURATION.captures(value) else {
        return 0;
    };
    let part = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .unwrap_or(0)
    };
    part(1) * 3600 + part(2) * 60 + part(3)
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchItem {
    pub id: SearchItemId,
    pub snippet: Snippet,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchItemId {
    #[serde(rename = "videoId")]
    pub video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Snippet {
    #[serde(default)]
    pub title: String,
    #[serde(rename = "channelTitle", default)]
    pub channel_title: String,
    #[serde(default)]
    pub thumbnails: HashMap<String, Thumbnail>,
}

impl Snippet {
    pub fn best_thumbnail(&self) -> Option<String> {
        ["high", "medium", "default"]
            .iter()
            .find_map(|k| self.thumbnails.get(*k))
            .map(|t| t.url.clone())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VideosResponse {
    #[serde(default)]
    pub items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VideoItem {
    pub id: String,
    #[serde(default)]
    pub snippet: Snippet,
    #[serde(rename = "contentDetails")]
    pub content_details: Option<ContentDetails>,
    pub statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentDetails {
    #[serde(default)]
    pub duration: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Statistics {
    #[serde(rename = "viewCount")]
    pub view_count: Option<String>,
}

/// Query sent to the platform: normalized title, artist and (distinct) album
pub fn build_search_query(title: &str, artist: &str, album: Option<&str>) -> String {
    let title = normalize_title(title);
    let artist = normalize_artist(artist);
    let mut words = vec![title, artist.clone()];
    if let Some(album) = album.map(normalize_title).filter(|a| !a.is_empty() && *a != artist) {
        words.push(album);
    }
    words.join(" ")
}

/// Video-platform duration source
pub struct YouTubeDurationClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    cache: Option<Arc<DurationCache>>,
    rate_limiter: RateLimiter,
}

impl YouTubeDurationClient {
    pub fn new(api_key: Option<String>, cache: Option<Arc<DurationCache>>) -> Result<Self, SourceError> {
        Self::with_base_url(api_key, cache, YOUTUBE_API_BASE_URL)
    }

    pub fn with_base_url(
        api_key: Option<String>,
        cache: Option<Arc<DurationCache>>,
        base_url: impl Into<String>,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            http_client: build_http_client(USER_AGENT_PRODUCT)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            cache,
            rate_limiter: RateLimiter::per_minute(RATE_LIMIT_PER_MINUTE),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        self.rate_limiter.wait().await;

        let response = self
            .http_client
            .get(format!("{}/{}", self.base_url, endpoint))
            .query(params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_status(response, &self.rate_limiter).await);
        }

        response.json().await.map_err(|e| SourceError::Parse(e.to_string()))
    }

    async fn lookup(
        &self,
        title: &str,
        artist: &str,
        album: Option<&str>,
        api_key: &str,
    ) -> Result<Option<TrackSearchResult>, SourceError> {
        let query = build_search_query(title, artist, album);
        let search: SearchResponse = self
            .get(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "video"),
                    ("q", query.as_str()),
                    ("maxResults", SEARCH_MAX_RESULTS),
                    ("key", api_key),
                ],
            )
            .await?;

        let ids: Vec<&str> = search
            .items
            .iter()
            .filter_map(|item| item.id.video_id.as_deref())
            .collect();
        if ids.is_empty() {
            return Ok(None);
        }

        let joined = ids.join(",");
        let details: VideosResponse = self
            .get(
                "videos",
                &[("part", "contentDetails"), ("id", joined.as_str()), ("key", api_key)],
            )
            .await?;

        let durations: HashMap<String, i64> = details
            .items
            .into_iter()
            .map(|item| {
                let seconds = item
                    .content_details
                    .map(|c| parse_iso_duration(&c.duration))
                    .unwrap_or(0);
                (item.id, seconds)
            })
            .collect();

        Ok(Self::find_best_match(&search.items, &durations, title, artist))
    }

    fn find_best_match(
        items: &[SearchItem],
        durations: &HashMap<String, i64>,
        title: &str,
        artist: &str,
    ) -> Option<TrackSearchResult> {
        let mut best: Option<TrackSearchResult> = None;

        for item in items {
            let Some(video_id) = item.id.video_id.as_deref() else {
                continue;
            };
            let duration = durations.get(video_id).copied().unwrap_or(0);
            if duration <= 0 {
                continue;
            }

            let match_score =
                calculate_match_score(title, artist, &item.snippet.title, &item.snippet.channel_title);
            if best.as_ref().map_or(true, |b| match_score > b.match_score) {
                best = Some(TrackSearchResult {
                    external_id: video_id.to_string(),
                    external_url: format!("https://www.youtube.com/watch?v={}", video_id),
                    title: item.snippet.title.clone(),
                    artist: item.snippet.channel_title.clone(),
                    album: None,
                    duration,
                    match_score,
                    confidence: match_score * CONFIDENCE_FACTOR,
                });
            }
        }

        best.filter(|b| b.match_score >= MIN_MATCH_SCORE)
    }
}

#[async_trait]
impl DurationSource for YouTubeDurationClient {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn rate_limit_remaining(&self) -> u32 {
        self.rate_limiter.remaining()
    }

    fn is_expensive(&self) -> bool {
        true
    }

    async fn search_track(
        &self,
        title: &str,
        artist: &str,
        album: Option<&str>,
    ) -> Result<Option<TrackSearchResult>, SourceError> {
        require_title_artist(title, artist)?;
        let album = non_empty(album);
        let cache_album = album.unwrap_or("");

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.lookup(title, artist, cache_album).await {
                if entry.is_not_found() {
                    tracing::debug!(source = "youtube", title = %title, "Cached miss");
                    return Ok(None);
                }
                tracing::debug!(source = "youtube", title = %title, video_id = %entry.video_id, "Cache hit");
                return Ok(Some(TrackSearchResult {
                    external_url: format!("https://www.youtube.com/watch?v={}", entry.video_id),
                    external_id: entry.video_id,
                    title: entry.video_title,
                    artist: artist.to_string(),
                    album: album.map(str::to_string),
                    duration: entry.duration,
                    match_score: entry.match_score,
                    confidence: entry.match_score * CONFIDENCE_FACTOR,
                }));
            }
        }

        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(None);
        };

        let result = self.lookup(title, artist, album, api_key).await?;

        if let Some(cache) = &self.cache {
            let stored = match &result {
                Some(found) => {
                    cache
                        .store_found(
                            title,
                            artist,
                            cache_album,
                            found.duration,
                            &found.external_id,
                            &found.title,
                            found.match_score,
                        )
                        .await
                }
                None => cache.store_not_found(title, artist, cache_album).await,
            };
            if let Err(e) = stored {
                tracing::warn!(source = "youtube", error = %e, "Failed to write duration cache");
            }
        }

        Ok(result)
    }
}
