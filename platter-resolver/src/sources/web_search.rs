//! Quota-free video search through public web search engines
//!
//! Runs a ladder of query variations against SearXNG instances (JSON API)
//! and DuckDuckGo's HTML endpoint, extracts watch URLs, then fills in
//! metadata from noembed (which reports durations) or the platform's own
//! oEmbed endpoint (which does not).

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::cache::{cache_key, SearchCache, SearchCacheEntry};
use super::text::{normalize_artist, normalize_title};
use super::{build_http_client, SourceError};
use crate::models::{MatchMethod, VideoInfo};
use crate::services::match_pipeline::{VideoCandidateSource, VideoMetadataFetcher};

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Unique videos that end the query ladder early
const ENOUGH_RESULTS: usize = 5;

const EXCLUDED_TITLE_TERMS: [&str; 2] = ["lyrics", "lyric video"];

static VIDEO_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"youtube\.com/watch\?(?:[^&]*&)*v=([a-zA-Z0-9_-]{11})",
        r"youtu\.be/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/embed/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/shorts/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/v/([a-zA-Z0-9_-]{11})",
        r"youtube\.com/attribution_link\?.*v%3D([a-zA-Z0-9_-]{11})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid video id regex"))
    .collect()
});

static VALID_VIDEO_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{11}$").expect("valid video id format regex"));

static DUCKDUCKGO_LINKS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r#"href="(https://www\.youtube\.com/watch\?v=[a-zA-Z0-9_-]{11})[^"]*""#)
            .expect("valid watch link regex"),
        Regex::new(r#"href="(https://youtu\.be/[a-zA-Z0-9_-]{11})""#).expect("valid short link regex"),
    ]
});

/// Extract a video id from any known URL form
pub fn extract_video_id(input: &str) -> Option<String> {
    VIDEO_ID_PATTERNS
        .iter()
        .find_map(|p| p.captures(input))
        .map(|caps| caps[1].to_string())
}

/// Exactly 11 characters of `[A-Za-z0-9_-]`
pub fn is_valid_video_id(id: &str) -> bool {
    VALID_VIDEO_ID.is_match(id)
}

/// Search phrasing, most specific first
pub fn query_variations(title: &str, artist: &str) -> Vec<String> {
    vec![
        format!("\"{} {}\" YouTube Music", title, artist),
        format!("\"{} {}\" \"Official Audio\"", title, artist),
        format!("\"{} {}\"", title, artist),
        format!("\"{}\" \"{}\"", artist, title),
        format!("\"{}\"", title),
    ]
}

fn is_acceptable_title(title: &str) -> bool {
    let lower = title.to_lowercase();
    !EXCLUDED_TITLE_TERMS.iter().any(|term| lower.contains(term))
}

#[derive(Debug, Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Debug, Deserialize)]
struct SearxResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
}

fn filter_searx_results(results: Vec<SearxResult>) -> Vec<String> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| r.title.is_empty() || is_acceptable_title(&r.title))
        .filter(|r| r.url.contains("youtube.com/watch?v="))
        .filter(|r| seen.insert(r.url.clone()))
        .map(|r| r.url)
        .collect()
}

fn parse_duckduckgo_links(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for pattern in DUCKDUCKGO_LINKS.iter() {
        for caps in pattern.captures_iter(html) {
            let url = caps[1].to_string();
            if seen.insert(url.clone()) {
                urls.push(url);
            }
        }
    }
    urls
}

#[derive(Debug, Deserialize)]
struct NoembedResponse {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author_name: String,
    thumbnail_url: Option<String>,
    #[serde(default)]
    duration: i64,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OembedResponse {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author_name: String,
    thumbnail_url: Option<String>,
}

/// `[web_search]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchConfig {
    pub enabled: bool,
    /// SearXNG `/search` endpoints, tried in order
    pub searxng_endpoints: Vec<String>,
    pub duckduckgo_url: String,
    pub noembed_url: String,
    pub oembed_url: String,
    /// Minimum spacing between search-engine requests
    pub min_interval_ms: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            searxng_endpoints: vec![
                "https://searx.be/search".to_string(),
                "https://searxng.de/search".to_string(),
            ],
            duckduckgo_url: "https://html.duckduckgo.com/html/".to_string(),
            noembed_url: "https://noembed.com/embed".to_string(),
            oembed_url: "https://www.youtube.com/oembed".to_string(),
            min_interval_ms: 1000,
        }
    }
}

/// Web-search candidate source and quota-free metadata fetcher
pub struct WebSearchClient {
    http_client: reqwest::Client,
    config: WebSearchConfig,
    cache: Option<Arc<SearchCache>>,
    pacer: DefaultDirectRateLimiter,
}

impl WebSearchClient {
    pub fn new(config: WebSearchConfig, cache: Option<Arc<SearchCache>>) -> Result<Self, SourceError> {
        let quota = Quota::with_period(Duration::from_millis(config.min_interval_ms.max(1)))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));

        Ok(Self {
            http_client: build_http_client(BROWSER_USER_AGENT)?,
            config,
            cache,
            pacer: RateLimiter::direct(quota),
        })
    }

    /// Result URLs for one query, trying each engine until one answers
    ///
    /// An engine that answers with nothing counts as an answer; `Err` means
    /// no engine could be reached.
    async fn perform_web_search(&self, query: &str) -> Result<Vec<String>, SourceError> {
        let mut answered = false;
        for endpoint in &self.config.searxng_endpoints {
            self.pacer.until_ready().await;
            match self.search_searxng(endpoint, query).await {
                Ok(urls) if !urls.is_empty() => return Ok(urls),
                Ok(_) => {
                    answered = true;
                    tracing::debug!(endpoint = %endpoint, "SearXNG returned no video links");
                }
                Err(e) => tracing::debug!(endpoint = %endpoint, error = %e, "SearXNG request failed"),
            }
        }

        self.pacer.until_ready().await;
        match self.search_duckduckgo(query).await {
            Ok(urls) => Ok(urls),
            Err(e) if answered => {
                tracing::debug!(error = %e, "DuckDuckGo request failed");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn search_searxng(&self, endpoint: &str, query: &str) -> Result<Vec<String>, SourceError> {
        let response = self
            .http_client
            .get(endpoint)
            .query(&[("q", query), ("engines", "youtube"), ("language", "en"), ("format", "json")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Api(response.status().as_u16(), "SearXNG".to_string()));
        }

        let parsed: SearxResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("SearXNG response: {}", e)))?;
        Ok(filter_searx_results(parsed.results))
    }

    async fn search_duckduckgo(&self, query: &str) -> Result<Vec<String>, SourceError> {
        let response = self
            .http_client
            .get(&self.config.duckduckgo_url)
            .query(&[("q", query)])
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::ACCEPTED {
            return Err(SourceError::Api(status.as_u16(), "DuckDuckGo".to_string()));
        }

        Ok(parse_duckduckgo_links(&response.text().await?))
    }

    async fn fetch_noembed(&self, video_id: &str, watch_url: &str) -> Result<Option<VideoInfo>, SourceError> {
        let response = self
            .http_client
            .get(&self.config.noembed_url)
            .query(&[("url", watch_url)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Api(response.status().as_u16(), "noembed".to_string()));
        }

        let parsed: NoembedResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("noembed response: {}", e)))?;

        if let Some(error) = parsed.error {
            tracing::debug!(video_id = %video_id, error = %error, "noembed reported an error");
            return Ok(None);
        }

        Ok(Some(VideoInfo {
            video_id: video_id.to_string(),
            title: parsed.title,
            channel: parsed.author_name,
            duration: parsed.duration.max(0),
            thumbnail_url: parsed.thumbnail_url,
            view_count: None,
        }))
    }

    async fn fetch_oembed(&self, video_id: &str, watch_url: &str) -> Result<Option<VideoInfo>, SourceError> {
        let response = self
            .http_client
            .get(&self.config.oembed_url)
            .query(&[("url", watch_url), ("format", "json")])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SourceError::Api(status.as_u16(), "oEmbed".to_string()));
        }

        let parsed: OembedResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("oEmbed response: {}", e)))?;

        Ok(Some(VideoInfo {
            video_id: video_id.to_string(),
            title: parsed.title,
            channel: parsed.author_name,
            duration: 0,
            thumbnail_url: parsed.thumbnail_url,
            view_count: None,
        }))
    }
}

#[async_trait]
impl VideoMetadataFetcher for WebSearchClient {
    /// noembed first; oEmbed when noembed is unreachable or unparsable
    async fn fetch_video(&self, video_id: &str) -> Result<Option<VideoInfo>, SourceError> {
        let watch_url = format!("https://www.youtube.com/watch?v={}", video_id);
        match self.fetch_noembed(video_id, &watch_url).await {
            Ok(found) => Ok(found),
            Err(e) => {
                tracing::debug!(video_id = %video_id, error = %e, "noembed failed, falling back to oEmbed");
                self.fetch_oembed(video_id, &watch_url).await
            }
        }
    }
}

#[async_trait]
impl VideoCandidateSource for WebSearchClient {
    fn method(&self) -> MatchMethod {
        MatchMethod::WebSearch
    }

    fn is_available(&self) -> bool {
        self.config.enabled
    }

    async fn search_videos(&self, title: &str, artist: &str) -> Result<Vec<VideoInfo>, SourceError> {
        let title = normalize_title(title);
        let artist = normalize_artist(artist);
        let key = cache_key(&title, &artist, "");

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(&key).await {
                tracing::debug!(title = %title, artist = %artist, results = entry.results.len(), "Web search cache hit");
                return Ok(entry.results);
            }
        }

        let mut seen = HashSet::new();
        let mut video_ids = Vec::new();
        let mut answered = false;
        let mut last_error = None;

        for (i, query) in query_variations(&title, &artist).iter().enumerate() {
            match self.perform_web_search(query).await {
                Ok(urls) => {
                    answered = true;
                    for id in urls.iter().filter_map(|u| extract_video_id(u)) {
                        if seen.insert(id.clone()) {
                            video_ids.push(id);
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(variation = i + 1, query = %query, error = %e, "Query variation failed");
                    last_error = Some(e);
                }
            }

            if video_ids.len() >= ENOUGH_RESULTS {
                break;
            }
        }

        if !answered {
            if let Some(e) = last_error {
                tracing::warn!(title = %title, artist = %artist, error = %e, "Every web search query failed");
                return Err(e);
            }
        }

        let mut results = Vec::with_capacity(video_ids.len());
        let mut fetch_failures = 0;
        let mut fetch_error = None;
        for id in &video_ids {
            match self.fetch_video(id).await {
                Ok(Some(info)) => results.push(info),
                Ok(None) => tracing::debug!(video_id = %id, "Video metadata unavailable, dropping"),
                Err(e) => {
                    tracing::debug!(video_id = %id, error = %e, "Video metadata fetch failed, dropping");
                    fetch_failures += 1;
                    fetch_error = Some(e);
                }
            }
        }

        // Ids were found but no metadata endpoint could be reached
        if fetch_failures > 0 && fetch_failures == video_ids.len() {
            if let Some(e) = fetch_error {
                tracing::warn!(title = %title, artist = %artist, error = %e, "Every video metadata fetch failed");
                return Err(e);
            }
        }

        tracing::info!(title = %title, artist = %artist, found = results.len(), "Web search complete");

        if !results.is_empty() {
            if let Some(cache) = &self.cache {
                let entry = SearchCacheEntry {
                    query: format!("{} {}", title, artist),
                    results: results.clone(),
                    cached_at: chrono::Utc::now(),
                };
                if let Err(e) = cache.put(&key, &entry).await {
                    tracing::warn!(error = %e, "Failed to write web search cache");
                }
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_video_id_from_url_forms() {
        let id = "dQw4w9WgXcQ";
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=10",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "https://www.youtube.com/attribution_link?a=x&u=%2Fwatch%3Fv%3DdQw4w9WgXcQ%26feature%3Dshare",
        ] {
            assert_eq!(extract_video_id(url).as_deref(), Some(id), "{}", url);
        }
        assert_eq!(extract_video_id("https://example.com/watch?v=abc"), None);
    }

    #[test]
    fn test_video_id_validation() {
        assert!(is_valid_video_id("dQw4w9WgXcQ"));
        assert!(is_valid_video_id("a-b_c-d_e-f"));
        assert!(!is_valid_video_id("short"));
        assert!(!is_valid_video_id("dQw4w9WgXcQx"));
        assert!(!is_valid_video_id("dQw4w9WgX!Q"));
    }

    #[test]
    fn test_query_variations_order() {
        let q = query_variations("Song", "Band");
        assert_eq!(q[0], "\"Song Band\" YouTube Music");
        assert_eq!(q[3], "\"Band\" \"Song\"");
        assert_eq!(q.len(), 5);
    }

    #[test]
    fn test_searx_filter_drops_lyrics_and_non_watch_links() {
        let results = vec![
            SearxResult { url: "https://www.youtube.com/watch?v=aaaaaaaaaaa".into(), title: "Band - Song (Official Video)".into() },
            SearxResult { url: "https://www.youtube.com/watch?v=bbbbbbbbbbb".into(), title: "Band - Song Lyrics".into() },
            SearxResult { url: "https://example.com/song".into(), title: "Band - Song".into() },
            SearxResult { url: "https://www.youtube.com/watch?v=aaaaaaaaaaa".into(), title: "duplicate".into() },
        ];
        assert_eq!(filter_searx_results(results), vec!["https://www.youtube.com/watch?v=aaaaaaaaaaa".to_string()]);
    }

    #[test]
    fn test_parse_duckduckgo_links() {
        let html = r#"
            <a class="result__a" href="https://www.youtube.com/watch?v=aaaaaaaaaaa&amp;pp=x">A</a>
            <a href="https://youtu.be/bbbbbbbbbbb">B</a>
            <a href="https://www.youtube.com/watch?v=aaaaaaaaaaa">dup</a>
            <a href="https://vimeo.com/123">other</a>
        "#;
        assert_eq!(
            parse_duckduckgo_links(html),
            vec![
                "https://www.youtube.com/watch?v=aaaaaaaaaaa".to_string(),
                "https://youtu.be/bbbbbbbbbbb".to_string(),
            ]
        );
    }
}
