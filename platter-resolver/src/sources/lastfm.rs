//! Last.fm track lookup
//!
//! `track.search` first; when the top hit carries no duration, fall back to
//! the exact `track.getInfo` endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::rate_limiter::RateLimiter;
use super::text::{normalize_title, string_similarity};
use super::{
    build_http_client, error_for_status, require_title_artist, DurationSource, SourceError,
    TrackSearchResult, USER_AGENT_PRODUCT,
};

pub const LASTFM_BASE_URL: &str = "http://ws.audioscrobbler.com/2.0";
const RATE_LIMIT_PER_MINUTE: u32 = 300;
/// Documented "Invalid parameters / track not found" code
const ERROR_NOT_FOUND: i64 = 6;

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: SearchResults,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResults {
    #[serde(default)]
    trackmatches: TrackMatches,
}

#[derive(Debug, Default, Deserialize)]
struct TrackMatches {
    #[serde(default)]
    track: Vec<SearchTrack>,
}

#[derive(Debug, Deserialize)]
struct SearchTrack {
    name: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    duration: Value,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    error: Option<i64>,
    message: Option<String>,
    track: Option<InfoTrack>,
}

#[derive(Debug, Deserialize)]
struct InfoTrack {
    #[serde(default)]
    name: String,
    artist: Option<InfoArtist>,
    #[serde(default)]
    duration: Value,
    #[serde(default)]
    url: String,
    album: Option<InfoAlbum>,
}

#[derive(Debug, Deserialize)]
struct InfoArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct InfoAlbum {
    title: String,
}

/// Intermediate hit before scoring
struct Hit {
    name: String,
    artist: String,
    url: String,
    album: Option<String>,
    duration_ms: i64,
}

/// Durations arrive as numbers or numeric strings (milliseconds)
fn parse_duration_ms(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Last.fm duration source (requires an API key)
pub struct LastFmClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter,
}

impl LastFmClient {
    pub fn new(api_key: Option<String>) -> Result<Self, SourceError> {
        Self::with_base_url(api_key, LASTFM_BASE_URL)
    }

    pub fn with_base_url(api_key: Option<String>, base_url: impl Into<String>) -> Result<Self, SourceError> {
        Ok(Self {
            http_client: build_http_client(&format!("{} (Music Collection Manager)", USER_AGENT_PRODUCT))?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            rate_limiter: RateLimiter::per_minute(RATE_LIMIT_PER_MINUTE),
        })
    }

    async fn call(&self, method: &str, title: &str, artist: &str, api_key: &str) -> Result<String, SourceError> {
        self.rate_limiter.wait().await;

        let response = self
            .http_client
            .get(format!("{}/", self.base_url))
            .query(&[
                ("method", method),
                ("track", title),
                ("artist", artist),
                ("api_key", api_key),
                ("format", "json"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_status(response, &self.rate_limiter).await);
        }

        Ok(response.text().await?)
    }

    async fn search(&self, title: &str, artist: &str, api_key: &str) -> Result<Option<Hit>, SourceError> {
        let body = self.call("track.search", title, artist, api_key).await?;

        // Error pages come back as HTML with a 200
        if !body.trim_start().starts_with('{') {
            tracing::warn!(source = "lastfm", title = %title, "Non-JSON search response, treating as not found");
            return Ok(None);
        }

        let parsed: SearchResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(source = "lastfm", title = %title, error = %e, "Unparsable search response");
                return Ok(None);
            }
        };

        let Some(first) = parsed.results.trackmatches.track.into_iter().next() else {
            return Ok(None);
        };

        let duration_ms = parse_duration_ms(&first.duration);
        if duration_ms == 0 {
            tracing::debug!(source = "lastfm", title = %title, "Search hit has no duration, trying track.getInfo");
            return self.get_info(title, artist, api_key).await;
        }

        Ok(Some(Hit {
            name: first.name,
            artist: first.artist,
            url: first.url,
            album: None,
            duration_ms,
        }))
    }

    async fn get_info(&self, title: &str, artist: &str, api_key: &str) -> Result<Option<Hit>, SourceError> {
        let body = self.call("track.getInfo", title, artist, api_key).await?;
        let parsed: InfoResponse =
            serde_json::from_str(&body).map_err(|e| SourceError::Parse(e.to_string()))?;

        match parsed.error {
            Some(ERROR_NOT_FOUND) => return Ok(None),
            Some(code) => {
                return Err(SourceError::Api(
                    200,
                    format!("Last.fm error {}: {}", code, parsed.message.unwrap_or_default()),
                ))
            }
            None => {}
        }

        let Some(track) = parsed.track.filter(|t| !t.name.is_empty()) else {
            return Ok(None);
        };

        Ok(Some(Hit {
            duration_ms: parse_duration_ms(&track.duration),
            name: track.name,
            artist: track.artist.map(|a| a.name).unwrap_or_default(),
            url: track.url,
            album: track.album.map(|a| a.title).filter(|t| !t.is_empty()),
        }))
    }
}

#[async_trait]
impl DurationSource for LastFmClient {
    fn name(&self) -> &'static str {
        "lastfm"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn rate_limit_remaining(&self) -> u32 {
        self.rate_limiter.remaining()
    }

    async fn search_track(
        &self,
        title: &str,
        artist: &str,
        _album: Option<&str>,
    ) -> Result<Option<TrackSearchResult>, SourceError> {
        require_title_artist(title, artist)?;

        let Some(api_key) = self.api_key.as_deref() else {
            tracing::debug!(source = "lastfm", "API key not configured, skipping");
            return Ok(None);
        };

        let Some(hit) = self.search(title, artist, api_key).await? else {
            return Ok(None);
        };

        let duration = hit.duration_ms / 1000;
        if duration <= 0 {
            return Ok(None);
        }

        let match_score = string_similarity(&normalize_title(title), &normalize_title(&hit.name));
        let confidence = if match_score > 0.8 { 0.8 } else { 0.6 };

        tracing::debug!(
            source = "lastfm",
            title = %hit.name,
            artist = %hit.artist,
            duration,
            match_score,
            "Found track"
        );

        Ok(Some(TrackSearchResult {
            external_id: format!("lastfm:{}:{}", hit.artist, hit.name),
            external_url: hit.url,
            title: hit.name,
            artist: hit.artist,
            album: hit.album,
            duration,
            match_score,
            confidence,
        }))
    }
}
