//! MusicBrainz recording search (Lucene query syntax)

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;

use super::rate_limiter::RateLimiter;
use super::text::{calculate_match_score, normalize_artist, string_similarity};
use super::{
    build_http_client, error_for_status, non_empty, require_title_artist, DurationSource,
    SourceError, TrackSearchResult, USER_AGENT_PRODUCT,
};

pub const MUSICBRAINZ_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const RATE_LIMIT_PER_MINUTE: u32 = 50;
const SEARCH_LIMIT: u32 = 5;
const MIN_MATCH_SCORE: f64 = 0.5;
const ARTIST_EXACT_BONUS: f64 = 0.1;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
struct Recording {
    id: String,
    #[serde(default)]
    score: u32,
    title: String,
    /// Milliseconds
    length: Option<u64>,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    releases: Vec<Release>,
}

#[derive(Debug, Deserialize)]
struct ArtistCredit {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    title: String,
}

/// Escape Lucene special characters
pub fn escape_lucene(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '+' | '-' | '!' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '"' | '~' | '*' | '?'
            | ':' | '\\' | '/' => {
                out.push('\\');
                out.push(c);
            }
            '&' | '|' if chars.peek() == Some(&c) => {
                chars.next();
                out.push('\\');
                out.push(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// `recording:"…" AND artist:"…" [AND release:"…"]`
pub fn build_query(title: &str, artist: &str, album: Option<&str>) -> String {
    let mut parts = vec![
        format!("recording:\"{}\"", escape_lucene(title)),
        format!("artist:\"{}\"", escape_lucene(artist)),
    ];
    if let Some(album) = album {
        parts.push(format!("release:\"{}\"", escape_lucene(album)));
    }
    parts.join(" AND ")
}

/// MusicBrainz duration source
///
/// Configured only when a contact address is available for the User-Agent
/// (MusicBrainz etiquette).
pub struct MusicBrainzClient {
    http_client: reqwest::Client,
    base_url: String,
    contact_email: Option<String>,
    rate_limiter: RateLimiter,
}

impl MusicBrainzClient {
    pub fn new(contact_email: Option<String>) -> Result<Self, SourceError> {
        Self::with_base_url(contact_email, MUSICBRAINZ_BASE_URL)
    }

    pub fn with_base_url(
        contact_email: Option<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let contact_email = contact_email.filter(|c| !c.trim().is_empty());
        let user_agent = format!(
            "{} ({})",
            USER_AGENT_PRODUCT,
            contact_email.as_deref().unwrap_or("unconfigured")
        );

        Ok(Self {
            http_client: build_http_client(&user_agent)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            contact_email,
            rate_limiter: RateLimiter::per_minute(RATE_LIMIT_PER_MINUTE),
        })
    }

    fn find_best_match(
        recordings: Vec<Recording>,
        title: &str,
        artist: &str,
        album: Option<&str>,
    ) -> Option<TrackSearchResult> {
        let mut best: Option<(f64, TrackSearchResult)> = None;

        for rec in recordings {
            let length_ms = match rec.length {
                Some(ms) if ms > 0 => ms,
                _ => continue,
            };

            let artist_name = rec
                .artist_credit
                .first()
                .map(|a| a.name.clone())
                .unwrap_or_default();
            let album_name = rec.releases.first().map(|r| r.title.clone());

            let mut match_score = calculate_match_score(title, artist, &rec.title, &artist_name);
            if let (Some(wanted), Some(found)) = (album, album_name.as_deref()) {
                match_score = match_score * 0.7 + string_similarity(wanted, found) * 0.3;
            }

            let service_score = f64::from(rec.score.min(100)) / 100.0;
            let mut ranking = match_score * 0.6 + service_score * 0.4;
            if normalize_artist(artist).eq_ignore_ascii_case(&normalize_artist(&artist_name)) {
                ranking += ARTIST_EXACT_BONUS;
            }

            if best.as_ref().map_or(true, |(score, _)| ranking > *score) {
                best = Some((
                    ranking,
                    TrackSearchResult {
                        external_url: format!("https://musicbrainz.org/recording/{}", rec.id),
                        external_id: rec.id,
                        title: rec.title,
                        artist: artist_name,
                        album: album_name,
                        duration: (length_ms / 1000) as i64,
                        match_score,
                        confidence: service_score,
                    },
                ));
            }
        }

        best.map(|(_, result)| result)
            .filter(|result| result.match_score >= MIN_MATCH_SCORE)
    }
}

#[async_trait]
impl DurationSource for MusicBrainzClient {
    fn name(&self) -> &'static str {
        "musicbrainz"
    }

    fn is_configured(&self) -> bool {
        self.contact_email.is_some()
    }

    fn rate_limit_remaining(&self) -> u32 {
        self.rate_limiter.remaining()
    }

    async fn search_track(
        &self,
        title: &str,
        artist: &str,
        album: Option<&str>,
    ) -> Result<Option<TrackSearchResult>, SourceError> {
        require_title_artist(title, artist)?;
        let album = non_empty(album);
        let query = build_query(title, artist, album);

        self.rate_limiter.wait().await;

        let started = Instant::now();
        let limit = SEARCH_LIMIT.to_string();
        let response = self
            .http_client
            .get(format!("{}/recording", self.base_url))
            .query(&[("query", query.as_str()), ("fmt", "json"), ("limit", limit.as_str())])
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_for_status(response, &self.rate_limiter).await);
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;

        tracing::debug!(
            source = "musicbrainz",
            title = %title,
            artist = %artist,
            recordings = body.recordings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Recording search complete"
        );

        Ok(Self::find_best_match(body.recordings, title, artist, album))
    }
}
