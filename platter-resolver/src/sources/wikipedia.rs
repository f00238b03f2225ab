//! Wikipedia album-article track listings
//!
//! Two phases: pick the album article from a full-text search, then read the
//! track listing out of the article's wikitext.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::rate_limiter::RateLimiter;
use super::text::string_similarity;
use super::{
    build_http_client, error_for_status, non_empty, require_title_artist, DurationSource,
    SourceError, TrackSearchResult, USER_AGENT_PRODUCT,
};

pub const WIKIPEDIA_BASE_URL: &str = "https://en.wikipedia.org/w/api.php";
const RATE_LIMIT_PER_MINUTE: u32 = 50;
const MIN_PAGE_SCORE: f64 = 50.0;
const MIN_TRACK_SCORE: f64 = 0.6;
const CONFIDENCE: f64 = 0.7;

static TRACK_LISTING_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{\{Track( ?listing|list)").expect("valid track listing regex"));

static TRACK_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\|\s*(title|length)\s*(\d+)\s*=\s*(.*)$").expect("valid track param regex")
});

static TABLE_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\|\s*\d+\.?\s*\|\|?\s*"?([^"|]+)"?\s*\|\|?\s*(\d+:\d+)"#)
        .expect("valid table row regex")
});

static TEMPLATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{[^}]+\}\}").expect("valid template regex"));

static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid br regex"));

#[derive(Debug, Deserialize)]
struct SearchResponse {
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    parse: Option<ParsedPage>,
}

#[derive(Debug, Deserialize)]
struct ParsedPage {
    wikitext: Option<Wikitext>,
}

#[derive(Debug, Deserialize)]
struct Wikitext {
    #[serde(rename = "*", default)]
    content: String,
}

/// One entry of an album track listing
#[derive(Debug, Clone, PartialEq)]
pub struct ListedTrack {
    pub position: usize,
    pub title: String,
    /// Seconds
    pub duration: i64,
}

/// Score a search hit title as the article for `album` by `artist`
pub fn score_page_title(page_title: &str, album: &str, artist: &str) -> f64 {
    let title = page_title.to_lowercase();
    let album = album.to_lowercase();
    let artist = artist.to_lowercase();
    let album_words: Vec<&str> = album.split_whitespace().collect();

    let is_album_page = title.contains("(album)") || title.contains(" album)");
    let exact = title == album
        || title.starts_with(&format!("{} (", album))
        || title.starts_with(&format!("{} - ", album));
    let all_words = album_words
        .iter()
        .filter(|w| w.len() > 2)
        .all(|w| title.contains(*w));

    let mut score = if exact && is_album_page {
        300.0
    } else if exact {
        200.0
    } else if all_words && is_album_page {
        200.0
    } else if is_album_page {
        100.0
    } else if all_words {
        50.0
    } else {
        album_words
            .iter()
            .filter(|w| w.len() > 3 && title.contains(*w))
            .map(|w| w.len() as f64)
            .sum()
    };

    if is_album_page && title.contains(&artist) {
        score += 20.0;
    }

    score
}

/// Extract every `{{Track listing}}` / `{{Tracklist}}` template, honouring nested braces
fn extract_templates(content: &str) -> Vec<&str> {
    let mut templates = Vec::new();
    let mut offset = 0;

    while let Some(found) = TRACK_LISTING_START.find(&content[offset..]) {
        let start = offset + found.start();
        let bytes = content.as_bytes();
        let mut depth = 0usize;
        let mut i = start;
        let mut end = None;

        while i + 1 < bytes.len() {
            if bytes[i] == b'{' && bytes[i + 1] == b'{' {
                depth += 1;
                i += 2;
            } else if bytes[i] == b'}' && bytes[i + 1] == b'}' {
                depth = depth.saturating_sub(1);
                i += 2;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            } else {
                i += 1;
            }
        }

        match end {
            Some(end) => {
                templates.push(&content[start..end]);
                offset = end;
            }
            None => {
                // Unterminated template: take the rest of the article
                templates.push(&content[start..]);
                break;
            }
        }
    }

    templates
}

/// "M:SS" to seconds; anything else is 0
pub fn parse_length(value: &str) -> i64 {
    let mut parts = value.trim().split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(s), None) => match (m.trim().parse::<i64>(), s.trim().parse::<i64>()) {
            (Ok(m), Ok(s)) => m * 60 + s,
            _ => 0,
        },
        _ => 0,
    }
}

/// Strip links, emphasis, templates and line breaks from a wikitext fragment
pub fn clean_wiki_markup(input: &str) -> String {
    let mut s = input.to_string();

    // Complete links: [[target|display]] or [[target]]
    loop {
        let (Some(start), Some(end)) = (s.find("[["), s.find("]]")) else {
            break;
        };
        if end <= start {
            break;
        }
        let inner = &s[start + 2..end];
        let display = inner.split_once('|').map_or(inner, |(_, shown)| shown).to_string();
        s = format!("{}{}{}", &s[..start], display, &s[end + 2..]);
    }

    // Link left open by a truncated value: "[[target|display"
    if let Some(start) = s.find("[[") {
        let rest = &s[start + 2..];
        let display = rest.split_once('|').map_or(rest, |(_, shown)| shown).to_string();
        s = format!("{}{}", &s[..start], display);
    }

    s = s.replace("'''", "").replace("''", "");
    s = TEMPLATE.replace_all(&s, "").to_string();
    s = LINE_BREAK.replace_all(&s, " ").to_string();
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Read the track listing from article wikitext
pub fn parse_track_listing(content: &str) -> Vec<ListedTrack> {
    let mut tracks = Vec::new();

    for template in extract_templates(content) {
        let mut titles: BTreeMap<usize, String> = BTreeMap::new();
        let mut lengths: BTreeMap<usize, String> = BTreeMap::new();

        for line in template.lines().map(str::trim) {
            let Some(caps) = TRACK_PARAM.captures(line) else {
                continue;
            };
            let Ok(position) = caps[2].parse::<usize>() else {
                continue;
            };
            let value = caps[3].trim().to_string();
            if caps[1].eq_ignore_ascii_case("title") {
                titles.insert(position, TEMPLATE.replace_all(&value, "").trim().to_string());
            } else {
                lengths.insert(position, value);
            }
        }

        for (position, title) in titles {
            let Some(length) = lengths.get(&position) else {
                continue;
            };
            let duration = parse_length(length);
            if duration > 0 {
                tracks.push(ListedTrack {
                    position,
                    title: clean_wiki_markup(&title),
                    duration,
                });
            }
        }
    }

    if tracks.is_empty() {
        for caps in TABLE_ROW.captures_iter(content) {
            let duration = parse_length(&caps[2]);
            if duration > 0 {
                tracks.push(ListedTrack {
                    position: tracks.len() + 1,
                    title: clean_wiki_markup(caps[1].trim()),
                    duration,
                });
            }
        }
    }

    tracks
}

/// Best listed track for `title`: prefix 1.0, substring 0.9, else similarity
pub fn find_matching_track<'a>(tracks: &'a [ListedTrack], title: &str) -> Option<(&'a ListedTrack, f64)> {
    let wanted = title.trim().to_lowercase();
    let mut best: Option<(&ListedTrack, f64)> = None;

    for track in tracks {
        let candidate = track.title.to_lowercase();
        let score = if candidate.starts_with(&wanted) {
            1.0
        } else if candidate.contains(&wanted) {
            0.9
        } else {
            string_similarity(title, &track.title)
        };

        if best.map_or(true, |(_, s)| score > s) {
            best = Some((track, score));
        }
    }

    best.filter(|(_, score)| *score >= MIN_TRACK_SCORE)
}

/// Wikipedia duration source (no credentials; needs an album name)
pub struct WikipediaClient {
    http_client: reqwest::Client,
    base_url: String,
    rate_limiter: RateLimiter,
}

impl WikipediaClient {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_base_url(WIKIPEDIA_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, SourceError> {
        Ok(Self {
            http_client: build_http_client(&format!("{} (Music Collection Manager)", USER_AGENT_PRODUCT))?,
            base_url: base_url.into(),
            rate_limiter: RateLimiter::per_minute(RATE_LIMIT_PER_MINUTE),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, params: &[(&str, &str)]) -> Result<T, SourceError> {
        self.rate_limiter.wait().await;

        let response = self.http_client.get(&self.base_url).query(params).send().await?;
        if !response.status().is_success() {
            return Err(error_for_status(response, &self.rate_limiter).await);
        }

        response.json().await.map_err(|e| SourceError::Parse(e.to_string()))
    }

    async fn find_album_page(&self, album: &str, artist: &str) -> Result<Option<String>, SourceError> {
        let search = format!("{} {}", album, artist);
        let response: SearchResponse = self
            .get_json(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", search.as_str()),
                ("format", "json"),
                ("srlimit", "10"),
            ])
            .await?;

        let hits = response.query.map(|q| q.search).unwrap_or_default();
        let mut best: Option<(f64, String)> = None;
        for hit in hits {
            let score = score_page_title(&hit.title, album, artist);
            if best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, hit.title));
            }
        }

        Ok(best.filter(|(score, _)| *score >= MIN_PAGE_SCORE).map(|(score, title)| {
            tracing::debug!(source = "wikipedia", page = %title, score, "Selected album page");
            title
        }))
    }

    async fn page_wikitext(&self, page: &str) -> Result<String, SourceError> {
        let response: ParseResponse = self
            .get_json(&[
                ("action", "parse"),
                ("page", page),
                ("prop", "wikitext"),
                ("format", "json"),
            ])
            .await?;

        Ok(response
            .parse
            .and_then(|p| p.wikitext)
            .map(|w| w.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl DurationSource for WikipediaClient {
    fn name(&self) -> &'static str {
        "wikipedia"
    }

    fn is_configured(&self) -> bool {
        true
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
        let Some(album) = non_empty(album) else {
            return Ok(None);
        };

        let Some(page) = self.find_album_page(album, artist).await? else {
            tracing::debug!(source = "wikipedia", album = %album, "No album page found");
            return Ok(None);
        };

        let content = self.page_wikitext(&page).await?;
        if content.is_empty() {
            return Ok(None);
        }

        let tracks = parse_track_listing(&content);
        let Some((track, match_score)) = find_matching_track(&tracks, title) else {
            tracing::debug!(
                source = "wikipedia",
                page = %page,
                listed = tracks.len(),
                title = %title,
                "No matching track in listing"
            );
            return Ok(None);
        };

        Ok(Some(TrackSearchResult {
            external_id: format!("wikipedia:{}", page),
            external_url: format!("https://en.wikipedia.org/wiki/{}", page.replace(' ', "_")),
            title: track.title.clone(),
            artist: artist.to_string(),
            album: Some(album.to_string()),
            duration: track.duration,
            match_score,
            confidence: CONFIDENCE,
        }))
    }
}
