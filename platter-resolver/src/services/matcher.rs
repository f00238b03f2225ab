//! Video candidate scoring
//!
//! Pure scoring of a candidate video against a catalog track: four
//! sub-scores (title, artist, duration, channel) combined with configurable
//! weights, plus a flat bonus for "official video/audio" titles.

use once_cell::sync::Lazy;
use platter_common::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{ScoreBreakdown, Track, VideoInfo};
use crate::sources::text::{normalize_artist, normalize_title, string_similarity};

const OFFICIAL_VIDEO_BONUS: f64 = 0.15;

static OFFICIAL_VIDEO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bofficial\s+(?:(?:music\s+)?(?:video|audio)|release)\b")
        .expect("valid official video regex")
});

static TITLE_DECORATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*[\[(]?\s*(?:official\s*)?(?:music\s*)?(?:video|audio|lyrics?|hd|hq|4k|1080p|720p|visuali[sz]er)\s*[\])]?\s*$",
    )
    .expect("valid title decoration regex")
});

static ARTIST_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)\s*[-–—:]\s*(.+)$").expect("valid separator regex"));

const OFFICIAL_CHANNEL_MARKERS: [&str; 5] = ["vevo", "official", " - topic", "records", "music"];

/// `[matcher]` section: thresholds, weights and duration tolerances (seconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub auto_match_threshold: f64,
    pub min_match_threshold: f64,
    pub title_weight: f64,
    pub artist_weight: f64,
    pub duration_weight: f64,
    pub channel_weight: f64,
    pub duration_perfect: i64,
    pub duration_excellent: i64,
    pub duration_good: i64,
    pub duration_acceptable: i64,
    pub duration_poor: i64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            auto_match_threshold: 0.85,
            min_match_threshold: 0.6,
            title_weight: 0.40,
            artist_weight: 0.30,
            duration_weight: 0.20,
            channel_weight: 0.10,
            duration_perfect: 3,
            duration_excellent: 10,
            duration_good: 30,
            duration_acceptable: 60,
            duration_poor: 120,
        }
    }
}

impl MatcherConfig {
    /// Reject configurations that break the threshold or weight invariants
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.min_match_threshold) || !in_unit(self.auto_match_threshold) {
            return Err(Error::Config("match thresholds must be within 0.0-1.0".to_string()));
        }
        if self.auto_match_threshold < self.min_match_threshold {
            return Err(Error::Config(format!(
                "auto_match_threshold ({}) must be >= min_match_threshold ({})",
                self.auto_match_threshold, self.min_match_threshold
            )));
        }

        let weights = [self.title_weight, self.artist_weight, self.duration_weight, self.channel_weight];
        if weights.iter().any(|w| *w < 0.0) {
            return Err(Error::Config("match weights must not be negative".to_string()));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(Error::Config(format!("match weights must sum to 1.0 (got {:.3})", sum)));
        }

        let tiers = [
            self.duration_perfect,
            self.duration_excellent,
            self.duration_good,
            self.duration_acceptable,
            self.duration_poor,
        ];
        if tiers.windows(2).any(|w| w[0] > w[1]) || tiers[0] < 0 {
            return Err(Error::Config("duration tolerances must be ascending and non-negative".to_string()));
        }

        Ok(())
    }
}

/// Strip decoration ("(Official Video)", "[HD]") and an "Artist - " prefix
pub fn normalize_video_title(title: &str) -> String {
    let stripped = TITLE_DECORATION.replace_all(title, "");
    let song = match ARTIST_SEPARATOR.captures(&stripped) {
        Some(caps) => caps[2].trim().to_string(),
        None => stripped.to_string(),
    };
    normalize_title(&song).trim().to_string()
}

fn is_official_channel(channel: &str) -> bool {
    let lower = channel.to_lowercase();
    OFFICIAL_CHANNEL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Scores candidates with one configuration
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Full breakdown for a candidate; durations in seconds, 0 when unknown
    pub fn score(
        &self,
        track_title: &str,
        track_artist: &str,
        track_duration: i64,
        video_title: &str,
        channel: &str,
        video_duration: i64,
    ) -> ScoreBreakdown {
        let title = self.title_score(track_title, video_title);
        let artist = self.artist_score(track_artist, video_title, channel);
        let duration = self.duration_score(track_duration, video_duration);
        let channel_score = self.channel_score(track_artist, channel);

        let bonus = if OFFICIAL_VIDEO.is_match(video_title) {
            OFFICIAL_VIDEO_BONUS
        } else {
            0.0
        };

        let weighted = title * self.config.title_weight
            + artist * self.config.artist_weight
            + duration * self.config.duration_weight
            + channel_score * self.config.channel_weight;

        ScoreBreakdown {
            composite: (weighted + bonus).clamp(0.0, 1.0),
            title,
            artist,
            duration,
            channel: channel_score,
        }
    }

    pub fn score_video(&self, track: &Track, video: &VideoInfo) -> ScoreBreakdown {
        self.score(
            &track.title,
            &track.artist,
            track.duration,
            &video.title,
            &video.channel,
            video.duration,
        )
    }

    pub fn title_score(&self, track_title: &str, video_title: &str) -> f64 {
        string_similarity(&normalize_title(track_title), &normalize_video_title(video_title))
    }

    pub fn artist_score(&self, track_artist: &str, video_title: &str, channel: &str) -> f64 {
        let artist = normalize_artist(track_artist);
        let artist_lower = artist.to_lowercase();
        let title_lower = video_title.to_lowercase();

        if !artist_lower.is_empty() && title_lower.contains(&artist_lower) {
            return 1.0;
        }

        let channel_similarity = string_similarity(&artist, channel);
        if channel_similarity > 0.7 {
            return channel_similarity;
        }

        if !artist_lower.is_empty() && channel.to_lowercase().contains(&artist_lower) {
            return 0.9;
        }

        let words: Vec<&str> = artist_lower.split_whitespace().collect();
        if !words.is_empty() {
            let matched = words
                .iter()
                .filter(|w| w.len() > 2 && title_lower.contains(*w))
                .count();
            let ratio = matched as f64 / words.len() as f64;
            if ratio > 0.5 {
                return 0.5 + ratio * 0.3;
            }
        }

        0.3
    }

    pub fn duration_score(&self, expected: i64, actual: i64) -> f64 {
        if expected <= 0 {
            return 0.5;
        }
        if actual <= 0 {
            return 0.3;
        }

        let diff = (expected - actual).abs();
        let c = &self.config;
        if diff <= c.duration_perfect {
            1.0
        } else if diff <= c.duration_excellent {
            0.9
        } else if diff <= c.duration_good {
            0.7
        } else if diff <= c.duration_acceptable {
            0.5
        } else if diff <= c.duration_poor {
            0.3
        } else {
            0.1
        }
    }

    pub fn channel_score(&self, track_artist: &str, channel: &str) -> f64 {
        let artist = normalize_artist(track_artist).to_lowercase();
        let channel = channel.trim().to_lowercase();

        let mut similarity = string_similarity(&artist, &channel);
        let contains_artist = !artist.is_empty() && channel.contains(&artist);
        if contains_artist {
            similarity = similarity.max(0.8);
        }

        if channel.ends_with("vevo") {
            if contains_artist {
                return (similarity + 0.2).min(1.0);
            }
            if similarity > 0.5 {
                return (similarity + 0.15).min(1.0);
            }
        }

        if is_official_channel(&channel) && similarity > 0.4 {
            return (similarity + 0.2).min(1.0);
        }

        if let Some(name) = channel.strip_suffix(" - topic") {
            let topic_similarity = string_similarity(&artist, name);
            if topic_similarity > similarity {
                return (topic_similarity + 0.1).min(1.0);
            }
        }

        similarity
    }

    pub fn is_auto_match(&self, score: &ScoreBreakdown) -> bool {
        score.composite >= self.config.auto_match_threshold
    }

    pub fn is_acceptable_match(&self, score: &ScoreBreakdown) -> bool {
        score.composite >= self.config.min_match_threshold
    }

    /// Acceptable but not good enough to apply unattended
    pub fn needs_review(&self, score: &ScoreBreakdown) -> bool {
        self.is_acceptable_match(score) && !self.is_auto_match(score)
    }
}
