//! Scripted video sources that count their calls

use async_trait::async_trait;
use platter_resolver::models::{MatchMethod, VideoInfo};
use platter_resolver::services::{VideoCandidateSource, VideoMetadataFetcher};
use platter_resolver::sources::{DurationSource, SourceError, TrackSearchResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn video(id: &str, title: &str, channel: &str, duration: i64) -> VideoInfo {
    VideoInfo {
        video_id: id.to_string(),
        title: title.to_string(),
        channel: channel.to_string(),
        duration,
        thumbnail_url: None,
        view_count: None,
    }
}

/// Candidate source returning canned results per track title
pub struct FakeVideoSource {
    method: MatchMethod,
    available: bool,
    fail: bool,
    results: Mutex<HashMap<String, Vec<VideoInfo>>>,
    calls: AtomicUsize,
}

impl FakeVideoSource {
    pub fn new(method: MatchMethod) -> Self {
        Self {
            method,
            available: true,
            fail: false,
            results: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every search returns a network error
    pub fn failing(method: MatchMethod) -> Self {
        Self {
            fail: true,
            ..Self::new(method)
        }
    }

    pub fn unavailable(method: MatchMethod) -> Self {
        Self {
            available: false,
            ..Self::new(method)
        }
    }

    pub fn with_results(self, title: &str, videos: Vec<VideoInfo>) -> Self {
        self.results.lock().unwrap().insert(title.to_string(), videos);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoCandidateSource for FakeVideoSource {
    fn method(&self) -> MatchMethod {
        self.method
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn search_videos(&self, title: &str, _artist: &str) -> Result<Vec<VideoInfo>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SourceError::Network("search engine unreachable".to_string()));
        }
        Ok(self.results.lock().unwrap().get(title).cloned().unwrap_or_default())
    }
}

/// Metadata lookups served from a fixed map
#[derive(Default)]
pub struct FakeMetadata {
    videos: HashMap<String, VideoInfo>,
}

impl FakeMetadata {
    pub fn with_video(mut self, info: VideoInfo) -> Self {
        self.videos.insert(info.video_id.clone(), info);
        self
    }
}

#[async_trait]
impl VideoMetadataFetcher for FakeMetadata {
    async fn fetch_video(&self, video_id: &str) -> Result<Option<VideoInfo>, SourceError> {
        Ok(self.videos.get(video_id).cloned())
    }
}

/// Duration source answering every lookup with the same length
pub struct FixedDurationSource {
    name: &'static str,
    duration: i64,
    confidence: f64,
    calls: AtomicUsize,
}

impl FixedDurationSource {
    pub fn new(name: &'static str, duration: i64, confidence: f64) -> Self {
        Self {
            name,
            duration,
            confidence,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurationSource for FixedDurationSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn rate_limit_remaining(&self) -> u32 {
        u32::MAX
    }

    async fn search_track(
        &self,
        title: &str,
        artist: &str,
        _album: Option<&str>,
    ) -> Result<Option<TrackSearchResult>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(TrackSearchResult {
            external_id: format!("{}:{}", self.name, title),
            external_url: String::new(),
            title: title.to_string(),
            artist: artist.to_string(),
            album: None,
            duration: self.duration,
            match_score: 0.95,
            confidence: self.confidence,
        }))
    }
}
