//! platter-resolver library
//!
//! Duration consensus and video matching for the Platter catalog. [`Engine`]
//! wires the source clients, caches and services together from a loaded
//! [`config::PlatterToml`]; front-ends drive it through its public services.

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod sources;
pub mod utils;

use platter_common::events::EventBus;
use platter_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{PlatterToml, ResolvedSecrets};
use crate::services::{
    BulkJobs, ConsensusResolver, DurationProcessor, MatchPipeline, MatchProcessor, Matcher,
    VideoCandidateSource, VideoMetadataFetcher,
};
use crate::sources::cache::CacheStats;
use crate::sources::{
    ApiCredentials, DurationCache, DurationSource, LastFmClient, MusicBrainzClient, SearchCache,
    SourceRegistry, VideoApiClient, WebSearchClient, WikipediaClient, YouTubeDurationClient,
};

/// Statistics for both lookup caches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCacheStats {
    pub durations: CacheStats,
    pub searches: CacheStats,
}

/// Caches opened under one directory
#[derive(Clone, Default)]
pub struct Caches {
    pub durations: Option<Arc<DurationCache>>,
    pub searches: Option<Arc<SearchCache>>,
}

impl Caches {
    pub fn open(dir: &Path, ttl_days: i64) -> Result<Self> {
        let ttl = chrono::Duration::days(ttl_days);
        Ok(Self {
            durations: Some(Arc::new(DurationCache::open(dir.join("durations"), ttl)?)),
            searches: Some(Arc::new(SearchCache::open(dir.join("search"), ttl)?)),
        })
    }
}

/// Duration sources in query order: free sources first, the quota-metered one last
pub fn build_registry(secrets: &ResolvedSecrets, caches: &Caches) -> Result<SourceRegistry> {
    let sources: Vec<Arc<dyn DurationSource>> = vec![
        Arc::new(MusicBrainzClient::new(secrets.musicbrainz_contact.clone())?),
        Arc::new(WikipediaClient::new()?),
        Arc::new(LastFmClient::new(secrets.lastfm_api_key.clone())?),
        Arc::new(YouTubeDurationClient::new(
            secrets.youtube_api_key.clone(),
            caches.durations.clone(),
        )?),
    ];

    for source in &sources {
        tracing::info!(source = source.name(), configured = source.is_configured(), "Duration source registered");
    }
    Ok(sources)
}

/// Fully wired resolution and matching engine
pub struct Engine {
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub resolver: ConsensusResolver,
    pub pipeline: MatchPipeline,
    pub jobs: BulkJobs,
    caches: Caches,
}

impl Engine {
    /// Build every component; `cache_dir` is used when caching is enabled
    pub async fn build(
        pool: SqlitePool,
        config: &PlatterToml,
        cache_dir: &Path,
        event_bus: EventBus,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let secrets = ResolvedSecrets::load(&pool, &config.sources).await?;

        let caches = if config.cache.enabled {
            let dir = config.cache.dir.as_deref().unwrap_or(cache_dir);
            Caches::open(dir, config.cache.ttl_days)?
        } else {
            tracing::info!("Lookup caches disabled");
            Caches::default()
        };

        let registry = build_registry(&secrets, &caches)?;
        let resolver = ConsensusResolver::new(pool.clone(), registry, config.consensus.clone(), event_bus.clone());

        let web_search = Arc::new(WebSearchClient::new(config.web_search.clone(), caches.searches.clone())?);
        let credentials =
            ApiCredentials::from_parts(secrets.youtube_api_key.clone(), secrets.youtube_oauth_token.clone());
        let api = Arc::new(VideoApiClient::new(credentials)?);

        // Authenticated metadata when available, oEmbed otherwise
        let metadata: Arc<dyn VideoMetadataFetcher> = if api.is_available() {
            api.clone()
        } else {
            web_search.clone()
        };

        let pipeline = MatchPipeline::new(
            pool.clone(),
            Matcher::new(config.matcher.clone()),
            web_search,
            Some(api as Arc<dyn VideoCandidateSource>),
            metadata,
            config.sources.video_api_fallback,
            event_bus.clone(),
        );

        let mut jobs = BulkJobs::new(pool.clone(), config.worker.clone(), event_bus.clone(), shutdown);
        jobs.register(Arc::new(DurationProcessor::new(pool.clone(), resolver.clone())));
        jobs.register(Arc::new(MatchProcessor::new(pool.clone(), pipeline.clone())));

        Ok(Self {
            pool,
            event_bus,
            resolver,
            pipeline,
            jobs,
            caches,
        })
    }

    /// Remove every cache entry; returns the number removed
    pub async fn clear_cache(&self) -> Result<usize> {
        let mut removed = 0;
        if let Some(cache) = &self.caches.durations {
            removed += cache.clear().await?;
        }
        if let Some(cache) = &self.caches.searches {
            removed += cache.clear().await?;
        }
        tracing::info!(removed, "Lookup caches cleared");
        Ok(removed)
    }

    pub async fn cache_stats(&self) -> Result<EngineCacheStats> {
        let mut stats = EngineCacheStats::default();
        if let Some(cache) = &self.caches.durations {
            stats.durations = cache.stats().await?;
        }
        if let Some(cache) = &self.caches.searches {
            stats.searches = cache.stats().await?;
        }
        Ok(stats)
    }

    pub fn caching_enabled(&self) -> bool {
        self.caches.durations.is_some()
    }
}

