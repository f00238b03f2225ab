//! Configuration for platter-resolver
//!
//! Tunables come from `platter.toml`. Credentials are resolved per key with
//! Database → ENV → TOML priority; a key set in more than one tier logs a
//! warning and the highest tier wins.

use platter_common::config::{load_toml_config, LoggingConfig};
use platter_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::db::settings;
use crate::services::{ConsensusConfig, MatcherConfig, WorkerConfig};
use crate::sources::WebSearchConfig;

/// `[sources]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Contact address sent in the MusicBrainz User-Agent
    pub musicbrainz_contact: Option<String>,
    pub lastfm_api_key: Option<String>,
    pub youtube_api_key: Option<String>,
    pub youtube_oauth_token: Option<String>,
    /// Query the authenticated video API when web search finds nothing acceptable
    pub video_api_fallback: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            musicbrainz_contact: None,
            lastfm_api_key: None,
            youtube_api_key: None,
            youtube_oauth_token: None,
            video_api_fallback: true,
        }
    }
}

/// `[cache]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_days: i64,
    /// Defaults to `<root>/cache`
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_days: crate::sources::cache::DEFAULT_TTL_DAYS,
            dir: None,
        }
    }
}

/// Contents of `platter.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatterToml {
    pub root_folder: Option<String>,
    pub logging: LoggingConfig,
    pub sources: SourcesConfig,
    pub consensus: ConsensusConfig,
    pub matcher: MatcherConfig,
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
    pub web_search: WebSearchConfig,
}

impl PlatterToml {
    /// Load and validate; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_toml_config(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.consensus.validate()?;
        self.matcher.validate()?;
        if self.cache.ttl_days <= 0 {
            return Err(Error::Config("cache ttl_days must be positive".to_string()));
        }
        Ok(())
    }
}

/// One credential and where it may be configured
#[derive(Debug, Clone, Copy)]
pub struct SecretSpec {
    /// `settings` table key
    pub setting_key: &'static str,
    pub env_var: &'static str,
}

pub const MUSICBRAINZ_CONTACT: SecretSpec = SecretSpec {
    setting_key: "musicbrainz_contact",
    env_var: "PLATTER_MUSICBRAINZ_CONTACT",
};
pub const LASTFM_API_KEY: SecretSpec = SecretSpec {
    setting_key: "lastfm_api_key",
    env_var: "PLATTER_LASTFM_API_KEY",
};
pub const YOUTUBE_API_KEY: SecretSpec = SecretSpec {
    setting_key: "youtube_api_key",
    env_var: "PLATTER_YOUTUBE_API_KEY",
};
pub const YOUTUBE_OAUTH_TOKEN: SecretSpec = SecretSpec {
    setting_key: "youtube_oauth_token",
    env_var: "PLATTER_YOUTUBE_OAUTH_TOKEN",
};

/// Non-empty, non-whitespace
pub fn is_valid_secret(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Resolve one credential; `Ok(None)` when no tier sets it
pub async fn resolve_secret(pool: &SqlitePool, spec: SecretSpec, toml_value: Option<&str>) -> Result<Option<String>> {
    let db_value = settings::get_setting(pool, spec.setting_key)
        .await?
        .filter(|v| is_valid_secret(v));
    let env_value = std::env::var(spec.env_var).ok().filter(|v| is_valid_secret(v));
    let toml_value = toml_value.filter(|v| is_valid_secret(v)).map(str::to_string);

    let tiers: Vec<&str> = [
        db_value.as_ref().map(|_| "database"),
        env_value.as_ref().map(|_| "environment"),
        toml_value.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if tiers.len() > 1 {
        warn!(
            key = spec.setting_key,
            "Found in multiple sources: {}. Using {} (highest priority).",
            tiers.join(", "),
            tiers[0]
        );
    }

    match tiers.first() {
        Some(tier) => info!(key = spec.setting_key, "Loaded from {}", tier),
        None => tracing::debug!(key = spec.setting_key, "Not configured"),
    }

    Ok(db_value.or(env_value).or(toml_value))
}

/// Every credential the sources need
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSecrets {
    pub musicbrainz_contact: Option<String>,
    pub lastfm_api_key: Option<String>,
    pub youtube_api_key: Option<String>,
    pub youtube_oauth_token: Option<String>,
}

impl ResolvedSecrets {
    pub async fn load(pool: &SqlitePool, sources: &SourcesConfig) -> Result<Self> {
        Ok(Self {
            musicbrainz_contact: resolve_secret(pool, MUSICBRAINZ_CONTACT, sources.musicbrainz_contact.as_deref())
                .await?,
            lastfm_api_key: resolve_secret(pool, LASTFM_API_KEY, sources.lastfm_api_key.as_deref()).await?,
            youtube_api_key: resolve_secret(pool, YOUTUBE_API_KEY, sources.youtube_api_key.as_deref()).await?,
            youtube_oauth_token: resolve_secret(pool, YOUTUBE_OAUTH_TOKEN, sources.youtube_oauth_token.as_deref())
                .await?,
        })
    }
}
