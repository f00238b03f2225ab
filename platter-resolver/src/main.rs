//! platter-resolver - duration consensus and video matching for the Platter catalog
//!
//! Command-line front-end over the [`platter_resolver::Engine`] services.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use platter_common::config::{
    default_config_path, resolve_root_folder, write_toml_config, RootFolderInitializer, CONFIG_FILE_NAME,
    ROOT_FOLDER_ENV,
};
use platter_common::events::{CatalogEvent, EventBus};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::info;

use platter_resolver::config::PlatterToml;
use platter_resolver::models::JobKind;
use platter_resolver::Engine;

/// Command-line arguments for platter-resolver
#[derive(Parser, Debug)]
#[command(name = "platter-resolver")]
#[command(about = "Resolve missing track durations and match tracks to videos")]
#[command(version)]
struct Args {
    /// Root folder holding the catalog database and caches
    #[arg(short, long, env = ROOT_FOLDER_ENV)]
    root_folder: Option<String>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum JobArg {
    Duration,
    Matching,
}

impl From<JobArg> for JobKind {
    fn from(job: JobArg) -> Self {
        match job {
            JobArg::Duration => JobKind::Duration,
            JobArg::Matching => JobKind::Matching,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve one track's duration
    Resolve { track_id: i64 },
    /// Resolve every track of an album that lacks a duration
    ResolveAlbum { album_id: i64 },
    /// Set a track's duration by hand (seconds)
    SetDuration {
        track_id: i64,
        seconds: i64,
        #[arg(long)]
        reviewer: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Approve a resolution's suggested duration
    Approve {
        resolution_id: i64,
        #[arg(long)]
        reviewer: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Reject a resolution
    Reject {
        resolution_id: i64,
        #[arg(long)]
        reviewer: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Write a resolved duration that was not auto-applied
    Apply { resolution_id: i64 },
    /// List resolutions waiting for review
    Pending,
    /// Match one track to a video
    Match {
        track_id: i64,
        /// Replace an existing match
        #[arg(long)]
        force: bool,
    },
    /// Match every track of a playlist
    MatchPlaylist { playlist_id: i64 },
    /// Show a track's match and review candidates
    ShowMatch { track_id: i64 },
    /// Promote a review candidate to the track's match
    SelectCandidate { track_id: i64, candidate_id: i64 },
    /// Match a track to a video URL or id
    SetMatch { track_id: i64, reference: String },
    /// Record that no video exists for a track
    MarkUnavailable { track_id: i64 },
    /// Run a bulk job in the foreground (Ctrl+C stops it)
    Bulk {
        #[arg(value_enum)]
        job: JobArg,
    },
    /// Show the last checkpoint of a bulk job
    Progress {
        #[arg(value_enum)]
        job: JobArg,
    },
    /// Show lookup cache statistics
    CacheStats,
    /// Remove every lookup cache entry
    ClearCache,
    /// Write the current configuration (defaults included) to the config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Root folder: CLI → env → TOML → OS default
    let config_path = args.config.clone().or_else(default_config_path);
    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV, config_path.as_deref());
    let config_path = config_path.unwrap_or_else(|| root_folder.join(CONFIG_FILE_NAME));
    let config = PlatterToml::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    // RUST_LOG overrides the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting platter-resolver {}", env!("CARGO_PKG_VERSION"));
    info!("Root folder: {}", root_folder.display());

    if let Command::InitConfig { force } = args.command {
        if config_path.exists() && !force {
            anyhow::bail!("{} already exists (use --force to overwrite)", config_path.display());
        }
        write_toml_config(&config, &config_path)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let pool = platter_resolver::db::init_database_pool(&db_path)
        .await
        .context("Failed to open catalog database")?;

    let event_bus = EventBus::new(100);
    let shutdown = CancellationToken::new();
    let engine = Engine::build(pool, &config, &initializer.cache_path(), event_bus, shutdown.clone())
        .await
        .context("Failed to build engine")?;

    run_command(&engine, args.command, &shutdown).await?;

    shutdown.cancel();
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C; long-running commands stop at the next track
fn cancel_on_interrupt(shutdown: &CancellationToken) {
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current track");
            token.cancel();
        }
    });
}

async fn run_command(engine: &Engine, command: Command, shutdown: &CancellationToken) -> Result<()> {
    match command {
        Command::Resolve { track_id } => print_json(&engine.resolver.resolve_track(track_id).await?),
        Command::ResolveAlbum { album_id } => print_json(&engine.resolver.resolve_album(album_id).await?),
        Command::SetDuration {
            track_id,
            seconds,
            reviewer,
            notes,
        } => print_json(
            &engine
                .resolver
                .set_manual_duration(track_id, seconds, reviewer.as_deref(), notes.as_deref())
                .await?,
        ),
        Command::Approve {
            resolution_id,
            reviewer,
            notes,
        } => print_json(
            &engine
                .resolver
                .approve(resolution_id, reviewer.as_deref(), notes.as_deref())
                .await?,
        ),
        Command::Reject {
            resolution_id,
            reviewer,
            notes,
        } => print_json(
            &engine
                .resolver
                .reject(resolution_id, reviewer.as_deref(), notes.as_deref())
                .await?,
        ),
        Command::Apply { resolution_id } => print_json(&engine.resolver.apply(resolution_id).await?),
        Command::Pending => print_json(&engine.resolver.list_pending().await?),
        Command::Match { track_id, force } => print_json(&engine.pipeline.match_track(track_id, force).await?),
        Command::MatchPlaylist { playlist_id } => {
            cancel_on_interrupt(shutdown);
            print_json(&engine.pipeline.match_playlist(playlist_id, shutdown).await?)
        }
        Command::ShowMatch { track_id } => {
            let current = engine.pipeline.get_match(track_id).await?;
            let candidates = engine.pipeline.get_candidates(track_id).await?;
            print_json(&serde_json::json!({ "match": current, "candidates": candidates }))
        }
        Command::SelectCandidate {
            track_id,
            candidate_id,
        } => print_json(&engine.pipeline.select_candidate(track_id, candidate_id).await?),
        Command::SetMatch { track_id, reference } => {
            print_json(&engine.pipeline.set_manual_match(track_id, &reference).await?)
        }
        Command::MarkUnavailable { track_id } => print_json(&engine.pipeline.mark_unavailable(track_id).await?),
        Command::Bulk { job } => {
            cancel_on_interrupt(shutdown);
            run_bulk(engine, job.into()).await
        }
        Command::Progress { job } => print_json(&engine.jobs.progress(job.into()).await?),
        Command::CacheStats => print_json(&engine.cache_stats().await?),
        Command::ClearCache => {
            let removed = engine.clear_cache().await?;
            println!("Removed {} cache entries", removed);
            Ok(())
        }
        // Handled before the engine is built
        Command::InitConfig { .. } => Ok(()),
    }
}

/// Start a bulk job and report progress until it ends or is stopped
async fn run_bulk(engine: &Engine, job: JobKind) -> Result<()> {
    let mut events = engine.event_bus.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            match event {
                CatalogEvent::BulkProgress {
                    processed,
                    total,
                    current_track,
                    ..
                } => info!(processed, total, current = current_track.as_deref().unwrap_or("-"), "Progress"),
                CatalogEvent::BulkStatusChanged {
                    job,
                    old_status,
                    new_status,
                    ..
                } => info!(job = %job, "Status {} -> {}", old_status, new_status),
                _ => {}
            }
        }
    });

    engine.jobs.start(job).await?;
    let result = engine.jobs.wait(job).await;

    reporter.abort();
    print_json(&result?)
}
