mod auth;
mod config;
mod controller;
mod logging;
mod model;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use config::EngineConfig;
use controller::{resolve_device, PlaybackOutcome, PlaybackRequest, PlaybackSequencer, PlaybackTimings, SyncEngine};
use model::{
    search_library, ApiFailure, ContainerMatch, FileSnapshotStore, MemorySnapshotStore, PlaybackApi,
    SearchSource, SnapshotCache, SpotifyClient, SyncPhase, SyncProgress, SyncReport,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Search every track across your Spotify playlists", long_about = None)]
struct Args {
    /// Spotify Web API access token (falls back to .cache/access_token)
    #[arg(long, env = "SPOTIFY_ACCESS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Directory holding cached playlist snapshots
    #[arg(long, env = "PLAYLIST_SEARCH_CACHE_DIR", default_value = config::DEFAULT_CACHE_DIR, global = true)]
    cache_dir: PathBuf,

    /// Keep snapshots in memory only for this invocation
    #[arg(long, global = true)]
    ephemeral_cache: bool,

    /// Cache size limit in bytes
    #[arg(long, env = "PLAYLIST_SEARCH_CACHE_QUOTA", default_value_t = config::DEFAULT_CACHE_QUOTA, global = true)]
    cache_quota: u64,

    /// Seconds to wait before retrying a rate-limited request
    #[arg(long, env = "PLAYLIST_SEARCH_COOLDOWN_SECS", default_value_t = config::DEFAULT_COOLDOWN_SECS, global = true)]
    cooldown_secs: u64,

    /// Directory for log files
    #[arg(long, env = "PLAYLIST_SEARCH_LOG_DIR", default_value = config::DEFAULT_LOG_DIR, global = true)]
    log_dir: PathBuf,

    /// Log filter, e.g. `debug` or `playlist_search=trace` (overrides RUST_LOG)
    #[arg(long, env = "PLAYLIST_SEARCH_LOG", global = true)]
    log_level: Option<String>,

    /// Web API base URL
    #[arg(long, env = "SPOTIFY_API_BASE", default_value = config::DEFAULT_API_BASE, global = true)]
    api_base: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync every playlist into the local cache
    Sync,
    /// Search tracks across all playlists
    Search {
        /// Text to look for in titles, artists and albums
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Play the Nth numbered match
        #[arg(long)]
        play: Option<usize>,

        /// Device id or name to play on (default: the active device)
        #[arg(long)]
        device: Option<String>,
    },
    /// List playback devices
    Devices,
    /// Drop every cached version of one playlist
    Forget {
        /// Spotify playlist id
        playlist_id: String,
    },
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            api_base: self.api_base.clone(),
            cooldown: Duration::from_secs(self.cooldown_secs),
            cache_dir: self.cache_dir.clone(),
            cache_quota_bytes: self.cache_quota,
            ephemeral_cache: self.ephemeral_cache,
            ..EngineConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_guard = match logging::init_logging(&args.log_dir, args.log_level.as_deref()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: Failed to initialize logging: {:#}", e);
            None
        }
    };

    tracing::info!("=== playlist-search starting ===");

    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) if e.downcast_ref::<ApiFailure>() == Some(&ApiFailure::Unauthorized) => {
            tracing::error!("Access token rejected");
            eprintln!("credential rejected: refresh the access token and run the command again");
            // exit skips destructors
            drop(log_guard);
            std::process::exit(2);
        }
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            Err(e)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = args.engine_config();
    let cache = open_cache(&config)?;
    let client = Arc::new(SpotifyClient::new(config.api_base.clone(), config.page_size));

    match args.command {
        Commands::Sync => {
            let credential = auth::load_credential(args.token, Path::new(auth::TOKEN_FILE))?;
            let engine = SyncEngine::new(client, cache, &config);
            let report = sync_with_progress(&engine, &credential).await?;
            print_report(&report);
        }
        Commands::Search { query, play, device } => {
            let credential = auth::load_credential(args.token, Path::new(auth::TOKEN_FILE))?;
            let query = query.join(" ");
            let engine = SyncEngine::new(client.clone(), cache, &config);
            let report = sync_with_progress(&engine, &credential).await?;
            if report.progress.phase != SyncPhase::Done {
                print_report(&report);
            }

            let remembered = engine.cache().remembered().await;
            let matches = search_library(&query, &report.live, remembered);
            print_matches(&query, &matches);

            if let Some(n) = play {
                let request = playable_match(&matches, n)
                    .with_context(|| format!("There is no playable match #{}", n))?;
                let devices = client.devices(&credential).await?;
                let device = resolve_device(&devices, device.as_deref())
                    .context("No playback device available. Start Spotify somewhere or pass --device")?;
                let request = PlaybackRequest::for_match(request.0, request.1, device.id.clone());

                let sequencer = PlaybackSequencer::new(client, PlaybackTimings::from(&config));
                match sequencer.play(&credential, &request).await? {
                    PlaybackOutcome::Confirmed => println!("Playing on {}", device.name),
                    PlaybackOutcome::Abandoned => println!("Could not confirm playback on {}", device.name),
                }
            }
        }
        Commands::Devices => {
            let credential = auth::load_credential(args.token, Path::new(auth::TOKEN_FILE))?;
            let devices = client.devices(&credential).await?;
            if devices.is_empty() {
                println!("No devices available");
            }
            for device in devices {
                let marker = if device.is_active { "*" } else { " " };
                println!("{} {}  {}", marker, device.id, device.name);
            }
        }
        Commands::Forget { playlist_id } => {
            let removed = cache
                .invalidate(&playlist_id)
                .await
                .with_context(|| format!("Failed to drop cached snapshots of {}", playlist_id))?;
            if removed {
                println!("Forgot cached snapshots of {}", playlist_id);
            } else {
                println!("Nothing cached for {}", playlist_id);
            }
        }
    }

    Ok(())
}

fn open_cache(config: &EngineConfig) -> Result<SnapshotCache> {
    if config.ephemeral_cache {
        tracing::debug!("Using in-memory snapshot cache");
        return Ok(SnapshotCache::new(MemorySnapshotStore::new(config.cache_quota_bytes)));
    }
    let store = FileSnapshotStore::open(&config.cache_dir, config.cache_quota_bytes)
        .with_context(|| format!("Failed to open cache directory {}", config.cache_dir.display()))?;
    Ok(SnapshotCache::new(store))
}

async fn sync_with_progress(
    engine: &SyncEngine<SpotifyClient>,
    credential: &auth::Credential,
) -> Result<SyncReport> {
    let printer = spawn_progress_printer(engine.subscribe());
    let result = engine.run(credential).await;
    printer.abort();
    eprintln!();
    Ok(result?)
}

fn spawn_progress_printer(mut progress: watch::Receiver<SyncProgress>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = *progress.borrow_and_update();
            eprint!(
                "\r{:?}: listed {}/{} playlists, loaded {}",
                p.phase, p.descriptors_listed, p.descriptors_total, p.containers_loaded
            );
        }
    })
}

fn print_report(report: &SyncReport) {
    let p = &report.progress;
    println!(
        "Synced {} of {} playlists ({} listed)",
        p.containers_loaded, p.descriptors_total, p.descriptors_listed
    );
    for failure in &report.failures {
        println!("  failed: {} ({}): {}", failure.name, failure.container_id, failure.reason);
    }
    if let Some(advisory) = &report.advisory {
        println!("  cache full, continued without saving: {}", advisory);
    }
    if let Some(error) = &report.listing_error {
        println!("  listing stopped: {}. Run sync again to start over.", error);
    }
}

/// The Nth (1-based) track match that can be played, numbered across live playlists
fn playable_match(matches: &[ContainerMatch], n: usize) -> Option<(&model::LiveContainer, &model::TrackMatch)> {
    matches
        .iter()
        .filter_map(|m| match &m.source {
            SearchSource::Live(live) => Some((live, &m.tracks)),
            SearchSource::Remembered(_) => None,
        })
        .flat_map(|(live, tracks)| tracks.iter().map(move |t| (live, t)))
        .nth(n.checked_sub(1)?)
}

fn print_matches(query: &str, matches: &[ContainerMatch]) {
    if matches.is_empty() {
        println!("No tracks match \"{}\"", query);
        return;
    }

    let mut number = 0;
    for m in matches {
        match &m.source {
            SearchSource::Live(_) => println!("{} ({})", m.source.name(), m.source.owner_id()),
            SearchSource::Remembered(r) => println!(
                "{} ({}) [remembered version from {}]",
                r.name,
                r.owner_id,
                r.remembered_at.format("%Y-%m-%d %H:%M")
            ),
        }
        for track in &m.tracks {
            let label = if m.source.is_playable() {
                number += 1;
                format!("#{:<3}", number)
            } else {
                "    ".to_string()
            };
            println!(
                "  {} {:>4}. {} - {} - {}",
                label,
                track.position + 1,
                track.item.title,
                track.item.artist_names.join(", "),
                track.item.album_name
            );
        }
    }
}
