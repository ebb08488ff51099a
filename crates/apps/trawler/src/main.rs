//! Trawler - incremental subreddit poller
//!
//! Tracks a set of subreddits, stores every post once, and keeps each store
//! current by fetching only posts newer than what is already on disk.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use posts::storage::RecordStore;
use posts::{
    FileCredentialStore, ListingMode, PasswordGrantIssuer, RedditClient, ShutdownSignal,
    SqliteRecordStore, SyncLoop, SyncSettings, TokenManager,
};

#[derive(Parser, Debug)]
#[command(name = "trawler", version, about = "Incremental subreddit poller")]
struct Cli {
    /// Credentials file (defaults to ~/.config/trawler/credentials.json)
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    /// Settings file (defaults to ~/.config/trawler/trawler.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll subreddits and store new posts
    Sync(SyncArgs),

    /// Search subreddit names by prefix
    Search {
        prefix: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show what is stored for each subreddit
    Status {
        /// Subreddits to report on (defaults to the configured list)
        collections: Vec<String>,

        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct SyncArgs {
    /// Subreddits to track (defaults to the configured list)
    collections: Vec<String>,

    /// Listing to poll: new, hot, rising, or top
    #[arg(long)]
    mode: Option<ListingMode>,

    /// Seconds between rounds
    #[arg(long)]
    interval: Option<u64>,

    /// Where per-subreddit databases are kept
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run a single round and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.settings {
        Some(path) => SyncSettings::from_file(path)?,
        None => SyncSettings::load()?,
    };

    match cli.command {
        Command::Sync(args) => {
            let client = build_client(cli.credentials)?;
            sync(client, settings, args).await
        }
        Command::Search { prefix, limit } => {
            let client = build_client(cli.credentials)?;
            let names = tokio::task::spawn_blocking(move || client.search_collections(&prefix, limit))
                .await??;
            for name in names {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Status {
            collections,
            data_dir,
        } => status(settings, collections, data_dir),
    }
}

fn build_client(credentials: Option<PathBuf>) -> Result<RedditClient> {
    let store = match credentials {
        Some(path) => FileCredentialStore::new(path),
        None => FileCredentialStore::default_location()?,
    };
    info!("Loading credentials from {}", store.path().display());

    let auth = TokenManager::from_store(Box::new(store), Box::new(PasswordGrantIssuer::new()))
        .context("Failed to load credentials")?;
    Ok(RedditClient::new(auth))
}

async fn sync(client: RedditClient, mut settings: SyncSettings, args: SyncArgs) -> Result<()> {
    if !args.collections.is_empty() {
        settings.collections = args.collections;
    }
    if let Some(mode) = args.mode {
        settings.mode = mode;
    }
    if let Some(secs) = args.interval {
        settings.round_interval_secs = secs;
    }
    if args.data_dir.is_some() {
        settings.data_dir = args.data_dir;
    }
    if settings.collections.is_empty() {
        bail!("No subreddits to track. Pass them as arguments or list them in the settings file.");
    }

    let data_dir = settings.resolve_data_dir()?;
    let store = SqliteRecordStore::new(&data_dir)?;
    info!(
        "Tracking {} subreddits ({}), storing in {}",
        settings.collections.len(),
        settings.mode,
        data_dir.display()
    );

    let shutdown = ShutdownSignal::new();
    let once = args.once;
    let worker_signal = shutdown.clone();

    let worker = tokio::task::spawn_blocking(move || {
        let mut sync = SyncLoop::new(
            &client,
            &client,
            &store,
            &worker_signal,
            settings.sync_options(),
        );
        for name in &settings.collections {
            if !sync.track(name.clone()) {
                warn!("r/{} listed twice, tracking once", name);
            }
        }

        if once {
            let report = sync.run_round();
            for c in &report.collections {
                println!("{:<22} fetched {:>5}  {:?}", c.name, c.fetched, c.outcome);
            }
        } else {
            sync.run(&worker_signal);
        }
    });

    let mut worker = worker;
    tokio::select! {
        result = &mut worker => {
            result.context("Sync worker panicked")?;
            return Ok(());
        }
        _ = shutdown_requested() => {
            info!("Shutdown requested, finishing current request");
            shutdown.trigger();
        }
    }

    worker.await.context("Sync worker panicked")?;
    info!("Stopped cleanly");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_requested() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn status(
    settings: SyncSettings,
    collections: Vec<String>,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let data_dir = match data_dir {
        Some(dir) => dir,
        None => settings.resolve_data_dir()?,
    };
    let collections = if collections.is_empty() {
        settings.collections
    } else {
        collections
    };

    let store = SqliteRecordStore::new(&data_dir)?;
    for name in &collections {
        if !store.exists(name)? {
            println!("{:<22} not stored", name);
            continue;
        }
        let records = store.load(name)?;
        let latest = records
            .first()
            .map(|r| r.created_utc.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<22} {:>7} posts  newest {}", name, records.len(), latest);
    }
    Ok(())
}
