//! skycast-sync - Mirror a web feed onto a Bluesky account
//!
//! Runs one synchronization pass, or keeps running every `interval` seconds
//! with `--watch` until SIGINT/SIGTERM.

use clap::Parser;
use libskycast::logging::{LogFormat, LoggingConfig};
use libskycast::platforms::bluesky::BlueskyClient;
use libskycast::{
    Config, FileCursorStore, HttpFeedSource, HttpMediaFetcher, PostingGate, Shutdown,
    SkycastError, SyncSettings, Synchronizer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "skycast-sync")]
#[command(version)]
#[command(about = "Mirror a web feed onto a Bluesky account")]
#[command(long_about = "\
skycast-sync - Mirror a web feed onto a Bluesky account

DESCRIPTION:
    Reads an RSS or Atom feed and publishes every entry newer than the last
    one posted, oldest first, one Bluesky post per entry. The published date
    of the last posted entry is kept in a small state file so that restarts
    never post the same entry twice.

USAGE:
    # One pass, then exit
    skycast-sync --config settings.toml

    # Keep polling every `interval` seconds
    skycast-sync --watch

    # Show what would be posted without logging in
    skycast-sync --dry-run --verbose

SIGNALS:
    SIGTERM, SIGINT - Stop after the current entry (or interrupt a wait)

CONFIGURATION:
    Settings file: --config, $SKYCAST_CONFIG, ./settings.toml or
    ~/.config/skycast/settings.toml. Every key can be overridden with a
    SKYCAST_* environment variable (SKYCAST_PASSWORD, SKYCAST_FEED_URL, ...).

    feed_url = \"https://mastodon.example/@me.rss\"
    handle = \"me.bsky.social\"
    password = \"app-password\"
    last_posted_file = \"last_posted.txt\"
    skip_tag = \"#nobridge\"

EXIT CODES:
    0   - Success or clean shutdown
    1   - Runtime error (feed, storage, posting)
    2   - Configuration or authentication error
    130 - Interrupted while waiting
")]
struct Cli {
    /// Path to the settings file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Keep running, one pass every `interval` seconds
    #[arg(short, long)]
    watch: bool,

    /// Log what would be posted; never log in, post or save
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format: text, json or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(std::env::vars(), cli.log_format, cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<SkycastError>()
            .map(SkycastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    let shutdown = Shutdown::new();
    setup_signal_handlers(shutdown.clone())?;

    let synchronizer = build_synchronizer(&config, cli.dry_run, shutdown.clone()).await?;

    if cli.dry_run {
        info!("Dry run: nothing will be posted or saved");
    }

    if !cli.watch {
        let report = synchronizer.run_once().await?;
        info!("Done: {}", report);
        return Ok(());
    }

    info!(
        "Watching {} every {}s",
        config.feed_url,
        config.interval.as_secs()
    );
    run_watch_loop(&synchronizer, &config, &shutdown).await?;
    info!("skycast-sync stopped");
    Ok(())
}

async fn build_synchronizer(
    config: &Config,
    dry_run: bool,
    shutdown: Shutdown,
) -> libskycast::Result<Synchronizer> {
    let platform = Arc::new(BlueskyClient::new(&config.service, config.request_timeout).await?);
    let feed = Arc::new(HttpFeedSource::new(
        config.request_timeout,
        config.date_format.clone(),
    )?);
    let media = Arc::new(HttpMediaFetcher::new(config.request_timeout)?);
    let store = Arc::new(FileCursorStore::new(
        config.last_posted_file.clone(),
        config.date_format.clone(),
    ));

    let gate = PostingGate::new(
        platform,
        config.handle.clone(),
        config.password.clone(),
        config.retry.clone(),
        shutdown.clone(),
    );

    let mut settings = SyncSettings::from_config(config);
    settings.dry_run = dry_run;

    Ok(Synchronizer::new(settings, feed, media, gate, store, shutdown))
}

/// Run passes until shutdown
///
/// Failed passes are logged and retried on the next tick. Configuration
/// errors stop the loop.
async fn run_watch_loop(
    synchronizer: &Synchronizer,
    config: &Config,
    shutdown: &Shutdown,
) -> libskycast::Result<()> {
    loop {
        match synchronizer.run_once().await {
            Ok(report) if report.cancelled => break,
            Ok(report) => info!("Pass finished: {}", report),
            Err(SkycastError::Cancelled) => break,
            Err(e @ SkycastError::Config(_)) => return Err(e),
            Err(e) => error!("Pass failed: {}", e),
        }

        if shutdown.sleep(config.interval).await.is_err() {
            break;
        }
    }

    info!("Shutdown requested, stopping watch loop");
    Ok(())
}

/// Trigger `shutdown` on SIGINT or SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Shutdown) -> anyhow::Result<()> {
    use anyhow::Context;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;

    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!("Received signal {}, stopping gracefully...", signal);
            shutdown.trigger();
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Shutdown) -> anyhow::Result<()> {
    Ok(())
}
