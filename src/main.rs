//! # cafe_scrape
//!
//! Downloads the posts of a Naver Cafe that fall inside a date range: the
//! text of each post and the images embedded in it, through a browser driven
//! over WebDriver.
//!
//! ## Usage
//!
//! ```sh
//! cafe_scrape scrape --forum-id 10050146 --start-date 2024-01-01 --end-date 2024-01-31
//! cafe_scrape cafes
//! cafe_scrape serve --bind 127.0.0.1:8080
//! ```
//!
//! ## Architecture
//!
//! 1. **Login**: open a browser session and authenticate (stored credentials
//!    or by hand)
//! 2. **Listing**: walk the board page by page, newest first, keeping the rows
//!    inside the date window
//! 3. **Articles**: save each post's text, then its images, one post at a time
//! 4. **Stop**: at the first post older than the window, or when the board
//!    runs out of pages
//!
//! Runs started over HTTP execute in the background and stream their progress
//! as server-sent events.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod browser;
mod cli;
mod controller;
mod error;
mod extract;
mod fetch;
mod jobs;
mod models;
mod outputs;
mod progress;
mod scrapers;
mod server;
mod utils;

use browser::webdriver::WebDriverSession;
use cli::{Cli, Command};
use jobs::{RunManager, RunSettings};
use models::{RunStatus, ScrapeWindow, validate_forum_id};
use progress::TracingReporter;
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // A missing .env is fine; flags and the real environment still apply.
    let dotenv = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Could not read .env"),
    }

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "cafe_scrape starting up");

    let args = Cli::parse();
    debug!(command = ?args.command, downloads_dir = %args.downloads_dir.display(), "Parsed CLI arguments");
    let settings = args.settings()?;

    let code = match args.command {
        Command::Scrape {
            forum_id,
            start_date,
            end_date,
        } => scrape(&settings, &forum_id, &start_date, &end_date).await?,
        Command::Cafes => {
            cafes(&settings).await?;
            ExitCode::SUCCESS
        }
        Command::Serve { bind } => {
            ensure_writable_dir(&settings.downloads_dir)
                .await
                .with_context(|| format!("{} is not writable", settings.downloads_dir.display()))?;
            let fetcher = settings.image_fetcher()?;
            server::serve(bind, RunManager::new(settings, fetcher)).await?;
            ExitCode::SUCCESS
        }
    };

    info!(elapsed_ms = start_time.elapsed().as_millis() as u64, "Done");
    Ok(code)
}

/// Run one scrape in the foreground. Ctrl-C cancels at the next boundary.
#[instrument(level = "info", skip(settings))]
async fn scrape(
    settings: &RunSettings,
    forum_id: &str,
    start_date: &str,
    end_date: &str,
) -> anyhow::Result<ExitCode> {
    validate_forum_id(forum_id)?;
    let window = ScrapeWindow::parse(start_date, end_date)?;
    ensure_writable_dir(&settings.downloads_dir)
        .await
        .with_context(|| format!("{} is not writable", settings.downloads_dir.display()))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping at the next article");
            on_interrupt.cancel();
        }
    });

    let ctx = settings.context(
        None,
        forum_id,
        window,
        settings.image_fetcher()?,
        Arc::new(TracingReporter::new(None)),
        cancel,
    );
    let outcome = controller::run_in_browser(&settings.browser, &ctx).await;

    info!(
        status = ?outcome.status,
        total_scraped = outcome.total_scraped,
        pages_visited = outcome.pages_visited,
        "Scrape ended"
    );
    Ok(match outcome.status {
        RunStatus::Failed { error } => {
            error!(%error, "Scrape failed");
            ExitCode::FAILURE
        }
        _ => ExitCode::SUCCESS,
    })
}

/// Print the cafes the account has joined, one `id<TAB>name` per line.
async fn cafes(settings: &RunSettings) -> anyhow::Result<()> {
    let session = WebDriverSession::connect(&settings.browser).await?;
    let cafes = controller::list_cafes(
        session,
        &settings.login,
        &settings.login_timeouts,
        &settings.timeouts,
        &TracingReporter::new(None),
    )
    .await?;

    if cafes.is_empty() {
        warn!("No joined cafes found");
    }
    for cafe in cafes {
        println!("{}\t{}", cafe.id, cafe.name);
    }
    Ok(())
}
