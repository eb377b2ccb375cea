//! The paginated, date-bounded scrape loop.
//!
//! A run moves through these states:
//!
//! ```text
//! RUNNING --page with rows, no boundary--> RUNNING (next page)
//! RUNNING --row older than start date----> STOPPING --> DONE(date_boundary)
//! RUNNING --empty listing / no frame------> DONE(no_more_pages)
//! RUNNING --cancel token set--------------> CANCELLED
//! RUNNING --login/navigation/browser fault-> FAILED
//! ```
//!
//! Articles are retrieved one at a time with a random pause in between. A
//! failed article is reported and skipped; anything that breaks the page loop
//! fails the run. The session is closed and a summary reported on every path.

use crate::browser::Session;
use crate::browser::login::{LoginMethod, LoginTimeouts, perform_login};
use crate::browser::webdriver::{BrowserConfig, WebDriverSession};
use crate::error::ScrapeError;
use crate::extract::scan_page;
use crate::fetch::ImageFetcher;
use crate::models::{DoneReason, JoinedCafe, RunOutcome, RunState, RunStatus, ScrapeWindow};
use crate::outputs::files::DownloadStore;
use crate::progress::ProgressSink;
use crate::scrapers::cafe::{Listing, SiteTimeouts, list_joined_cafes, read_listing, scrape_article};
use crate::utils::DelayPolicy;
use chrono::Local;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Everything one run needs, passed explicitly instead of living in globals.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: Option<Uuid>,
    pub forum_id: String,
    pub window: ScrapeWindow,
    pub store: DownloadStore,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub reporter: Arc<dyn ProgressSink>,
    pub login: LoginMethod,
    pub login_timeouts: LoginTimeouts,
    pub timeouts: SiteTimeouts,
    pub delay: DelayPolicy,
    pub cancel: CancellationToken,
}

/// Open a WebDriver session and run the scrape in it.
pub async fn run_in_browser(browser: &BrowserConfig, ctx: &RunContext) -> RunOutcome {
    match WebDriverSession::connect(browser).await {
        Ok(session) => run_scrape(session, ctx).await,
        Err(e) => {
            error!(error = %e, "could not start browser");
            ctx.reporter.report(&format!("[fatal] Scrape aborted: {e}"));
            ctx.reporter.report("Scrape finished! 0 articles scraped in total.");
            RunOutcome {
                status: RunStatus::Failed {
                    error: e.to_string(),
                },
                total_scraped: 0,
                pages_visited: 0,
            }
        }
    }
}

/// Run one scrape to completion in `session`, then close the session.
///
/// Never returns an error: failures become [`RunStatus::Failed`].
#[instrument(level = "info", skip_all, fields(run_id = ?ctx.run_id, forum_id = %ctx.forum_id))]
pub async fn run_scrape<S: Session>(mut session: S, ctx: &RunContext) -> RunOutcome {
    let mut state = RunState::default();
    let mut pages_visited = 0;

    let status = match drive(&mut session, ctx, &mut state, &mut pages_visited).await {
        Ok(status) => status,
        Err(e) => {
            error!(error = %e, total = state.total_scraped, "scrape aborted");
            ctx.reporter.report(&format!("[fatal] Scrape aborted: {e}"));
            RunStatus::Failed {
                error: e.to_string(),
            }
        }
    };

    if let Err(e) = session.close().await {
        warn!(error = %e, "could not close browser session");
    }
    ctx.reporter.report(&format!(
        "Scrape finished! {} articles scraped in total.",
        state.total_scraped
    ));
    info!(?status, total = state.total_scraped, pages_visited, "run ended");

    RunOutcome {
        status,
        total_scraped: state.total_scraped,
        pages_visited,
    }
}

async fn drive<S: Session>(
    session: &mut S,
    ctx: &RunContext,
    state: &mut RunState,
    pages_visited: &mut u32,
) -> Result<RunStatus, ScrapeError> {
    let reporter = ctx.reporter.as_ref();
    reporter.report("Initializing scrape...");
    ctx.store.prepare().await?;

    if ctx.cancel.is_cancelled() {
        return Ok(cancelled(reporter));
    }

    if !perform_login(session, &ctx.login, &ctx.login_timeouts, reporter).await? {
        return Err(ScrapeError::Authentication(
            ctx.login_timeouts.for_method(&ctx.login),
        ));
    }

    reporter.report(&format!(
        "Starting scrape of cafe (ID: {}) into {}.",
        ctx.forum_id,
        ctx.store.forum_dir().display()
    ));
    reporter.report(&format!(
        "Date range: {} ~ {}",
        ctx.window.start_date, ctx.window.end_date
    ));

    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(cancelled(reporter));
        }

        let page = state.current_page;
        reporter.report(&format!("--- Scraping page {page} ---"));
        let listing = read_listing(session, &ctx.forum_id, page, &ctx.timeouts).await?;
        *pages_visited += 1;

        let rows = match listing {
            Listing::NoFrame => {
                reporter.report("Listing frame not found; the page structure may have changed. Stopping.");
                return Ok(RunStatus::Done {
                    reason: DoneReason::NoMorePages,
                });
            }
            Listing::Rows(rows) if rows.is_empty() => {
                reporter.report("No more posts, or the page structure has changed. Stopping.");
                return Ok(RunStatus::Done {
                    reason: DoneReason::NoMorePages,
                });
            }
            Listing::Rows(rows) => rows,
        };
        session.leave_frame().await?;

        let scan = scan_page(&rows, &ctx.window, Local::now().date_naive());
        if scan.skipped > 0 {
            reporter.report(&format!(
                "[info] Skipped {} rows without a usable date or link (notices etc.).",
                scan.skipped
            ));
        }
        state.stop_flag = scan.stop;
        debug!(
            page,
            in_window = scan.articles.len(),
            notices = scan.articles.iter().filter(|a| a.is_notice).count(),
            stop = scan.stop,
            "Page scanned"
        );

        let links = scan.links();
        reporter.report(&format!(
            "Found {} posts on page {page}; starting to scrape them.",
            links.len()
        ));

        for (i, link) in links.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return Ok(cancelled(reporter));
            }
            if i > 0 {
                tokio::select! {
                    _ = sleep(ctx.delay.sample()) => {}
                    _ = ctx.cancel.cancelled() => return Ok(cancelled(reporter)),
                }
            }

            reporter.report(&format!("[{}/{}] Opening {link}", i + 1, links.len()));
            match scrape_article(
                session,
                link,
                &ctx.store,
                ctx.fetcher.as_ref(),
                reporter,
                &ctx.timeouts,
            )
            .await
            {
                Ok(detail) => {
                    state.total_scraped += 1;
                    reporter.report(&format!(
                        "Saved \"{}\" with {} images ({} so far).",
                        detail.title,
                        detail.image_sources.len(),
                        state.total_scraped
                    ));
                }
                Err(e) => {
                    warn!(%link, error = %e, "article failed");
                    reporter.report(&format!(
                        "[error] Failed to scrape article: {link}, error: {e}"
                    ));
                }
            }
        }

        if state.stop_flag {
            reporter.report(&format!(
                "Reached a post older than the start date ({}); stopping.",
                ctx.window.start_date
            ));
            return Ok(RunStatus::Done {
                reason: DoneReason::DateBoundary,
            });
        }
        state.current_page += 1;
    }
}

/// Log in and list the cafes the account has joined, then close the session.
#[instrument(level = "info", skip_all)]
pub async fn list_cafes<S: Session>(
    mut session: S,
    login: &LoginMethod,
    login_timeouts: &LoginTimeouts,
    timeouts: &SiteTimeouts,
    reporter: &dyn ProgressSink,
) -> Result<Vec<JoinedCafe>, ScrapeError> {
    let result: Result<Vec<JoinedCafe>, ScrapeError> = async {
        if !perform_login(&mut session, login, login_timeouts, reporter).await? {
            return Err(ScrapeError::Authentication(login_timeouts.for_method(login)));
        }
        Ok(list_joined_cafes(&mut session, timeouts).await?)
    }
    .await;

    if let Err(e) = session.close().await {
        warn!(error = %e, "could not close browser session");
    }
    result
}

fn cancelled(reporter: &dyn ProgressSink) -> RunStatus {
    reporter.report("Scrape cancelled.");
    RunStatus::Cancelled
}
