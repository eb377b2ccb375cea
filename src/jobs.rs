//! Background scrape runs.
//!
//! [`RunManager`] validates a request, records it, and hands it to a Tokio
//! task. Each run gets its own browser session, its own cancellation token
//! and a reporter that writes to the log and to the shared progress channel.
//!
//! ```text
//! start() ──validate──> Queued ──spawn──> Running ──controller──> Done / Cancelled / Failed
//! ```

use crate::browser::login::{LoginMethod, LoginTimeouts};
use crate::browser::webdriver::BrowserConfig;
use crate::controller::{RunContext, run_in_browser};
use crate::error::{FetchError, ScrapeError};
use crate::fetch::{HttpImageFetcher, ImageFetcher, RetryFetch};
use crate::models::{ProgressEvent, RunOutcome, RunStatus, ScrapeWindow, validate_forum_id};
use crate::outputs::files::DownloadStore;
use crate::progress::{BroadcastReporter, FanoutReporter, ProgressSink, TracingReporter};
use crate::scrapers::cafe::SiteTimeouts;
use crate::utils::DelayPolicy;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// Buffered progress events per subscriber before it starts lagging.
const EVENT_BUFFER: usize = 1024;

/// Process-wide settings every run starts from.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub downloads_dir: PathBuf,
    pub browser: BrowserConfig,
    pub login: LoginMethod,
    pub login_timeouts: LoginTimeouts,
    pub timeouts: SiteTimeouts,
    pub delay: DelayPolicy,
    /// Retries per image after the first attempt.
    pub image_retries: usize,
    pub image_timeout: Duration,
}

impl RunSettings {
    /// The HTTP image fetcher with retries.
    pub fn image_fetcher(&self) -> Result<Arc<dyn ImageFetcher>, FetchError> {
        let http = HttpImageFetcher::new(self.image_timeout)?;
        Ok(Arc::new(RetryFetch::new(
            http,
            self.image_retries,
            Duration::from_millis(500),
        )))
    }

    /// Assemble the context for one run.
    pub fn context(
        &self,
        run_id: Option<Uuid>,
        forum_id: &str,
        window: ScrapeWindow,
        fetcher: Arc<dyn ImageFetcher>,
        reporter: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> RunContext {
        RunContext {
            run_id,
            forum_id: forum_id.to_string(),
            window,
            store: DownloadStore::for_forum(&self.downloads_dir, forum_id),
            fetcher,
            reporter,
            login: self.login.clone(),
            login_timeouts: self.login_timeouts,
            timeouts: self.timeouts,
            delay: self.delay,
            cancel,
        }
    }
}

/// Body of a trigger request.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub forum_id: String,
    pub start_date: String,
    pub end_date: String,
}

/// What the dispatcher knows about one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub forum_id: String,
    pub window: ScrapeWindow,
    #[serde(flatten)]
    pub status: RunStatus,
    pub total_scraped: u32,
    pub pages_visited: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Runs one scrape to its outcome. The default opens a WebDriver session.
pub type Runner = Arc<dyn Fn(RunContext) -> BoxFuture<'static, RunOutcome> + Send + Sync>;

struct Inner {
    settings: RunSettings,
    fetcher: Arc<dyn ImageFetcher>,
    runner: Runner,
    runs: DashMap<Uuid, RunRecord>,
    tokens: DashMap<Uuid, CancellationToken>,
    events: broadcast::Sender<ProgressEvent>,
}

impl Inner {
    fn update(&self, run_id: Uuid, f: impl FnOnce(&mut RunRecord)) {
        if let Some(mut record) = self.runs.get_mut(&run_id) {
            f(record.value_mut());
        }
    }
}

/// Starts, tracks and cancels background runs.
#[derive(Clone)]
pub struct RunManager {
    inner: Arc<Inner>,
}

impl RunManager {
    pub fn new(settings: RunSettings, fetcher: Arc<dyn ImageFetcher>) -> Self {
        let browser = settings.browser.clone();
        let runner: Runner = Arc::new(move |ctx: RunContext| {
            let browser = browser.clone();
            async move { run_in_browser(&browser, &ctx).await }.boxed()
        });
        Self::with_runner(settings, fetcher, runner)
    }

    pub fn with_runner(settings: RunSettings, fetcher: Arc<dyn ImageFetcher>, runner: Runner) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                settings,
                fetcher,
                runner,
                runs: DashMap::new(),
                tokens: DashMap::new(),
                events,
            }),
        }
    }

    /// Validate and start a run in the background. Returns immediately.
    pub fn start(&self, request: RunRequest) -> Result<Uuid, ScrapeError> {
        validate_forum_id(&request.forum_id)?;
        let window = ScrapeWindow::parse(&request.start_date, &request.end_date)?;

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.inner.runs.insert(
            run_id,
            RunRecord {
                run_id,
                forum_id: request.forum_id.clone(),
                window,
                status: RunStatus::Queued,
                total_scraped: 0,
                pages_visited: 0,
                started_at: Utc::now(),
                finished_at: None,
            },
        );
        self.inner.tokens.insert(run_id, cancel.clone());

        let reporter = FanoutReporter::new()
            .with(TracingReporter::new(Some(run_id)))
            .with(BroadcastReporter::new(Some(run_id), self.inner.events.clone()));
        let ctx = self.inner.settings.context(
            Some(run_id),
            &request.forum_id,
            window,
            self.inner.fetcher.clone(),
            Arc::new(reporter),
            cancel,
        );

        info!(%run_id, forum_id = %request.forum_id, start = %window.start_date, end = %window.end_date, "Run queued");
        let inner = self.inner.clone();
        tokio::spawn(
            async move {
                inner.update(run_id, |r| r.status = RunStatus::Running);
                // The run gets its own task so a panic surfaces here as a JoinError.
                let outcome = match tokio::spawn((inner.runner)(ctx).in_current_span()).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(error = %e, "Run task died");
                        RunOutcome {
                            status: RunStatus::Failed {
                                error: format!("run task died: {e}"),
                            },
                            total_scraped: 0,
                            pages_visited: 0,
                        }
                    }
                };
                info!(status = ?outcome.status, total = outcome.total_scraped, "Run finished");
                inner.tokens.remove(&run_id);
                inner.update(run_id, |r| {
                    r.status = outcome.status;
                    r.total_scraped = outcome.total_scraped;
                    r.pages_visited = outcome.pages_visited;
                    r.finished_at = Some(Utc::now());
                });
            }
            .instrument(info_span!("run", %run_id)),
        );

        Ok(run_id)
    }

    pub fn status(&self, run_id: Uuid) -> Option<RunRecord> {
        self.inner.runs.get(&run_id).map(|r| r.value().clone())
    }

    /// All known runs, oldest first.
    pub fn list(&self) -> Vec<RunRecord> {
        self.inner
            .runs
            .iter()
            .map(|r| r.value().clone())
            .sorted_by_key(|r| r.started_at)
            .collect()
    }

    /// Ask a run to stop at its next page or article boundary.
    ///
    /// Returns `false` for an unknown run. Cancelling a finished run is a no-op.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        if !self.inner.runs.contains_key(&run_id) {
            return false;
        }
        match self.inner.tokens.get(&run_id) {
            Some(token) => {
                info!(%run_id, "Cancellation requested");
                token.cancel();
            }
            None => warn!(%run_id, "Cancel ignored: run already finished"),
        }
        true
    }

    /// Progress events of every run from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeNode, FakePage, FakeSession};
    use crate::browser::login::{LOGGED_IN_MARKER, LOGIN_URL};
    use crate::controller::run_scrape;
    use crate::fetch::StubFetcher;
    use crate::models::DoneReason;
    use crate::scrapers::cafe::board_url;
    use crate::scrapers::cafe::testing::{listing_page, quick_timeouts};
    use tokio::time::{sleep, timeout};
    use url::Url;

    fn settings() -> RunSettings {
        RunSettings {
            downloads_dir: std::env::temp_dir().join(format!("cafe_scrape_{}", Uuid::new_v4())),
            browser: BrowserConfig {
                webdriver_url: Url::parse("http://127.0.0.1:9").unwrap(),
                headless: true,
            },
            login: LoginMethod::Manual,
            login_timeouts: LoginTimeouts {
                automated: Duration::from_millis(10),
                manual: Duration::from_millis(10),
            },
            timeouts: quick_timeouts(),
            delay: DelayPolicy::none(),
            image_retries: 0,
            image_timeout: Duration::from_secs(1),
        }
    }

    /// Runs the real controller against a logged-in fake with an empty board.
    fn fake_runner() -> Runner {
        Arc::new(|ctx: RunContext| {
            async move {
                let session = FakeSession::new()
                    .page(
                        LOGIN_URL,
                        FakePage::new(FakeNode::new().child(LOGGED_IN_MARKER, FakeNode::new())),
                    )
                    .page(&board_url(&ctx.forum_id, 1), listing_page(&[]));
                run_scrape(session, &ctx).await
            }
            .boxed()
        })
    }

    /// Blocks until cancelled.
    fn waiting_runner() -> Runner {
        Arc::new(|ctx: RunContext| {
            async move {
                ctx.cancel.cancelled().await;
                RunOutcome {
                    status: RunStatus::Cancelled,
                    total_scraped: 0,
                    pages_visited: 0,
                }
            }
            .boxed()
        })
    }

    fn request(forum_id: &str, start: &str, end: &str) -> RunRequest {
        RunRequest {
            forum_id: forum_id.into(),
            start_date: start.into(),
            end_date: end.into(),
        }
    }

    async fn wait_terminal(manager: &RunManager, run_id: Uuid) -> RunRecord {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some(record) = manager.status(run_id) {
                    if record.status.is_terminal() {
                        return record;
                    }
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("run did not finish")
    }

    #[tokio::test]
    async fn test_start_rejects_bad_input() {
        let manager = RunManager::with_runner(settings(), Arc::new(StubFetcher), fake_runner());

        assert!(matches!(
            manager.start(request("123", "2024/01/01", "2024-01-31")),
            Err(ScrapeError::InvalidDate(_))
        ));
        assert!(matches!(
            manager.start(request("123", "2024-02-01", "2024-01-01")),
            Err(ScrapeError::InvertedWindow { .. })
        ));
        assert!(matches!(
            manager.start(request("../etc", "2024-01-01", "2024-01-31")),
            Err(ScrapeError::InvalidForumId(_))
        ));
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn test_run_completes_in_background() {
        let manager = RunManager::with_runner(settings(), Arc::new(StubFetcher), fake_runner());
        let mut events = manager.subscribe();

        let run_id = manager.start(request("123", "2024-01-01", "2024-01-31")).unwrap();
        let record = wait_terminal(&manager, run_id).await;

        assert_eq!(
            record.status,
            RunStatus::Done {
                reason: DoneReason::NoMorePages
            }
        );
        assert_eq!(record.pages_visited, 1);
        assert!(record.finished_at.is_some());

        let first = events.recv().await.unwrap();
        assert_eq!(first.run_id, Some(run_id));
        assert_eq!(first.message, "Initializing scrape...");
    }

    #[tokio::test]
    async fn test_cancel_running_run() {
        let manager = RunManager::with_runner(settings(), Arc::new(StubFetcher), waiting_runner());
        let run_id = manager.start(request("123", "2024-01-01", "2024-01-31")).unwrap();

        assert!(manager.cancel(run_id));
        let record = wait_terminal(&manager, run_id).await;
        assert_eq!(record.status, RunStatus::Cancelled);

        // Already finished: still known, nothing to do.
        assert!(manager.cancel(run_id));
    }

    #[tokio::test]
    async fn test_panicking_run_is_recorded_as_failed() {
        async fn crash(_ctx: RunContext) -> RunOutcome {
            panic!("driver went away");
        }
        let runner: Runner = Arc::new(|ctx: RunContext| crash(ctx).boxed());
        let manager = RunManager::with_runner(settings(), Arc::new(StubFetcher), runner);
        let run_id = manager.start(request("123", "2024-01-01", "2024-01-31")).unwrap();

        let record = wait_terminal(&manager, run_id).await;

        assert!(matches!(record.status, RunStatus::Failed { .. }));
        assert!(record.finished_at.is_some());
        assert!(!manager.cancel(Uuid::new_v4()));
        assert!(manager.inner.tokens.get(&run_id).is_none());
    }

    #[tokio::test]
    async fn test_cancel_unknown_run() {
        let manager = RunManager::with_runner(settings(), Arc::new(StubFetcher), fake_runner());
        assert!(!manager.cancel(Uuid::new_v4()));
        assert!(manager.status(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn test_runs_do_not_share_state() {
        let manager = RunManager::with_runner(settings(), Arc::new(StubFetcher), fake_runner());
        let a = manager.start(request("111", "2024-01-01", "2024-01-31")).unwrap();
        let b = manager.start(request("222", "2023-01-01", "2023-12-31")).unwrap();

        let a = wait_terminal(&manager, a).await;
        let b = wait_terminal(&manager, b).await;

        assert_eq!(a.forum_id, "111");
        assert_eq!(b.forum_id, "222");
        assert_eq!(manager.list().len(), 2);
    }

    #[test]
    fn test_record_serializes_flat_status() {
        let record = RunRecord {
            run_id: Uuid::nil(),
            forum_id: "123".into(),
            window: ScrapeWindow::parse("2024-01-01", "2024-01-31").unwrap(),
            status: RunStatus::Done {
                reason: DoneReason::DateBoundary,
            },
            total_scraped: 4,
            pages_visited: 2,
            started_at: Utc::now(),
            finished_at: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["state"], "done");
        assert_eq!(value["reason"], "date_boundary");
        assert_eq!(value["window"]["start_date"], "2024-01-01");
    }
}
