//! Command-line interface definitions.
//!
//! Every global option can also come from the environment (or a `.env`
//! file, loaded at start-up).

use crate::browser::login::{LoginMethod, LoginTimeouts};
use crate::browser::webdriver::BrowserConfig;
use crate::error::ScrapeError;
use crate::jobs::RunSettings;
use crate::scrapers::cafe::SiteTimeouts;
use crate::utils::DelayPolicy;
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Download Naver Cafe posts and images for a date range.
///
/// # Examples
///
/// ```sh
/// # One run in the foreground, logging in by hand in the browser window
/// cafe_scrape scrape --forum-id 10050146 --start-date 2024-01-01 --end-date 2024-01-31
///
/// # Stored credentials, no window
/// NAVER_ID=me NAVER_PW=secret cafe_scrape --login automated --headless cafes
///
/// # HTTP service
/// cafe_scrape serve --bind 0.0.0.0:8080
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// WebDriver server to open browser sessions on
    #[arg(long, env = "WEBDRIVER_URL", default_value = "http://localhost:4444", global = true)]
    pub webdriver_url: Url,

    /// Root directory for downloaded posts
    #[arg(long, env = "DOWNLOADS_DIR", default_value = "downloads", global = true)]
    pub downloads_dir: PathBuf,

    /// Run the browser without a window (automated login only)
    #[arg(long, global = true)]
    pub headless: bool,

    /// How to log in to Naver
    #[arg(long, value_enum, default_value_t = LoginMode::Manual, global = true)]
    pub login: LoginMode,

    /// Naver account id for automated login
    #[arg(long, env = "NAVER_ID", global = true)]
    pub naver_id: Option<String>,

    /// Naver password for automated login
    #[arg(long, env = "NAVER_PW", hide_env_values = true, global = true)]
    pub naver_pw: Option<String>,

    /// Shortest pause between two articles, in milliseconds
    #[arg(long, default_value_t = 1000, global = true)]
    pub min_delay_ms: u64,

    /// Longest pause between two articles, in milliseconds
    #[arg(long, default_value_t = 3000, global = true)]
    pub max_delay_ms: u64,

    /// Seconds to wait for a manual login
    #[arg(long, default_value_t = 60, global = true)]
    pub login_timeout_secs: u64,

    /// Retries per image download
    #[arg(long, default_value_t = 2, global = true)]
    pub image_retries: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Scrape one forum in the foreground
    Scrape {
        /// Numeric cafe id
        #[arg(long)]
        forum_id: String,
        /// First day to include, YYYY-MM-DD
        #[arg(long)]
        start_date: String,
        /// Last day to include, YYYY-MM-DD
        #[arg(long)]
        end_date: String,
    },
    /// Log in and list the cafes the account has joined
    Cafes,
    /// Serve the HTTP API
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMode {
    Automated,
    Manual,
}

impl Cli {
    /// Settings shared by every run started from this invocation.
    pub fn settings(&self) -> Result<RunSettings, ScrapeError> {
        let login = LoginMethod::from_config(
            self.login == LoginMode::Automated,
            self.naver_id.clone(),
            self.naver_pw.clone(),
        )?;
        if self.headless && matches!(login, LoginMethod::Manual) {
            return Err(ScrapeError::Config(
                "manual login needs a visible browser; drop --headless or use --login automated"
                    .to_string(),
            ));
        }

        Ok(RunSettings {
            downloads_dir: self.downloads_dir.clone(),
            browser: BrowserConfig {
                webdriver_url: self.webdriver_url.clone(),
                headless: self.headless,
            },
            login,
            login_timeouts: LoginTimeouts {
                manual: Duration::from_secs(self.login_timeout_secs),
                ..LoginTimeouts::default()
            },
            timeouts: SiteTimeouts::default(),
            delay: DelayPolicy::new(
                Duration::from_millis(self.min_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            ),
            image_retries: self.image_retries,
            image_timeout: Duration::from_secs(30),
        })
    }
}
