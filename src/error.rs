//! Error types shared across the scraper.
//!
//! Errors are split by the layer they come from:
//! - [`BrowserError`]: WebDriver session and command failures
//! - [`FetchError`]: HTTP image download failures
//! - [`ScrapeError`]: run-level failures surfaced as a run's terminal status

use std::time::Duration;
use thiserror::Error;

/// Failure talking to the browser.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("could not open a WebDriver session: {0}")]
    Session(String),

    #[error("WebDriver command failed: {0}")]
    Command(String),

    #[error("element `{selector}` did not appear within {waited:?}")]
    Timeout { selector: String, waited: Duration },

    #[error("frame `{0}` is not present on the page")]
    MissingFrame(String),

    #[error("element `{0}` is missing")]
    MissingElement(String),
}

impl From<fantoccini::error::NewSessionError> for BrowserError {
    fn from(e: fantoccini::error::NewSessionError) -> Self {
        BrowserError::Session(e.to_string())
    }
}

impl From<fantoccini::error::CmdError> for BrowserError {
    fn from(e: fantoccini::error::CmdError) -> Self {
        BrowserError::Command(e.to_string())
    }
}

/// Failure downloading an image.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status} for {url}")]
    Status { status: u16, url: String },
}

/// Failure that ends a whole run.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid forum id `{0}`")]
    InvalidForumId(String),

    #[error("invalid date `{0}`, expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("start date {start} is after end date {end}")]
    InvertedWindow {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("login was not confirmed within {0:?}")]
    Authentication(Duration),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
