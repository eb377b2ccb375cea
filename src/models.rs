//! Data models shared by the scraper, the run dispatcher and the HTTP surface.
//!
//! - [`ScrapeWindow`]: inclusive date range of a run
//! - [`ListingRow`] / [`ArticleRef`]: raw and decided rows of a listing page
//! - [`ArticleDetail`]: one scraped post
//! - [`RunState`] / [`RunOutcome`] / [`RunStatus`]: run bookkeeping
//! - [`ProgressEvent`]: one progress message pushed to subscribers
//! - [`JoinedCafe`]: a forum the logged-in account belongs to

use crate::error::ScrapeError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Date format accepted on the wire and on the command line.
pub const INPUT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive calendar-date range bounding which posts are retrieved.
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeWindow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ScrapeWindow {
    /// Build a window, rejecting `start_date > end_date`.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Result<Self, ScrapeError> {
        if start_date > end_date {
            return Err(ScrapeError::InvertedWindow {
                start: start_date,
                end: end_date,
            });
        }
        Ok(Self {
            start_date,
            end_date,
        })
    }

    /// Parse a window from two `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, ScrapeError> {
        Self::new(parse_input_date(start)?, parse_input_date(end)?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_input_date(s: &str) -> Result<NaiveDate, ScrapeError> {
    NaiveDate::parse_from_str(s.trim(), INPUT_DATE_FORMAT)
        .map_err(|_| ScrapeError::InvalidDate(s.to_string()))
}

/// Check that a forum id can be placed in a URL path and a directory name.
pub fn validate_forum_id(forum_id: &str) -> Result<(), ScrapeError> {
    let ok = !forum_id.is_empty()
        && forum_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ScrapeError::InvalidForumId(forum_id.to_string()))
    }
}

/// Raw strings read from one row of a board listing.
///
/// A field is `None` when the element was not present in the row
/// (notice rows and layout rows commonly lack one or the other).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingRow {
    pub date_text: Option<String>,
    pub link: Option<String>,
}

impl ListingRow {
    pub fn new(date_text: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            date_text: Some(date_text.into()),
            link: Some(link.into()),
        }
    }
}

/// A listing row that passed the window decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRef {
    pub link: String,
    pub post_date: NaiveDate,
    /// The listing showed a time of day instead of a date.
    pub is_notice: bool,
}

/// One scraped post. Image sources are kept, bytes are streamed to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleDetail {
    pub title: String,
    pub sanitized_title: String,
    pub text_content: String,
    pub image_sources: Vec<Option<String>>,
}

/// Mutable state of one run, owned by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub current_page: u32,
    pub total_scraped: u32,
    pub stop_flag: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            current_page: 1,
            total_scraped: 0,
            stop_flag: false,
        }
    }
}

/// Why a run finished successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    /// A post older than the window start was reached.
    DateBoundary,
    /// The listing had no rows, or no listing frame.
    NoMorePages,
}

/// Lifecycle of a run as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Done { reason: DoneReason },
    Cancelled,
    Failed { error: String },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Queued | RunStatus::Running)
    }
}

/// Terminal result of one controller run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub total_scraped: u32,
    pub pages_visited: u32,
}

/// One progress message, broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: Option<Uuid>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A forum the logged-in account has joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedCafe {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_window_parse() {
        let w = ScrapeWindow::parse("2024-01-01", "2024-01-31").unwrap();
        assert_eq!(w.start_date, d(2024, 1, 1));
        assert_eq!(w.end_date, d(2024, 1, 31));
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        let err = ScrapeWindow::parse("2024-02-01", "2024-01-01").unwrap_err();
        assert!(matches!(err, ScrapeError::InvertedWindow { .. }));
    }

    #[test]
    fn test_window_rejects_listing_format() {
        let err = ScrapeWindow::parse("2024.01.01.", "2024-01-31").unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidDate(s) if s == "2024.01.01."));
    }

    #[test]
    fn test_window_contains_is_inclusive() {
        let w = ScrapeWindow::new(d(2024, 1, 1), d(2024, 1, 31)).unwrap();
        assert!(w.contains(d(2024, 1, 1)));
        assert!(w.contains(d(2024, 1, 31)));
        assert!(!w.contains(d(2023, 12, 31)));
        assert!(!w.contains(d(2024, 2, 1)));
    }

    #[test]
    fn test_single_day_window() {
        let w = ScrapeWindow::parse("2024-03-05", "2024-03-05").unwrap();
        assert!(w.contains(d(2024, 3, 5)));
    }

    #[test]
    fn test_validate_forum_id() {
        assert!(validate_forum_id("10050146").is_ok());
        assert!(validate_forum_id("joonggonara").is_ok());
        assert!(validate_forum_id("").is_err());
        assert!(validate_forum_id("../etc").is_err());
        assert!(validate_forum_id("1 2").is_err());
    }

    #[test]
    fn test_run_status_serializes_tagged() {
        let json = serde_json::to_value(RunStatus::Done {
            reason: DoneReason::DateBoundary,
        })
        .unwrap();
        assert_eq!(json["state"], "done");
        assert_eq!(json["reason"], "date_boundary");
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
