//! Date-window decisions over the rows of one listing page.
//!
//! Everything here is pure: rows have already been read from the page, and
//! "today" is passed in so notice rows can be dated deterministically.

use crate::models::{ArticleRef, ListingRow, ScrapeWindow};
use chrono::NaiveDate;
use itertools::Itertools;
use tracing::debug;

/// Date format used by the board listing. The trailing period is part of it.
pub const LISTING_DATE_FORMAT: &str = "%Y.%m.%d.";

/// Result of scanning one listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageScan {
    /// Rows inside the window, top to bottom.
    pub articles: Vec<ArticleRef>,
    /// A row older than the window start was reached.
    pub stop: bool,
    /// Rows skipped because a date or link was missing or unreadable.
    pub skipped: usize,
}

impl PageScan {
    pub fn links(&self) -> Vec<String> {
        self.articles
            .iter()
            .map(|a| a.link.clone())
            .unique()
            .collect()
    }
}

/// Parse a listing date.
///
/// A time of day (anything containing `:`) means the post is from today.
/// Returns the date and whether it was derived from a time of day.
pub fn parse_post_date(text: &str, today: NaiveDate) -> Option<(NaiveDate, bool)> {
    let text = text.trim();
    if text.contains(':') {
        return Some((today, true));
    }
    NaiveDate::parse_from_str(text, LISTING_DATE_FORMAT)
        .ok()
        .map(|date| (date, false))
}

/// Decide which rows of a page fall inside `window`.
///
/// Rows are newest first. Rows newer than the window are skipped, the first
/// row older than the window stops the scan and is discarded.
pub fn scan_page(rows: &[ListingRow], window: &ScrapeWindow, today: NaiveDate) -> PageScan {
    let mut scan = PageScan::default();

    for (index, row) in rows.iter().enumerate() {
        let Some(date_text) = row.date_text.as_deref() else {
            debug!(index, "row has no date");
            scan.skipped += 1;
            continue;
        };
        let Some((post_date, is_notice)) = parse_post_date(date_text, today) else {
            debug!(index, date_text, "row date is unreadable");
            scan.skipped += 1;
            continue;
        };

        if post_date > window.end_date {
            continue;
        }
        if post_date < window.start_date {
            debug!(index, %post_date, "row is older than the window; stopping");
            scan.stop = true;
            break;
        }

        debug_assert!(window.contains(post_date));
        match row.link.as_deref().map(str::trim) {
            Some(link) if !link.is_empty() => scan.articles.push(ArticleRef {
                link: link.to_string(),
                post_date,
                is_notice,
            }),
            _ => {
                debug!(index, "row has no article link");
                scan.skipped += 1;
            }
        }
    }

    scan
}
