//! Naver Cafe scraper.
//!
//! Board listings and article pages render inside the `cafe_main` iframe, so
//! every lookup below happens after switching into it.
//!
//! # URL Pattern
//!
//! Board pages are `https://cafe.naver.com/ca-fe/cafes/<forum id>/menus/0?page=<n>`;
//! article links are taken verbatim from the listing rows.

use crate::browser::{PageElement, Session};
use crate::error::{BrowserError, ScrapeError};
use crate::fetch::ImageFetcher;
use crate::models::{ArticleDetail, JoinedCafe, ListingRow};
use crate::outputs::files::DownloadStore;
use crate::progress::ProgressSink;
use crate::utils::{sanitize_filename, truncate_for_log};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const CAFE_BASE_URL: &str = "https://cafe.naver.com";
pub const MY_CAFES_URL: &str = "https://cafe.naver.com/MyCafeIntro.nhn";
pub const MAIN_FRAME: &str = "cafe_main";

const LISTING_ROW: &str = r#"div.article-board[class*="type-L"] > table > tbody > tr"#;
const ROW_DATE: &str = "td.td_date";
const ROW_LINK: &str = "a.article";
const ARTICLE_TITLE: &str = "h3.title_text";
const ARTICLE_CONTENT: &str = "div.se-main-container";
const ARTICLE_IMAGE: &str = "img.se-image-resource";
const MY_CAFE_LINK: &str = "ul.my-cafe-list a";
const MY_CAFE_NAME: &str = "span.cafe-name";

static CLUB_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"clubid=(\d+)").expect("static regex"));

/// Bounded waits for page elements.
#[derive(Debug, Clone, Copy)]
pub struct SiteTimeouts {
    /// Wait for the `cafe_main` iframe.
    pub frame: Duration,
    /// Wait for the article title.
    pub element: Duration,
}

impl Default for SiteTimeouts {
    fn default() -> Self {
        Self {
            frame: Duration::from_secs(10),
            element: Duration::from_secs(10),
        }
    }
}

/// URL of one page of a forum's full board listing.
pub fn board_url(forum_id: &str, page: u32) -> String {
    format!("{CAFE_BASE_URL}/ca-fe/cafes/{forum_id}/menus/0?page={page}")
}

/// Extract the numeric `clubid` from a cafe link.
pub fn parse_club_id(href: &str) -> Option<String> {
    CLUB_ID
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// What a listing page contained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    /// The listing iframe never appeared.
    NoFrame,
    Rows(Vec<ListingRow>),
}

/// Open a listing page and read its rows.
///
/// Leaves the session inside the listing frame when it was found.
#[instrument(level = "info", skip(session, timeouts))]
pub async fn read_listing<S: Session>(
    session: &mut S,
    forum_id: &str,
    page: u32,
    timeouts: &SiteTimeouts,
) -> Result<Listing, BrowserError> {
    session.navigate(&board_url(forum_id, page)).await?;

    if !session.enter_frame(MAIN_FRAME, timeouts.frame).await? {
        warn!("listing frame missing");
        return Ok(Listing::NoFrame);
    }

    let elements = session.find_all(LISTING_ROW).await?;
    let mut rows = Vec::with_capacity(elements.len());
    for element in &elements {
        rows.push(read_row(element).await);
    }
    info!(count = rows.len(), "Read listing rows");
    Ok(Listing::Rows(rows))
}

/// Read the date text and link of one row. Lookup faults count as absence.
async fn read_row<E: PageElement>(row: &E) -> ListingRow {
    let date_text = match row.find(ROW_DATE).await {
        Ok(Some(cell)) => cell.text().await.ok(),
        _ => None,
    };
    let link = match row.find(ROW_LINK).await {
        Ok(Some(anchor)) => anchor.attr("href").await.ok().flatten(),
        _ => None,
    };
    ListingRow { date_text, link }
}

/// Scrape one article into the store.
///
/// Text is written before any image is fetched. Image faults are reported
/// and skipped one by one. The session is back at the top-level document
/// when this returns, whatever the outcome.
#[instrument(level = "info", skip_all, fields(%link))]
pub async fn scrape_article<S: Session>(
    session: &mut S,
    link: &str,
    store: &DownloadStore,
    fetcher: &dyn ImageFetcher,
    reporter: &dyn ProgressSink,
    timeouts: &SiteTimeouts,
) -> Result<ArticleDetail, ScrapeError> {
    let result = scrape_article_in_frame(session, link, store, fetcher, reporter, timeouts).await;
    if let Err(e) = session.leave_frame().await {
        debug!(error = %e, "could not leave article frame");
    }
    result
}

async fn scrape_article_in_frame<S: Session>(
    session: &mut S,
    link: &str,
    store: &DownloadStore,
    fetcher: &dyn ImageFetcher,
    reporter: &dyn ProgressSink,
    timeouts: &SiteTimeouts,
) -> Result<ArticleDetail, ScrapeError> {
    session.navigate(link).await?;
    if !session.enter_frame(MAIN_FRAME, timeouts.frame).await? {
        return Err(BrowserError::MissingFrame(MAIN_FRAME.to_string()).into());
    }

    let title = session
        .wait_for(ARTICLE_TITLE, timeouts.element)
        .await?
        .ok_or_else(|| BrowserError::Timeout {
            selector: ARTICLE_TITLE.to_string(),
            waited: timeouts.element,
        })?
        .text()
        .await?
        .trim()
        .to_string();
    let sanitized_title = sanitize_filename(&title);
    reporter.report(&format!("Scraping article: {title}"));

    let text_content = session
        .find(ARTICLE_CONTENT)
        .await?
        .ok_or_else(|| BrowserError::MissingElement(ARTICLE_CONTENT.to_string()))?
        .text()
        .await?;

    let post_dir = store.write_content(&sanitized_title, &text_content).await?;

    let images = session.find_all(ARTICLE_IMAGE).await?;
    reporter.report(&format!("Found {} images.", images.len()));

    let mut image_sources = Vec::with_capacity(images.len());
    for (i, image) in images.iter().enumerate() {
        let src = match image.attr("src").await {
            Ok(src) => src,
            Err(e) => {
                warn!(index = i, error = %e, "could not read image source");
                None
            }
        };
        image_sources.push(src.clone());

        // Inline base64 images are part of the markup, not separate files.
        let Some(src) = src.filter(|s| !s.starts_with("data:")) else {
            continue;
        };

        match fetcher.fetch(&src, link).await {
            Ok(bytes) => {
                if let Err(e) = store.write_image(&post_dir, i + 1, &bytes).await {
                    reporter.report(&format!("[warning] Could not save image {}: {e}", i + 1));
                }
            }
            Err(e) => {
                reporter.report(&format!(
                    "[warning] Image download failed: {}, error: {e}",
                    truncate_for_log(&src, 200)
                ));
            }
        }
    }

    Ok(ArticleDetail {
        title,
        sanitized_title,
        text_content,
        image_sources,
    })
}

/// List the cafes the logged-in account has joined.
#[instrument(level = "info", skip_all)]
pub async fn list_joined_cafes<S: Session>(
    session: &mut S,
    timeouts: &SiteTimeouts,
) -> Result<Vec<JoinedCafe>, BrowserError> {
    session.navigate(MY_CAFES_URL).await?;
    if !session.enter_frame(MAIN_FRAME, timeouts.frame).await? {
        return Err(BrowserError::MissingFrame(MAIN_FRAME.to_string()));
    }

    let mut cafes = Vec::new();
    for anchor in session.find_all(MY_CAFE_LINK).await? {
        let Some(href) = anchor.attr("href").await? else {
            continue;
        };
        let Some(id) = parse_club_id(&href) else {
            debug!(%href, "cafe link without clubid");
            continue;
        };
        let name = match anchor.find(MY_CAFE_NAME).await? {
            Some(label) => label.text().await?.trim().to_string(),
            None => String::new(),
        };
        cafes.push(JoinedCafe { id, name });
    }

    session.leave_frame().await?;
    info!(count = cafes.len(), "Found joined cafes");
    Ok(cafes)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Page builders shared by the scraper and controller tests.

    use super::*;
    use crate::browser::fake::{FakeNode, FakePage};

    pub fn listing_page(rows: &[(&str, &str)]) -> FakePage {
        let rows = rows
            .iter()
            .map(|(date, href)| {
                FakeNode::new()
                    .child(ROW_DATE, FakeNode::new().text(date))
                    .child(ROW_LINK, FakeNode::new().attr("href", href))
            })
            .collect();
        FakePage::framed(MAIN_FRAME, FakeNode::new().children(LISTING_ROW, rows))
    }

    pub fn article_page(title: &str, body: &str, images: &[&str]) -> FakePage {
        let images = images
            .iter()
            .map(|src| FakeNode::new().attr("src", src))
            .collect();
        FakePage::framed(
            MAIN_FRAME,
            FakeNode::new()
                .child(ARTICLE_TITLE, FakeNode::new().text(title))
                .child(ARTICLE_CONTENT, FakeNode::new().text(body))
                .children(ARTICLE_IMAGE, images),
        )
    }

    pub fn quick_timeouts() -> SiteTimeouts {
        SiteTimeouts {
            frame: Duration::from_millis(10),
            element: Duration::from_millis(10),
        }
    }
}
