//! Browser capability used by the scraper.
//!
//! The scrape loop never talks to a WebDriver directly. It drives a
//! [`Session`], which exposes navigation, CSS lookup and frame switching, and
//! reads data through [`PageElement`]. [`webdriver::WebDriverSession`] is the
//! real implementation; tests use an in-memory fake.

use crate::error::BrowserError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{Instant, sleep};

pub mod login;
pub mod webdriver;

#[cfg(test)]
pub mod fake;

/// How often [`Session::wait_for`] re-checks the page.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One element located on the current page.
#[async_trait]
pub trait PageElement: Send + Sync + Sized {
    /// Rendered text of the element.
    async fn text(&self) -> Result<String, BrowserError>;

    /// Attribute value, `None` when absent.
    async fn attr(&self, name: &str) -> Result<Option<String>, BrowserError>;

    /// First descendant matching `selector`, `None` when there is none.
    async fn find(&self, selector: &str) -> Result<Option<Self>, BrowserError>;

    async fn send_keys(&self, text: &str) -> Result<(), BrowserError>;

    async fn click(&self) -> Result<(), BrowserError>;
}

/// An exclusively owned browsing session.
#[async_trait]
pub trait Session: Send + Sized {
    type Element: PageElement;

    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// First element matching `selector` in the current frame.
    async fn find(&mut self, selector: &str) -> Result<Option<Self::Element>, BrowserError>;

    /// Every element matching `selector` in the current frame, in document order.
    async fn find_all(&mut self, selector: &str) -> Result<Vec<Self::Element>, BrowserError>;

    /// Switch into the frame held by `frame`.
    async fn switch_to_frame(&mut self, frame: Self::Element) -> Result<(), BrowserError>;

    /// Return to the top-level document.
    async fn leave_frame(&mut self) -> Result<(), BrowserError>;

    /// End the session and release the browser.
    async fn close(self) -> Result<(), BrowserError>;

    /// Poll for `selector` until it appears or `timeout` elapses.
    async fn wait_for(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<Self::Element>, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.find(selector).await? {
                return Ok(Some(element));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Wait for the iframe named `name` and switch into it.
    ///
    /// Returns `false` if the frame never showed up.
    async fn enter_frame(&mut self, name: &str, timeout: Duration) -> Result<bool, BrowserError> {
        let selector = format!(r#"iframe[name="{name}"]"#);
        match self.wait_for(&selector, timeout).await? {
            Some(frame) => {
                self.switch_to_frame(frame).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
