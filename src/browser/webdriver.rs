//! [`Session`] backed by a WebDriver server (chromedriver, geckodriver,
//! Selenium) through `fantoccini`.

use super::{PageElement, Session};
use crate::error::BrowserError;
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::json;
use tracing::{debug, info, instrument};
use url::Url;

/// Options for starting a browser session.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// WebDriver endpoint, e.g. `http://localhost:4444`.
    pub webdriver_url: Url,
    /// Run Chrome without a window. Manual login needs this off.
    pub headless: bool,
}

/// A live WebDriver session.
pub struct WebDriverSession {
    client: Client,
}

impl WebDriverSession {
    /// Start a new Chrome session on the configured WebDriver server.
    #[instrument(level = "info", skip_all, fields(url = %config.webdriver_url, headless = config.headless))]
    pub async fn connect(config: &BrowserConfig) -> Result<Self, BrowserError> {
        let mut args = vec!["--no-sandbox", "--disable-dev-shm-usage"];
        if config.headless {
            args.push("--headless=new");
        }

        let mut caps = serde_json::Map::new();
        caps.insert("browserName".to_string(), json!("chrome"));
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(config.webdriver_url.as_str())
            .await?;
        info!("WebDriver session opened");
        Ok(Self { client })
    }
}

/// Treat "no such element" as absence, everything else as a failure.
fn optional<T>(res: Result<T, CmdError>) -> Result<Option<T>, BrowserError> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_no_such_element() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Element handle of a [`WebDriverSession`].
pub struct WebDriverElement {
    inner: Element,
}

#[async_trait]
impl PageElement for WebDriverElement {
    async fn text(&self) -> Result<String, BrowserError> {
        Ok(self.inner.text().await?)
    }

    async fn attr(&self, name: &str) -> Result<Option<String>, BrowserError> {
        Ok(self.inner.attr(name).await?)
    }

    async fn find(&self, selector: &str) -> Result<Option<Self>, BrowserError> {
        let found = optional(self.inner.find(Locator::Css(selector)).await)?;
        Ok(found.map(|inner| WebDriverElement { inner }))
    }

    async fn send_keys(&self, text: &str) -> Result<(), BrowserError> {
        Ok(self.inner.send_keys(text).await?)
    }

    async fn click(&self) -> Result<(), BrowserError> {
        self.inner.click().await.map(|_| ())?;
        Ok(())
    }
}

#[async_trait]
impl Session for WebDriverSession {
    type Element = WebDriverElement;

    #[instrument(level = "debug", skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.client.goto(url).await?;
        Ok(())
    }

    async fn find(&mut self, selector: &str) -> Result<Option<Self::Element>, BrowserError> {
        let found = optional(self.client.find(Locator::Css(selector)).await)?;
        Ok(found.map(|inner| WebDriverElement { inner }))
    }

    async fn find_all(&mut self, selector: &str) -> Result<Vec<Self::Element>, BrowserError> {
        let found = self.client.find_all(Locator::Css(selector)).await?;
        Ok(found
            .into_iter()
            .map(|inner| WebDriverElement { inner })
            .collect())
    }

    async fn switch_to_frame(&mut self, frame: Self::Element) -> Result<(), BrowserError> {
        frame.inner.enter_frame().await.map(|_| ())?;
        Ok(())
    }

    async fn leave_frame(&mut self) -> Result<(), BrowserError> {
        self.client.enter_parent_frame().await?;
        Ok(())
    }

    async fn close(self) -> Result<(), BrowserError> {
        self.client.close().await?;
        debug!("WebDriver session closed");
        Ok(())
    }
}
