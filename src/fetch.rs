//! Image download with exponential backoff retry logic.
//!
//! # Architecture
//!
//! - [`ImageFetcher`]: capability trait for downloading one image
//! - [`HttpImageFetcher`]: `reqwest` implementation sending the article as `Referer`
//! - [`RetryFetch`]: decorator that adds retries to any [`ImageFetcher`]
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use crate::error::FetchError;
use async_trait::async_trait;
use rand::{Rng, rng};
use reqwest::header::{REFERER, USER_AGENT};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Downloads the bytes behind an image URL.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch `url`, presenting `referer` as the page the image is embedded in.
    async fn fetch(&self, url: &str, referer: &str) -> Result<Vec<u8>, FetchError>;
}

/// Plain HTTP fetcher.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: StdDuration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str, referer: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self
            .client
            .get(url)
            .header(REFERER, referer)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`ImageFetcher`].
pub struct RetryFetch<T> {
    /// The underlying fetcher.
    inner: T,
    /// Retries after the first attempt.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Upper bound on a single delay.
    max_delay: StdDuration,
}

impl<T> RetryFetch<T>
where
    T: ImageFetcher,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(10),
        }
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt - 1).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        if delay.is_zero() {
            return delay;
        }
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[async_trait]
impl<T> ImageFetcher for RetryFetch<T>
where
    T: ImageFetcher,
{
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &str, referer: &str) -> Result<Vec<u8>, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.fetch(url, referer).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            error = %e,
                            "image fetch exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(attempt, max = self.max_retries, ?delay, error = %e, "image fetch failed; backing off");
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Answers with the URL's own bytes, or 404 for URLs containing `broken`.
#[cfg(test)]
pub struct StubFetcher;

#[cfg(test)]
#[async_trait]
impl ImageFetcher for StubFetcher {
    async fn fetch(&self, url: &str, _referer: &str) -> Result<Vec<u8>, FetchError> {
        if url.contains("broken") {
            Err(FetchError::Status {
                status: 404,
                url: url.to_string(),
            })
        } else {
            Ok(url.as_bytes().to_vec())
        }
    }
}
