//! Page fetching with bounded retries.
//!
//! The module uses a trait-based design:
//! - [`FetchPage`]: core trait for fetching one URL into a body
//! - [`HttpFetcher`]: reqwest-backed implementation with the browser-like
//!   default headers the result site expects
//! - [`RetryFetch`]: decorator that adds fixed-delay retries to any
//!   [`FetchPage`] implementation
//!
//! # Retry Strategy
//!
//! - Up to `max_attempts` tries per page (default 3)
//! - Fixed delay between attempts (default 5 seconds)
//! - A per-attempt timeout (default 15 seconds) bounds worst-case latency
//!
//! Exhausting the attempts yields a typed [`FetchExhausted`] error rather
//! than a panic or a raw transport error: the caller decides whether to
//! skip the page or abort, and for this pipeline a failed page is never
//! fatal to the run.

use crate::config::FetchConfig;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

const USER_AGENT_VALUE: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";
const ACCEPT_VALUE: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,\
     image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";
const ACCEPT_LANGUAGE_VALUE: &str = "en-GB,en;q=0.9";

/// Trait for fetching one URL into a response body.
pub trait FetchPage {
    /// Fetch `url` and return the body text.
    async fn fetch(&self, url: &str) -> Result<String, Box<dyn Error>>;
}

/// All retry attempts for a page failed.
///
/// Carries the attempt count and the last underlying error. Page-level
/// only: the orchestrator logs it and moves on to the next page.
#[derive(Debug)]
pub struct FetchExhausted {
    pub attempts: usize,
    pub last_error: Box<dyn Error>,
}

impl fmt::Display for FetchExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetch failed after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

impl Error for FetchExhausted {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.last_error.as_ref())
    }
}

/// HTTP fetcher backed by a shared reqwest client.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a client with default headers and the per-attempt timeout.
    pub fn new(config: &FetchConfig) -> Result<Self, Box<dyn Error>> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

impl FetchPage for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, Box<dyn Error>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Decorator adding fixed-delay retries to any [`FetchPage`] implementation.
pub struct RetryFetch<T> {
    inner: T,
    max_attempts: usize,
    retry_delay: Duration,
}

impl<T> RetryFetch<T>
where
    T: FetchPage,
{
    pub fn new(inner: T, config: &FetchConfig) -> Self {
        Self {
            inner,
            // A zero attempt budget would never fetch anything.
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl<T> FetchPage for RetryFetch<T>
where
    T: FetchPage,
{
    async fn fetch(&self, url: &str) -> Result<String, Box<dyn Error>> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.inner.fetch(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    if attempt >= self.max_attempts {
                        error!(attempt, url, error = %e, "fetch exhausted retries");
                        return Err(Box::new(FetchExhausted {
                            attempts: attempt,
                            last_error: e,
                        }));
                    }
                    warn!(
                        attempt,
                        max = self.max_attempts,
                        delay = ?self.retry_delay,
                        url,
                        error = %e,
                        "fetch attempt failed; retrying"
                    );
                    sleep(self.retry_delay).await;
                }
            }
        }
    }
}
