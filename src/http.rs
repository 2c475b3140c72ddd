//! Rate limited HTTP client for scraping share-link pages.
//!
//! This module wraps `reqwest::Client` to add:
//! * Request rate limiting so that a long pasted playlist of share links
//!   does not hammer the link host
//! * Consistent timeouts and a fixed `User-Agent`
//!
//! # Example
//!
//! ```rust
//! use jukebot::http::Client;
//!
//! let client = Client::new(&config)?;
//! let page = client.get_text("https://open.spotify.com/track/abc".parse()?).await?;
//! ```

use std::{num::NonZeroU32, time::Duration};

use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderValue, ACCEPT, ACCEPT_LANGUAGE},
    Url,
};

use crate::{config::Config, error::Result};

/// HTTP client with built-in rate limiting.
pub struct Client {
    inner: reqwest::Client,
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// The rolling window requests are counted in.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Maximum requests per window. Requests beyond this are delayed.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 10;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Share pages are scraped while a user waits for a reply, so give up
    /// quickly and fall back to the raw query.
    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Pages larger than this are not worth scanning for a title.
    const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .timeout(Self::TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent)
            .build()?;

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            inner: http_client,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Fetches `url` and returns its body as text.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the server does not answer
    /// with a success status, or the body is too large.
    pub async fn get_text(&self, url: Url) -> Result<String> {
        self.rate_limiter.until_ready().await;

        trace!("GET {url}");
        let response = self.inner.get(url).send().await?.error_for_status()?;

        if response
            .content_length()
            .is_some_and(|length| length > Self::MAX_BODY_SIZE as u64)
        {
            return Err(crate::error::Error::resource_exhausted("page too large"));
        }

        Ok(response.text().await?)
    }
}
