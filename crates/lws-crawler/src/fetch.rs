use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, COOKIE};
use url::Url;

use crate::config::{CrawlerConfig, RetryPolicy};
use crate::cookies::CookieBundle;
use crate::error::FetchError;
use crate::stealth::StealthHeaders;

/// An authenticated page request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub headers: StealthHeaders,
    pub cookies: Arc<CookieBundle>,
}

/// A downloaded page.
#[derive(Debug, Clone)]
pub struct Page {
    /// The URL that was asked for
    pub requested_url: String,
    /// The URL the page was served from, after redirects
    pub url: String,
    pub status: u16,
    pub body: String,
    pub latency: Duration,
}

impl Page {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Resolves a possibly relative link against this page's URL.
    pub fn join(&self, link: &str) -> Option<String> {
        match Url::parse(link) {
            Ok(url) => Some(url.to_string()),
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&self.url)
                .and_then(|base| base.join(link))
                .map(|url| url.to_string())
                .ok(),
            Err(_) => None,
        }
    }
}

/// Downloads pages on behalf of the crawl driver.
#[async_trait]
pub trait Fetcher: Send {
    async fn fetch(&mut self, request: &FetchRequest) -> Result<Page, FetchError>;

    /// Releases the underlying resources once the crawl is over.
    async fn close(&mut self) {}
}

/// Plain HTTP downloads, cookies sent through the `Cookie` header.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &CrawlerConfig) -> anyhow::Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .deflate(true)
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&mut self, request: &FetchRequest) -> Result<Page, FetchError> {
        let url = Url::parse(&request.url).map_err(|e| FetchError::Transport {
            url: request.url.clone(),
            cause: e.into(),
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in request.headers.iter() {
            let name = match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) if name != ACCEPT_ENCODING => name,
                _ => continue,
            };
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
        if let Some(cookie) = request.cookies.header_for(&url, Utc::now()) {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                headers.insert(COOKIE, value);
            }
        }

        let start = Instant::now();
        let resp = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| transport_error(&request.url, e))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| transport_error(&request.url, e))?;

        Ok(Page {
            requested_url: request.url.clone(),
            url: final_url,
            status,
            body,
            latency: start.elapsed(),
        })
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            cause: e.into(),
        }
    }
}

/// Retries failed downloads and retryable HTTP statuses with a doubling backoff.
#[derive(Debug)]
pub struct RetryFetcher<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F> RetryFetcher<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

#[async_trait]
impl<F> Fetcher for RetryFetcher<F>
where
    F: Fetcher,
{
    async fn fetch(&mut self, request: &FetchRequest) -> Result<Page, FetchError> {
        let mut attempt = 0;
        loop {
            let err = match self.inner.fetch(request).await {
                Ok(page) if self.policy.is_retryable(page.status) => FetchError::Status {
                    url: request.url.clone(),
                    status: page.status,
                },
                Ok(page) => return Ok(page),
                Err(e @ FetchError::Status { .. }) => return Err(e),
                Err(e) => e,
            };

            if attempt >= self.policy.max_retries {
                log::error!("Gave up retrying {} after {attempt} retries", request.url);
                return Err(err);
            }
            let backoff = self.policy.backoff(attempt);
            attempt += 1;
            log::warn!(
                "Retrying {} ({attempt}/{}) in {:.1}s: {err}",
                request.url,
                self.policy.max_retries,
                backoff.as_secs_f32()
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn close(&mut self) {
        self.inner.close().await
    }
}
