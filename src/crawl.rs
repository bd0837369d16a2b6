//! Crawl collaborator — fetches a URL and returns its content as markdown
//!
//! Two implementations:
//! - `HttpCrawler`: reqwest GET with HTML → markdown conversion (production)
//! - `MockCrawler`: preconfigured pages and scripted failures (testing)

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("weaver/", env!("CARGO_PKG_VERSION"));

/// Errors from crawl operations. All of them are recoverable at the pipeline
/// level: the item is requeued and retried.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("markdown conversion failed: {0}")]
    Convert(String),

    #[error("crawl failed: {0}")]
    Other(String),
}

/// A successfully fetched page.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    /// Page content as markdown (or raw text for non-HTML responses).
    pub content: String,
}

/// Trait for the crawl collaborator.
#[async_trait]
pub trait Crawler: Send + Sync {
    /// Fetch the URL and return its content.
    async fn fetch(&self, url: &str) -> Result<CrawledPage, CrawlError>;
}

/// HTTP crawler backed by reqwest.
pub struct HttpCrawler {
    client: reqwest::Client,
}

impl HttpCrawler {
    pub fn new() -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Crawler for HttpCrawler {
    async fn fetch(&self, url: &str) -> Result<CrawledPage, CrawlError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(true);

        let body = response.text().await?;
        let content = if is_html {
            htmd::HtmlToMarkdown::new()
                .convert(&body)
                .map_err(|e| CrawlError::Convert(e.to_string()))?
        } else {
            body
        };

        Ok(CrawledPage { content })
    }
}

/// Mock crawler for testing — preconfigured pages, scripted failures, and a
/// per-URL call count.
#[derive(Default)]
pub struct MockCrawler {
    pages: HashMap<String, String>,
    /// Remaining scripted failures per URL, consumed before the page is served.
    failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockCrawler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve this content for the URL once any scripted failures are spent.
    pub fn with_page(mut self, url: impl Into<String>, content: impl Into<String>) -> Self {
        self.pages.insert(url.into(), content.into());
        self
    }

    /// Fail the first `count` fetches of the URL before succeeding.
    pub fn with_failures(self, url: impl Into<String>, count: u32) -> Self {
        self.failures.lock().unwrap().insert(url.into(), count);
        self
    }

    /// How many times the URL has been fetched.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Crawler for MockCrawler {
    async fn fetch(&self, url: &str) -> Result<CrawledPage, CrawlError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;

        if let Some(remaining) = self.failures.lock().unwrap().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CrawlError::Other(format!("scripted failure for {url}")));
            }
        }

        match self.pages.get(url) {
            Some(content) => Ok(CrawledPage {
                content: content.clone(),
            }),
            None => Err(CrawlError::Other(format!("no mock page for {url}"))),
        }
    }
}
