//! One worker's scrape of a contiguous page range.

use crate::error::{Result, ScrapeError};
use crate::models::PageRange;
use crate::page_finder::PageProber;
use crate::temp_file::TempFile;
use async_trait::async_trait;
use jobsdb_cloudnode::{PageRequest, PageResult, ProbeReply, ProbeRequest, Region};
use log::{debug, info};
use reqwest::Client;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Timeout for a single cloudnode request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Fetches one listing page
#[async_trait]
pub trait PageScraper: Send + Sync {
    async fn scrape_page(
        &self,
        page: u32,
        region: Region,
        keywords: Option<&str>,
    ) -> anyhow::Result<PageResult>;
}

/// Produces a scraper for a worker listening on `port`
pub trait ScraperConnector: Send + Sync {
    fn connect(&self, index: usize, port: u16) -> Result<Arc<dyn PageScraper>>;
}

/// HTTP client for a cloudnode's API
#[derive(Debug, Clone)]
pub struct CloudNodeClient {
    client: Client,
    base_url: String,
}

impl CloudNodeClient {
    /// Client for a cloudnode on localhost
    pub fn new(port: u16) -> Result<Self> {
        Self::with_base_url(format!("http://127.0.0.1:{}", port))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(anyhow::Error::from)?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> anyhow::Result<R>
    where
        B: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("CloudNode returned {}: {}", status, body);
        }

        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl PageScraper for CloudNodeClient {
    async fn scrape_page(
        &self,
        page: u32,
        region: Region,
        keywords: Option<&str>,
    ) -> anyhow::Result<PageResult> {
        let request = PageRequest {
            page,
            region,
            keywords: keywords.map(str::to_string),
        };
        self.post("/api/scrape", &request).await
    }
}

#[async_trait]
impl PageProber for CloudNodeClient {
    async fn is_zero_results(&self, page: u32, region: Region) -> anyhow::Result<Option<bool>> {
        let reply: ProbeReply = self.post("/api/probe", &ProbeRequest { page, region }).await?;
        Ok(reply.zero_results)
    }
}

/// Connects to cloudnodes over HTTP
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

impl ScraperConnector for HttpConnector {
    fn connect(&self, _index: usize, port: u16) -> Result<Arc<dyn PageScraper>> {
        Ok(Arc::new(CloudNodeClient::new(port)?))
    }
}

/// Scrapes `range` through one worker and appends each page to `output`
pub struct ScrapeOperation {
    pub index: usize,
    pub range: PageRange,
    pub port: u16,
    region: Region,
    keywords: Option<String>,
    output: Arc<TempFile>,
    scraper: Arc<dyn PageScraper>,
    pages_scraped: Arc<AtomicU32>,
    cancel: CancellationToken,
}

impl ScrapeOperation {
    pub fn new(
        index: usize,
        range: PageRange,
        port: u16,
        region: Region,
        keywords: Option<String>,
        output: Arc<TempFile>,
        scraper: Arc<dyn PageScraper>,
    ) -> Self {
        Self {
            index,
            range,
            port,
            region,
            keywords,
            output,
            scraper,
            pages_scraped: Arc::new(AtomicU32::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop at the next page boundary, or mid-fetch, once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Counter of pages written so far, readable while the operation runs
    pub fn progress(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.pages_scraped)
    }

    /// Scrape every page in order, stopping at the first failure or on
    /// cancellation
    ///
    /// Each page is written as pretty-printed JSON followed by `",\n"`.
    pub async fn run(self) -> Result<u32> {
        let target = format!("scrape_op{}", self.index);
        info!(
            target: &target,
            "Operation {} scraping pages {} of {} via port {}",
            self.index, self.range, self.region, self.port
        );

        for page in self.range.pages() {
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(target: &target, "Operation {} interrupted before page {}", self.index, page);
                    return Err(ScrapeError::Interrupted);
                }
                fetched = self.scraper.scrape_page(page, self.region, self.keywords.as_deref()) => fetched,
            };
            let result = fetched.map_err(|e| ScrapeError::ScrapeStepFailure {
                page,
                reason: format!("{:#}", e),
            })?;

            let mut entry = serde_json::to_string_pretty(&result)?;
            entry.push_str(",\n");
            self.output.append(&entry).await?;

            let done = self.pages_scraped.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                target: &target,
                "Operation {} wrote page {} ({} jobs), {}/{}",
                self.index,
                page,
                result.page.jobs.len(),
                done,
                self.range.len()
            );
        }

        info!(target: &target, "Operation {} finished pages {}", self.index, self.range);
        Ok(self.pages_scraped.load(Ordering::SeqCst))
    }
}
