//! Crawl stage: url-queue → crawl collaborator → document store → extract-queue

use super::{Worker, RETRY_DELAY};
use crate::crawl::Crawler;
use crate::store::{
    DocStatus, DocumentPatch, DocumentStore, Stage, StoreError, StoreResult, WorkItem, WorkQueue,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct UrlWorker {
    store: Arc<DocumentStore>,
    crawl_queue: WorkQueue,
    extract_queue: WorkQueue,
    crawler: Arc<dyn Crawler>,
    retry_delay: Duration,
}

impl UrlWorker {
    pub fn new(
        store: Arc<DocumentStore>,
        crawl_queue: WorkQueue,
        extract_queue: WorkQueue,
        crawler: Arc<dyn Crawler>,
    ) -> Self {
        Self {
            store,
            crawl_queue,
            extract_queue,
            crawler,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Override the retry delay (tests drive retries without waiting).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// A crawled-or-further record short-circuits the crawl unless the item
    /// asks to ignore the cache. A record stuck exactly at `Crawled` is
    /// re-driven onto the extract queue so a half-finished document still
    /// advances.
    fn cached(&self, item: &WorkItem) -> StoreResult<bool> {
        if item.ignore_cache {
            return Ok(false);
        }
        let Some(doc) = self.store.get(&item.url)? else {
            return Ok(false);
        };
        if !doc.status.at_least(DocStatus::Crawled) {
            return Ok(false);
        }

        debug!(url = %item.url, status = %doc.status, "already crawled, skipping");
        if doc.status == DocStatus::Crawled {
            self.extract_queue.push(&WorkItem::new(&item.url))?;
        }
        Ok(true)
    }
}

#[async_trait]
impl Worker for UrlWorker {
    fn name(&self) -> &'static str {
        "url-worker"
    }

    async fn tick(&self) -> StoreResult<bool> {
        let Some(item) = self.crawl_queue.try_pop()? else {
            return Ok(false);
        };

        if self.cached(&item)? {
            return Ok(true);
        }

        info!(url = %item.url, item = %item.id, attempt = item.attempt, "crawling");
        match self.crawler.fetch(&item.url).await {
            Ok(page) => {
                match self.store.merge_update(
                    &item.url,
                    DocumentPatch::new()
                        .with_raw_content(page.content)
                        .with_status(DocStatus::Crawled)
                        .clear_error(),
                ) {
                    Ok(_) => {
                        self.extract_queue.push(&WorkItem::new(&item.url))?;
                        info!(url = %item.url, "crawled and stored");
                    }
                    Err(StoreError::RecordNotFound(_)) => {
                        // Should be unreachable: enqueue creates the record.
                        error!(url = %item.url, "document record missing after crawl, requeueing");
                        self.crawl_queue.requeue(&item.retry(), self.retry_delay)?;
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => {
                warn!(url = %item.url, attempt = item.attempt, error = %e, "crawl failed, requeueing");
                match self.store.merge_update(
                    &item.url,
                    DocumentPatch::new()
                        .with_error(e.to_string())
                        .with_attempt(Stage::Crawl),
                ) {
                    Ok(_) | Err(StoreError::RecordNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                self.crawl_queue.requeue(&item.retry(), self.retry_delay)?;
            }
        }
        Ok(true)
    }
}
