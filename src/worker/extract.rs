//! Extract stage: extract-queue → extraction collaborator → document store → graph-queue

use super::{Worker, RETRY_DELAY};
use crate::extract::Extractor;
use crate::store::{
    DocStatus, DocumentPatch, DocumentStore, Stage, StoreError, StoreResult, WorkItem, WorkQueue,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct ExtractWorker {
    store: Arc<DocumentStore>,
    extract_queue: WorkQueue,
    graph_queue: WorkQueue,
    extractor: Arc<dyn Extractor>,
    retry_delay: Duration,
}

impl ExtractWorker {
    pub fn new(
        store: Arc<DocumentStore>,
        extract_queue: WorkQueue,
        graph_queue: WorkQueue,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            store,
            extract_queue,
            graph_queue,
            extractor,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Override the retry delay (tests drive retries without waiting).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[async_trait]
impl Worker for ExtractWorker {
    fn name(&self) -> &'static str {
        "extract-worker"
    }

    async fn tick(&self) -> StoreResult<bool> {
        let Some(item) = self.extract_queue.try_pop()? else {
            return Ok(false);
        };

        // Both of these mean stage ordering was violated upstream: the crawl
        // stage should have run first. Recoverable, but loud.
        let Some(doc) = self.store.get(&item.url)? else {
            error!(url = %item.url, "document missing at extract stage, requeueing");
            self.extract_queue.requeue(&item.retry(), self.retry_delay)?;
            return Ok(true);
        };
        let Some(raw_content) = doc.raw_content else {
            error!(url = %item.url, "document has no raw content at extract stage, requeueing");
            self.extract_queue.requeue(&item.retry(), self.retry_delay)?;
            return Ok(true);
        };

        info!(url = %item.url, item = %item.id, attempt = item.attempt, "extracting entities");
        match self.extractor.extract(&raw_content).await {
            Ok(extraction) => {
                match self.store.merge_update(
                    &item.url,
                    DocumentPatch::new()
                        .with_entities(extraction.entities)
                        .with_relations(extraction.relations)
                        .with_status(DocStatus::Extracted)
                        .clear_error(),
                ) {
                    Ok(doc) => {
                        self.graph_queue.push(&WorkItem::new(&item.url))?;
                        info!(
                            url = %item.url,
                            entities = doc.entities.len(),
                            relations = doc.relations.len(),
                            "extraction stored"
                        );
                    }
                    Err(StoreError::RecordNotFound(_)) => {
                        error!(url = %item.url, "document record vanished during extraction, requeueing");
                        self.extract_queue.requeue(&item.retry(), self.retry_delay)?;
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => {
                warn!(url = %item.url, attempt = item.attempt, error = %e, "extraction failed, requeueing");
                match self.store.merge_update(
                    &item.url,
                    DocumentPatch::new()
                        .with_error(e.to_string())
                        .with_attempt(Stage::Extract),
                ) {
                    Ok(_) | Err(StoreError::RecordNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                self.extract_queue.requeue(&item.retry(), self.retry_delay)?;
            }
        }
        Ok(true)
    }
}
