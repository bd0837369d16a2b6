//! Pipeline orchestrator — wires the stores, queues, and collaborators
//! together and drives the three worker loops
//!
//! All shared state is passed in as explicit handles (store, queue set,
//! collaborator trait objects) constructed once at startup — tests substitute
//! in-memory stores and mock collaborators through the same constructor the
//! binary uses.

use crate::config::Config;
use crate::crawl::Crawler;
use crate::extract::Extractor;
use crate::graph::{Entity, GraphStore, Relation};
use crate::store::{DocStatus, DocumentRecord, DocumentStore, QueueSet, StoreError, WorkItem};
use crate::worker::{self, ExtractWorker, GraphWorker, UrlWorker};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

/// File names inside the document-store directory.
const DOCUMENTS_DB: &str = "documents.db";
const QUEUES_DB: &str = "queues.db";

/// Errors surfaced to the pipeline's callers (the CLI).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Outcome of scheduling a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// A work item was pushed onto the crawl queue.
    Scheduled,
    /// The document is already fully processed and the cache was honored.
    AlreadyComplete,
}

pub struct Pipeline {
    store: Arc<DocumentStore>,
    queues: QueueSet,
    crawler: Arc<dyn Crawler>,
    extractor: Arc<dyn Extractor>,
    graph: Arc<dyn GraphStore>,
    check_period: Duration,
}

impl Pipeline {
    /// Assemble a pipeline from explicit shared handles.
    pub fn new(
        store: Arc<DocumentStore>,
        queues: QueueSet,
        crawler: Arc<dyn Crawler>,
        extractor: Arc<dyn Extractor>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            store,
            queues,
            crawler,
            extractor,
            graph,
            check_period: Duration::from_secs(10),
        }
    }

    /// Override the idle period between queue checks.
    pub fn with_check_period(mut self, period: Duration) -> Self {
        self.check_period = period;
        self
    }

    /// Open the durable stores at the configured paths and assemble a
    /// pipeline around the given collaborators.
    pub fn open(
        config: &Config,
        crawler: Arc<dyn Crawler>,
        extractor: Arc<dyn Extractor>,
        graph: Arc<dyn GraphStore>,
    ) -> PipelineResult<Self> {
        let store = Arc::new(DocumentStore::open(
            config.document_db_path.join(DOCUMENTS_DB),
        )?);
        let queues = QueueSet::open(config.document_db_path.join(QUEUES_DB))?;
        Ok(Self::new(store, queues, crawler, extractor, graph)
            .with_check_period(config.queue_check_period()))
    }

    /// Schedule a URL for ingestion.
    ///
    /// Creates the document record if absent and pushes a crawl work item,
    /// unless the document is already `Graphed` and the cache is honored.
    pub fn enqueue_url(&self, url: &str, ignore_cache: bool) -> PipelineResult<Enqueue> {
        // Parse for validation, keep the normalized form as the key.
        let url = url::Url::parse(url)?.to_string();

        self.store.create(&url)?;
        if !ignore_cache {
            if let Some(doc) = self.store.get(&url)? {
                if doc.status == DocStatus::Graphed {
                    info!(%url, "already graphed, not enqueueing");
                    return Ok(Enqueue::AlreadyComplete);
                }
            }
        }

        self.queues
            .crawl
            .push(&WorkItem::new(&url).with_ignore_cache(ignore_cache))?;
        info!(%url, ignore_cache, "url enqueued");
        Ok(Enqueue::Scheduled)
    }

    /// Snapshot of the document record, or `None` for an unknown URL.
    pub fn document(&self, url: &str) -> PipelineResult<Option<DocumentRecord>> {
        Ok(self.store.get(url)?)
    }

    /// All extracted entities across all documents, deduplicated by
    /// `(name, label)`.
    pub fn list_entities(&self) -> PipelineResult<Vec<Entity>> {
        let mut seen = BTreeSet::new();
        for record in self.store.records()? {
            seen.extend(record.entities);
        }
        Ok(seen.into_iter().collect())
    }

    /// All extracted relations touching the named entity, deduplicated by
    /// the full triple.
    pub fn list_relations(&self, entity_name: &str) -> PipelineResult<Vec<Relation>> {
        let mut seen = BTreeSet::new();
        for record in self.store.records()? {
            seen.extend(
                record
                    .relations
                    .into_iter()
                    .filter(|r| r.touches(entity_name)),
            );
        }
        Ok(seen.into_iter().collect())
    }

    /// Run the three stage workers concurrently until shutdown is signalled.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let url_worker = UrlWorker::new(
            self.store.clone(),
            self.queues.crawl.clone(),
            self.queues.extract.clone(),
            self.crawler.clone(),
        );
        let extract_worker = ExtractWorker::new(
            self.store.clone(),
            self.queues.extract.clone(),
            self.queues.graph.clone(),
            self.extractor.clone(),
        );
        let graph_worker = GraphWorker::new(
            self.store.clone(),
            self.queues.graph.clone(),
            self.graph.clone(),
        );

        info!("starting pipeline workers");
        tokio::join!(
            worker::run(&url_worker, self.check_period, shutdown.clone()),
            worker::run(&extract_worker, self.check_period, shutdown.clone()),
            worker::run(&graph_worker, self.check_period, shutdown),
        );
        info!("pipeline stopped");
    }
}
