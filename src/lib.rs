//! Weaver: URL → Knowledge Graph Ingestion Pipeline
//!
//! A queue-driven pipeline that crawls URLs, extracts entities and relations
//! from their content via an LLM, and upserts the result into a graph store.
//! Three concurrent worker loops move each document through the
//! crawl → extract → graph stages; durable on-disk queues and a document
//! store guarantee forward progress under partial failure — a failed stage
//! requeues its item with a delay instead of losing it, and idempotent graph
//! upserts make retries safe.
//!
//! # Core Concepts
//!
//! - **DocumentRecord**: durable per-URL state accumulating pipeline results
//! - **WorkQueue**: durable FIFO queue per stage with requeue-with-delay
//! - **Collaborators**: crawler, extractor, and graph store behind traits,
//!   so tests substitute mocks through the same seams the binary uses
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use weaver::{
//!     DocumentStore, HttpCrawler, OpenRouterExtractor, Pipeline, QueueSet, SqliteGraph,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = Pipeline::new(
//!     Arc::new(DocumentStore::open("data/documents.db")?),
//!     QueueSet::open("data/queues.db")?,
//!     Arc::new(HttpCrawler::new()?),
//!     Arc::new(OpenRouterExtractor::new("api-key", "openai/gpt-4o-mini")),
//!     Arc::new(SqliteGraph::open("data/graph.db")?),
//! );
//! pipeline.enqueue_url("https://example.com", false)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crawl;
pub mod extract;
pub mod graph;
pub mod pipeline;
pub mod store;
pub mod worker;

pub use config::{Config, ConfigError};
pub use crawl::{CrawlError, CrawledPage, Crawler, HttpCrawler, MockCrawler};
pub use extract::{ExtractError, Extraction, Extractor, MockExtractor, OpenRouterExtractor};
pub use graph::{Entity, GraphError, GraphResult, GraphStore, Relation, SqliteGraph};
pub use pipeline::{Enqueue, Pipeline, PipelineError, PipelineResult};
pub use store::{
    DocStatus, DocumentPatch, DocumentRecord, DocumentStore, QueueSet, Stage, StoreError,
    StoreResult, WorkItem, WorkQueue,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
