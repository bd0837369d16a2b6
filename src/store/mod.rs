//! Durable pipeline state: the document store and the stage work queues

mod document;
mod queue;

pub use document::{DocStatus, DocumentPatch, DocumentRecord, DocumentStore, Stage};
pub use queue::{QueueSet, WorkItem, WorkQueue, CRAWL_QUEUE, EXTRACT_QUEUE, GRAPH_QUEUE};

use thiserror::Error;

/// Errors from document-store and work-queue operations.
///
/// These are durability failures: a worker loop that hits one must halt
/// rather than continue against inconsistent state, so they propagate instead
/// of being swallowed. `RecordNotFound` is the exception — it flags a
/// stage-ordering violation the caller can recover from by requeueing.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document not found: {0}")]
    RecordNotFound(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
