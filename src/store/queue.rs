//! Durable work queues — one per pipeline stage
//!
//! Items are persisted before `push` returns and removed at pop time, so a
//! restart recovers everything not yet popped. A crash between pop and
//! completion can lose at most that one item's progress: delivery is
//! at-least-once, not exactly-once.
//!
//! Requeued items carry a `not_before` deadline checked at pop time; once the
//! deadline passes they are eligible again in insertion order, so a retried
//! item is always eventually retried.

use super::StoreResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Names of the three stage queues.
pub const CRAWL_QUEUE: &str = "crawl";
pub const EXTRACT_QUEUE: &str = "extract";
pub const GRAPH_QUEUE: &str = "graph";

/// A unit of pipeline work: one URL at one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable id across retries, for log correlation.
    pub id: Uuid,
    pub url: String,
    pub enqueued_at: DateTime<Utc>,
    /// How many times this item has already failed at its stage.
    #[serde(default)]
    pub attempt: u32,
    /// Force reprocessing even when the document looks complete.
    #[serde(default)]
    pub ignore_cache: bool,
}

impl WorkItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            enqueued_at: Utc::now(),
            attempt: 0,
            ignore_cache: false,
        }
    }

    pub fn with_ignore_cache(mut self, ignore_cache: bool) -> Self {
        self.ignore_cache = ignore_cache;
        self
    }

    /// The same work, one failure later.
    pub fn retry(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

/// A named durable FIFO queue.
///
/// Cheap to clone; clones share the underlying connection. Each queue is
/// pushed by one upstream stage (plus itself on retry) and popped by exactly
/// one worker, and the connection mutex covers the remaining push/pop races.
#[derive(Clone)]
pub struct WorkQueue {
    conn: Arc<Mutex<Connection>>,
    name: String,
}

impl WorkQueue {
    /// Durably append an item. A failed write propagates — silently dropping
    /// a work item would lose the document it carries.
    pub fn push(&self, item: &WorkItem) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO work_items (queue, item_json, not_before) VALUES (?1, ?2, NULL)",
            params![self.name, serde_json::to_string(item)?],
        )?;
        Ok(())
    }

    /// Durably append an item that must not be reprocessed before `delay`
    /// has elapsed.
    pub fn requeue(&self, item: &WorkItem, delay: Duration) -> StoreResult<()> {
        let not_before = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO work_items (queue, item_json, not_before) VALUES (?1, ?2, ?3)",
            params![self.name, serde_json::to_string(item)?, not_before],
        )?;
        Ok(())
    }

    /// Remove and return the oldest eligible item, or `None`. Never blocks.
    pub fn try_pop(&self) -> StoreResult<Option<WorkItem>> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().unwrap();
        let head: Option<(i64, String)> = conn
            .query_row(
                "SELECT seq, item_json FROM work_items
                 WHERE queue = ?1 AND (not_before IS NULL OR not_before <= ?2)
                 ORDER BY seq LIMIT 1",
                params![self.name, now],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((seq, item_json)) = head else {
            return Ok(None);
        };
        conn.execute("DELETE FROM work_items WHERE seq = ?1", params![seq])?;
        Ok(Some(serde_json::from_str(&item_json)?))
    }

    /// Number of items currently queued, including not-yet-eligible retries.
    pub fn len(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM work_items WHERE queue = ?1",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The three stage queues, sharing one database file.
#[derive(Clone)]
pub struct QueueSet {
    pub crawl: WorkQueue,
    pub extract: WorkQueue,
    pub graph: WorkQueue,
}

impl QueueSet {
    /// Open or create the queue database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory queue set (useful for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        Self::init_schema(&conn)?;
        let conn = Arc::new(Mutex::new(conn));
        Ok(Self {
            crawl: WorkQueue {
                conn: conn.clone(),
                name: CRAWL_QUEUE.to_string(),
            },
            extract: WorkQueue {
                conn: conn.clone(),
                name: EXTRACT_QUEUE.to_string(),
            },
            graph: WorkQueue {
                conn,
                name: GRAPH_QUEUE.to_string(),
            },
        })
    }

    /// Initialize the schema. Safe to run against an existing database.
    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS work_items (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                item_json TEXT NOT NULL,
                not_before INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_work_items_queue
                ON work_items(queue, seq);

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }
}
