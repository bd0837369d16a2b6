//! Document store — durable per-URL pipeline state
//!
//! One `DocumentRecord` per URL, accumulating state as the document moves
//! through the crawl → extract → graph stages. All writes go through
//! [`DocumentStore::merge_update`], a read-modify-write under the connection
//! mutex that applies partial-field patches and only ever advances `status`
//! forward. A record exists in at most one work queue at a time, so exactly
//! one worker type mutates it at any moment.

use super::{StoreError, StoreResult};
use crate::graph::{Entity, Relation};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// Pipeline position of a document.
///
/// Ordering is monotonic along `Pending → Crawled → Extracted → Graphed`.
/// `Failed` sits outside that chain: it can be entered from any non-terminal
/// state and left again by a successful retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Pending,
    Crawled,
    Extracted,
    Graphed,
    Failed,
}

impl DocStatus {
    /// Position in the forward pipeline chain; `None` for `Failed`.
    fn rank(self) -> Option<u8> {
        match self {
            DocStatus::Pending => Some(0),
            DocStatus::Crawled => Some(1),
            DocStatus::Extracted => Some(2),
            DocStatus::Graphed => Some(3),
            DocStatus::Failed => None,
        }
    }

    /// Whether this status has progressed at least as far as `other`.
    ///
    /// `Failed` compares as not-having-reached anything.
    pub fn at_least(self, other: DocStatus) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }

    /// Resolve the status a record ends up in when `candidate` is merged
    /// over `current`. Never moves backward along the pipeline chain;
    /// `Failed` is accepted from anything short of `Graphed`, and any
    /// pipeline status supersedes `Failed`.
    pub fn advance(current: DocStatus, candidate: DocStatus) -> DocStatus {
        match (current.rank(), candidate.rank()) {
            (Some(cur), Some(new)) => {
                if new > cur {
                    candidate
                } else {
                    current
                }
            }
            // Candidate is Failed: terminal-but-retryable, unless already done.
            (Some(_), None) => {
                if current == DocStatus::Graphed {
                    current
                } else {
                    DocStatus::Failed
                }
            }
            // Recovering from Failed.
            (None, Some(_)) => candidate,
            (None, None) => current,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocStatus::Pending => "pending",
            DocStatus::Crawled => "crawled",
            DocStatus::Extracted => "extracted",
            DocStatus::Graphed => "graphed",
            DocStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "pending" => Ok(DocStatus::Pending),
            "crawled" => Ok(DocStatus::Crawled),
            "extracted" => Ok(DocStatus::Extracted),
            "graphed" => Ok(DocStatus::Graphed),
            "failed" => Ok(DocStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown status '{other}'"))),
        }
    }
}

impl std::fmt::Display for DocStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pipeline stage, used to attribute retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Crawl,
    Extract,
    Graph,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Crawl => "crawl",
            Stage::Extract => "extract",
            Stage::Graph => "graph",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable per-URL record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Unique key; never changes after creation.
    pub url: String,
    pub status: DocStatus,
    /// Raw page content (markdown), set by the crawl stage.
    pub raw_content: Option<String>,
    /// Extracted entities, replaced wholesale by the extract stage.
    pub entities: Vec<Entity>,
    /// Extracted relations, replaced wholesale by the extract stage.
    pub relations: Vec<Relation>,
    /// Most recent failure message; cleared on success.
    pub last_error: Option<String>,
    /// Retry counts per stage, observability only.
    pub crawl_attempts: u32,
    pub extract_attempts: u32,
    pub graph_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn attempts(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Crawl => self.crawl_attempts,
            Stage::Extract => self.extract_attempts,
            Stage::Graph => self.graph_attempts,
        }
    }
}

/// A partial-field update applied by [`DocumentStore::merge_update`].
///
/// Only the fields set on the patch are touched; `status` goes through
/// [`DocStatus::advance`] so stale updates can never move a record backward.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    status: Option<DocStatus>,
    raw_content: Option<String>,
    entities: Option<Vec<Entity>>,
    relations: Option<Vec<Relation>>,
    /// `Some(Some(msg))` records a failure, `Some(None)` clears it.
    last_error: Option<Option<String>>,
    attempt: Option<Stage>,
}

impl DocumentPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: DocStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_raw_content(mut self, content: impl Into<String>) -> Self {
        self.raw_content = Some(content.into());
        self
    }

    pub fn with_entities(mut self, entities: Vec<Entity>) -> Self {
        self.entities = Some(entities);
        self
    }

    pub fn with_relations(mut self, relations: Vec<Relation>) -> Self {
        self.relations = Some(relations);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    /// Count one failed attempt against the given stage.
    pub fn with_attempt(mut self, stage: Stage) -> Self {
        self.attempt = Some(stage);
        self
    }

    fn apply(self, record: &mut DocumentRecord) {
        if let Some(status) = self.status {
            record.status = DocStatus::advance(record.status, status);
        }
        if let Some(content) = self.raw_content {
            record.raw_content = Some(content);
        }
        if let Some(entities) = self.entities {
            record.entities = entities;
        }
        if let Some(relations) = self.relations {
            record.relations = relations;
        }
        if let Some(error) = self.last_error {
            record.last_error = error;
        }
        match self.attempt {
            Some(Stage::Crawl) => record.crawl_attempts += 1,
            Some(Stage::Extract) => record.extract_attempts += 1,
            Some(Stage::Graph) => record.graph_attempts += 1,
            None => {}
        }
        record.updated_at = Utc::now();
    }
}

/// SQLite-backed document store.
///
/// Thread-safe via an internal mutex on the connection; the mutex also scopes
/// the read-modify-write in `merge_update`, giving each URL exclusive access
/// for the duration of a merge. Every write is committed before the call
/// returns.
pub struct DocumentStore {
    conn: Mutex<Connection>,
}

impl DocumentStore {
    /// Open or create a document database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Initialize the schema. Safe to run against an existing database.
    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                url TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                raw_content TEXT,
                entities_json TEXT NOT NULL DEFAULT '[]',
                relations_json TEXT NOT NULL DEFAULT '[]',
                last_error TEXT,
                crawl_attempts INTEGER NOT NULL DEFAULT 0,
                extract_attempts INTEGER NOT NULL DEFAULT 0,
                graph_attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    /// Initialize a `Pending` record for the URL if absent.
    ///
    /// Idempotent: calling it twice is a no-op on the second call.
    pub fn create(&self, url: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO documents (url, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![url, DocStatus::Pending.as_str(), now],
        )?;
        Ok(())
    }

    /// Current record for the URL, or `None`.
    pub fn get(&self, url: &str) -> StoreResult<Option<DocumentRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::get_locked(&conn, url)
    }

    /// Atomically apply a patch to an existing record and persist it.
    ///
    /// Returns the updated record, or [`StoreError::RecordNotFound`] if the
    /// URL was never created — a stage-ordering violation on the caller's
    /// side.
    pub fn merge_update(&self, url: &str, patch: DocumentPatch) -> StoreResult<DocumentRecord> {
        let conn = self.conn.lock().unwrap();
        let mut record = Self::get_locked(&conn, url)?
            .ok_or_else(|| StoreError::RecordNotFound(url.to_string()))?;

        patch.apply(&mut record);

        conn.execute(
            "UPDATE documents SET
                status = ?2,
                raw_content = ?3,
                entities_json = ?4,
                relations_json = ?5,
                last_error = ?6,
                crawl_attempts = ?7,
                extract_attempts = ?8,
                graph_attempts = ?9,
                updated_at = ?10
             WHERE url = ?1",
            params![
                record.url,
                record.status.as_str(),
                record.raw_content,
                serde_json::to_string(&record.entities)?,
                serde_json::to_string(&record.relations)?,
                record.last_error,
                record.crawl_attempts,
                record.extract_attempts,
                record.graph_attempts,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(record)
    }

    /// All records, in URL order. Backs the deduplicated entity/relation
    /// listings exposed to the CLI.
    pub fn records(&self) -> StoreResult<Vec<DocumentRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT url, status, raw_content, entities_json, relations_json, last_error,
                    crawl_attempts, extract_attempts, graph_attempts, created_at, updated_at
             FROM documents ORDER BY url",
        )?;
        let rows = stmt.query_map([], Self::row_to_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(Self::finish_record(row?)?);
        }
        Ok(out)
    }

    /// Number of stored records.
    pub fn len(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn get_locked(conn: &Connection, url: &str) -> StoreResult<Option<DocumentRecord>> {
        let raw = conn
            .query_row(
                "SELECT url, status, raw_content, entities_json, relations_json, last_error,
                        crawl_attempts, extract_attempts, graph_attempts, created_at, updated_at
                 FROM documents WHERE url = ?1",
                params![url],
                Self::row_to_record,
            )
            .optional()?;
        raw.map(Self::finish_record).transpose()
    }

    /// First half of row deserialization: plain column extraction, inside the
    /// rusqlite callback where only `rusqlite::Error` can be returned.
    #[allow(clippy::type_complexity)]
    fn row_to_record(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(
        String,
        String,
        Option<String>,
        String,
        String,
        Option<String>,
        u32,
        u32,
        u32,
        String,
        String,
    )> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
            row.get(10)?,
        ))
    }

    /// Second half: JSON and timestamp parsing, with store-level errors.
    #[allow(clippy::type_complexity)]
    fn finish_record(
        (
            url,
            status,
            raw_content,
            entities_json,
            relations_json,
            last_error,
            crawl_attempts,
            extract_attempts,
            graph_attempts,
            created_at,
            updated_at,
        ): (
            String,
            String,
            Option<String>,
            String,
            String,
            Option<String>,
            u32,
            u32,
            u32,
            String,
            String,
        ),
    ) -> StoreResult<DocumentRecord> {
        Ok(DocumentRecord {
            url,
            status: DocStatus::parse(&status)?,
            raw_content,
            entities: serde_json::from_str(&entities_json)?,
            relations: serde_json::from_str(&relations_json)?,
            last_error,
            crawl_attempts,
            extract_attempts,
            graph_attempts,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }
}

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> DocumentStore {
        DocumentStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_is_idempotent() {
        let store = test_store();
        store.create("https://example.com").unwrap();
        store
            .merge_update(
                "https://example.com",
                DocumentPatch::new()
                    .with_raw_content("hello")
                    .with_status(DocStatus::Crawled),
            )
            .unwrap();

        // Second create must not reset the existing record.
        store.create("https://example.com").unwrap();
        let doc = store.get("https://example.com").unwrap().unwrap();
        assert_eq!(doc.status, DocStatus::Crawled);
        assert_eq!(doc.raw_content.as_deref(), Some("hello"));
    }

    #[test]
    fn get_missing_returns_none() {
        let store = test_store();
        assert!(store.get("https://nowhere.invalid").unwrap().is_none());
    }

    #[test]
    fn merge_on_missing_record_fails() {
        let store = test_store();
        let err = store
            .merge_update("https://nowhere.invalid", DocumentPatch::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::RecordNotFound(_)));
    }

    #[test]
    fn status_never_moves_backward() {
        let store = test_store();
        store.create("https://example.com").unwrap();
        store
            .merge_update(
                "https://example.com",
                DocumentPatch::new().with_status(DocStatus::Graphed),
            )
            .unwrap();

        // A stale extract-stage update must not regress the record.
        let doc = store
            .merge_update(
                "https://example.com",
                DocumentPatch::new().with_status(DocStatus::Extracted),
            )
            .unwrap();
        assert_eq!(doc.status, DocStatus::Graphed);
    }

    #[test]
    fn failed_is_retryable_but_not_after_graphed() {
        assert_eq!(
            DocStatus::advance(DocStatus::Crawled, DocStatus::Failed),
            DocStatus::Failed
        );
        assert_eq!(
            DocStatus::advance(DocStatus::Failed, DocStatus::Crawled),
            DocStatus::Crawled
        );
        assert_eq!(
            DocStatus::advance(DocStatus::Graphed, DocStatus::Failed),
            DocStatus::Graphed
        );
    }

    #[test]
    fn error_is_recorded_and_cleared() {
        let store = test_store();
        store.create("https://example.com").unwrap();

        let doc = store
            .merge_update(
                "https://example.com",
                DocumentPatch::new()
                    .with_error("connection refused")
                    .with_attempt(Stage::Crawl),
            )
            .unwrap();
        assert_eq!(doc.last_error.as_deref(), Some("connection refused"));
        assert_eq!(doc.crawl_attempts, 1);
        assert_eq!(doc.status, DocStatus::Pending);

        let doc = store
            .merge_update(
                "https://example.com",
                DocumentPatch::new()
                    .with_status(DocStatus::Crawled)
                    .with_raw_content("content")
                    .clear_error(),
            )
            .unwrap();
        assert_eq!(doc.last_error, None);
        // Attempt history survives the success.
        assert_eq!(doc.crawl_attempts, 1);
    }

    #[test]
    fn entities_and_relations_are_replaced_wholesale() {
        let store = test_store();
        store.create("https://example.com").unwrap();

        store
            .merge_update(
                "https://example.com",
                DocumentPatch::new()
                    .with_entities(vec![Entity::new("Old", "Concept")])
                    .with_relations(vec![Relation::new("Old", "Older", "knows")]),
            )
            .unwrap();
        let doc = store
            .merge_update(
                "https://example.com",
                DocumentPatch::new()
                    .with_entities(vec![Entity::new("Acme Corp", "Organization")])
                    .with_relations(vec![]),
            )
            .unwrap();

        assert_eq!(doc.entities, vec![Entity::new("Acme Corp", "Organization")]);
        assert!(doc.relations.is_empty());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.db");

        {
            let store = DocumentStore::open(&path).unwrap();
            store.create("https://example.com").unwrap();
            store
                .merge_update(
                    "https://example.com",
                    DocumentPatch::new()
                        .with_status(DocStatus::Crawled)
                        .with_raw_content("persisted"),
                )
                .unwrap();
        }

        let store = DocumentStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        let doc = store.get("https://example.com").unwrap().unwrap();
        assert_eq!(doc.status, DocStatus::Crawled);
        assert_eq!(doc.raw_content.as_deref(), Some("persisted"));
    }

    #[test]
    fn records_scan_returns_all_in_url_order() {
        let store = test_store();
        store.create("https://b.example.com").unwrap();
        store.create("https://a.example.com").unwrap();

        let records = store.records().unwrap();
        let urls: Vec<&str> = records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.example.com", "https://b.example.com"]);
    }
}
