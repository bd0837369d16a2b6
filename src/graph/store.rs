//! Graph store collaborator — idempotent upserts into the knowledge graph
//!
//! The pipeline only ever *upserts*: re-applying the same entity or relation
//! must not create duplicates or fail, because the graph stage retries whole
//! documents after partial failures. `SqliteGraph` is the bundled backend;
//! anything that can satisfy the idempotency contract can sit behind the
//! trait.

use super::types::{Entity, Relation};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Errors from graph store operations
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("graph store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for graph store operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Trait for graph store backends.
///
/// Implementations must be thread-safe (Send + Sync) and every upsert must be
/// idempotent: calling it twice with identical arguments leaves the node/edge
/// set unchanged after the second call.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert the entity node if absent; a no-op when it already exists.
    async fn upsert_entity(&self, entity: &Entity) -> GraphResult<()>;

    /// Insert the relation edge if absent; a no-op when it already exists.
    ///
    /// Both endpoint entities must already exist as nodes — callers upsert
    /// referenced entities before their relations.
    async fn upsert_relation(&self, relation: &Relation) -> GraphResult<()>;

    /// All entities, optionally filtered by label.
    async fn list_entities(&self, label: Option<&str>) -> GraphResult<Vec<Entity>>;

    /// All relations touching the named entity (as source or target),
    /// optionally filtered by relation type.
    async fn relations_for(
        &self,
        entity_name: &str,
        relation: Option<&str>,
    ) -> GraphResult<Vec<Relation>>;

    /// Total number of entity nodes.
    async fn entity_count(&self) -> GraphResult<usize>;

    /// Total number of relation edges.
    async fn relation_count(&self) -> GraphResult<usize>;
}

/// SQLite-backed graph store.
///
/// One database file with an `entities` table keyed by `(name, label)` and a
/// `relations` table keyed by `(source, target, relation)`. Upserts are
/// `INSERT OR IGNORE` on the natural key. Thread-safe via an internal mutex
/// on the connection.
pub struct SqliteGraph {
    conn: Mutex<Connection>,
}

impl SqliteGraph {
    /// Open or create a graph database at the given path.
    pub fn open(path: impl AsRef<Path>) -> GraphResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory graph store (useful for testing).
    pub fn open_in_memory() -> GraphResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Initialize the schema. Safe to run against an existing database.
    fn init_schema(conn: &Connection) -> GraphResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                name TEXT NOT NULL,
                label TEXT NOT NULL,
                PRIMARY KEY (name, label)
            );

            CREATE TABLE IF NOT EXISTS relations (
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                relation TEXT NOT NULL,
                PRIMARY KEY (source, target, relation)
            );

            CREATE INDEX IF NOT EXISTS idx_relations_target
                ON relations(target);

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl GraphStore for SqliteGraph {
    async fn upsert_entity(&self, entity: &Entity) -> GraphResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO entities (name, label) VALUES (?1, ?2)",
            params![entity.name, entity.label],
        )?;
        Ok(())
    }

    async fn upsert_relation(&self, relation: &Relation) -> GraphResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO relations (source, target, relation) VALUES (?1, ?2, ?3)",
            params![relation.source, relation.target, relation.relation],
        )?;
        Ok(())
    }

    async fn list_entities(&self, label: Option<&str>) -> GraphResult<Vec<Entity>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::new();
        match label {
            Some(label) => {
                let mut stmt = conn.prepare(
                    "SELECT name, label FROM entities WHERE label = ?1 ORDER BY name",
                )?;
                let rows = stmt.query_map(params![label], |row| {
                    Ok(Entity {
                        name: row.get(0)?,
                        label: row.get(1)?,
                    })
                })?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT name, label FROM entities ORDER BY name, label")?;
                let rows = stmt.query_map([], |row| {
                    Ok(Entity {
                        name: row.get(0)?,
                        label: row.get(1)?,
                    })
                })?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    async fn relations_for(
        &self,
        entity_name: &str,
        relation: Option<&str>,
    ) -> GraphResult<Vec<Relation>> {
        let conn = self.conn.lock().unwrap();
        let mut out = Vec::new();
        match relation {
            Some(rel) => {
                let mut stmt = conn.prepare(
                    "SELECT source, target, relation FROM relations
                     WHERE (source = ?1 OR target = ?1) AND relation = ?2
                     ORDER BY source, target",
                )?;
                let rows = stmt.query_map(params![entity_name, rel], |row| {
                    Ok(Relation {
                        source: row.get(0)?,
                        target: row.get(1)?,
                        relation: row.get(2)?,
                    })
                })?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT source, target, relation FROM relations
                     WHERE source = ?1 OR target = ?1
                     ORDER BY source, target, relation",
                )?;
                let rows = stmt.query_map(params![entity_name], |row| {
                    Ok(Relation {
                        source: row.get(0)?,
                        target: row.get(1)?,
                        relation: row.get(2)?,
                    })
                })?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    async fn entity_count(&self) -> GraphResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn relation_count(&self) -> GraphResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM relations", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
