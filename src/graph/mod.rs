//! Knowledge graph types and the graph store collaborator

mod store;
mod types;

pub use store::{GraphError, GraphResult, GraphStore, SqliteGraph};
pub use types::{Entity, Relation};
