//! Graph vocabulary: entities and the relations between them

use serde::{Deserialize, Serialize};

/// A node in the knowledge graph, keyed by `(name, label)`.
///
/// Two entities with the same name but different labels (e.g. "Mercury" the
/// planet and "Mercury" the element) are distinct nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    /// Normalized entity name (e.g. "Acme Corp")
    pub name: String,
    /// Entity type (e.g. "Organization", "Location", "Person")
    pub label: String,
}

impl Entity {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.label)
    }
}

/// A directed edge in the knowledge graph, keyed by the full
/// `(source, target, relation)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relation {
    /// Source entity name
    pub source: String,
    /// Target entity name
    pub target: String,
    /// Relation verb phrase (e.g. "FOUNDED", "LOCATED_IN")
    pub relation: String,
}

impl Relation {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation: relation.into(),
        }
    }

    /// Whether the relation touches the given entity name at either end.
    pub fn touches(&self, name: &str) -> bool {
        self.source == name || self.target == name
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source, self.relation, self.target)
    }
}
