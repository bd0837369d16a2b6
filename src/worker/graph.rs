//! Graph stage: graph-queue → idempotent upserts into the graph store

use super::{Worker, RETRY_DELAY};
use crate::graph::{Entity, GraphError, GraphStore, Relation};
use crate::store::{
    DocStatus, DocumentPatch, DocumentStore, Stage, StoreError, StoreResult, WorkQueue,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Label given to relation endpoints that are not in the document's own
/// entity list.
const PLACEHOLDER_LABEL: &str = "Unknown";

pub struct GraphWorker {
    store: Arc<DocumentStore>,
    graph_queue: WorkQueue,
    graph: Arc<dyn GraphStore>,
    retry_delay: Duration,
}

impl GraphWorker {
    pub fn new(
        store: Arc<DocumentStore>,
        graph_queue: WorkQueue,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            store,
            graph_queue,
            graph,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Override the retry delay (tests drive retries without waiting).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Upsert the document's entities, placeholder nodes for relation
    /// endpoints the extraction did not list, and finally the relations.
    /// Every call is idempotent, so a retry after a partial failure simply
    /// reapplies what already landed.
    async fn upsert_document(
        &self,
        entities: &[Entity],
        relations: &[Relation],
    ) -> Result<(), GraphError> {
        let mut known: HashSet<&str> = HashSet::new();
        for entity in entities {
            self.graph.upsert_entity(entity).await?;
            known.insert(entity.name.as_str());
        }

        for relation in relations {
            for endpoint in [&relation.source, &relation.target] {
                if known.insert(endpoint.as_str()) {
                    self.graph
                        .upsert_entity(&Entity::new(endpoint.clone(), PLACEHOLDER_LABEL))
                        .await?;
                }
            }
        }

        for relation in relations {
            self.graph.upsert_relation(relation).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for GraphWorker {
    fn name(&self) -> &'static str {
        "graph-worker"
    }

    async fn tick(&self) -> StoreResult<bool> {
        let Some(item) = self.graph_queue.try_pop()? else {
            return Ok(false);
        };

        let Some(doc) = self.store.get(&item.url)? else {
            error!(url = %item.url, "document missing at graph stage, requeueing");
            self.graph_queue.requeue(&item.retry(), self.retry_delay)?;
            return Ok(true);
        };

        info!(
            url = %item.url,
            item = %item.id,
            attempt = item.attempt,
            entities = doc.entities.len(),
            relations = doc.relations.len(),
            "updating graph"
        );
        match self.upsert_document(&doc.entities, &doc.relations).await {
            Ok(()) => {
                match self.store.merge_update(
                    &item.url,
                    DocumentPatch::new()
                        .with_status(DocStatus::Graphed)
                        .clear_error(),
                ) {
                    Ok(_) => info!(url = %item.url, "graph updated"),
                    Err(StoreError::RecordNotFound(_)) => {
                        error!(url = %item.url, "document record vanished during graph update, requeueing");
                        self.graph_queue.requeue(&item.retry(), self.retry_delay)?;
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => {
                warn!(url = %item.url, attempt = item.attempt, error = %e, "graph update failed, requeueing");
                match self.store.merge_update(
                    &item.url,
                    DocumentPatch::new()
                        .with_error(e.to_string())
                        .with_attempt(Stage::Graph),
                ) {
                    Ok(_) | Err(StoreError::RecordNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                self.graph_queue.requeue(&item.retry(), self.retry_delay)?;
            }
        }
        Ok(true)
    }
}
