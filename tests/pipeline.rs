//! End-to-end pipeline scenarios with mock collaborators.
//!
//! Workers are stepped deterministically via `tick()` so retries don't need
//! wall-clock sleeps; one final test drives the real run loop with shutdown.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use weaver::worker::{ExtractWorker, GraphWorker, UrlWorker, Worker};
use weaver::{
    DocStatus, DocumentStore, Entity, Extraction, GraphError, GraphResult, GraphStore,
    MockCrawler, MockExtractor, Pipeline, QueueSet, Relation, SqliteGraph,
};

const URL: &str = "https://example.com/";

fn acme_extraction() -> Extraction {
    Extraction {
        entities: vec![
            Entity::new("Acme Corp", "Organization"),
            Entity::new("Springfield", "Location"),
        ],
        relations: vec![Relation::new("Acme Corp", "Springfield", "based_in")],
    }
}

struct Harness {
    pipeline: Pipeline,
    store: Arc<DocumentStore>,
    queues: QueueSet,
    crawler: Arc<MockCrawler>,
    graph: Arc<SqliteGraph>,
    url_worker: UrlWorker,
    extract_worker: ExtractWorker,
    graph_worker: GraphWorker,
}

fn harness(crawler: MockCrawler, extractor: MockExtractor) -> Harness {
    harness_with_graph(crawler, extractor, |sqlite| sqlite)
}

/// Build a pipeline plus directly-steppable workers sharing its state. The
/// graph handed to the graph worker can be wrapped (e.g. with failure
/// injection) while assertions still go against the underlying SQLite store.
fn harness_with_graph(
    crawler: MockCrawler,
    extractor: MockExtractor,
    wrap_graph: impl FnOnce(Arc<SqliteGraph>) -> Arc<dyn GraphStore>,
) -> Harness {
    let store = Arc::new(DocumentStore::open_in_memory().unwrap());
    let queues = QueueSet::open_in_memory().unwrap();
    let crawler = Arc::new(crawler);
    let extractor = Arc::new(extractor);
    let sqlite_graph = Arc::new(SqliteGraph::open_in_memory().unwrap());
    let worker_graph = wrap_graph(sqlite_graph.clone());

    let pipeline = Pipeline::new(
        store.clone(),
        queues.clone(),
        crawler.clone(),
        extractor.clone(),
        worker_graph.clone(),
    );
    let url_worker = UrlWorker::new(
        store.clone(),
        queues.crawl.clone(),
        queues.extract.clone(),
        crawler.clone(),
    )
    .with_retry_delay(Duration::ZERO);
    let extract_worker = ExtractWorker::new(
        store.clone(),
        queues.extract.clone(),
        queues.graph.clone(),
        extractor,
    )
    .with_retry_delay(Duration::ZERO);
    let graph_worker = GraphWorker::new(store.clone(), queues.graph.clone(), worker_graph)
        .with_retry_delay(Duration::ZERO);

    Harness {
        pipeline,
        store,
        queues,
        crawler,
        graph: sqlite_graph,
        url_worker,
        extract_worker,
        graph_worker,
    }
}

impl Harness {
    /// Tick all three workers until a full pass does no work.
    async fn settle(&self) {
        for _ in 0..32 {
            let mut progressed = false;
            progressed |= self.url_worker.tick().await.unwrap();
            progressed |= self.extract_worker.tick().await.unwrap();
            progressed |= self.graph_worker.tick().await.unwrap();
            if !progressed {
                return;
            }
        }
        panic!("pipeline did not settle within the tick budget");
    }

    fn status(&self, url: &str) -> DocStatus {
        self.store.get(url).unwrap().unwrap().status
    }
}

// --- Scenario: enqueue → crawl → extract → graph, end to end ---

#[tokio::test]
async fn document_flows_through_all_three_stages() {
    let h = harness(
        MockCrawler::new().with_page(URL, "Acme Corp is based in Springfield."),
        MockExtractor::new().returning(acme_extraction()),
    );

    h.pipeline.enqueue_url(URL, false).unwrap();
    assert_eq!(h.status(URL), DocStatus::Pending);

    h.settle().await;

    let doc = h.store.get(URL).unwrap().unwrap();
    assert_eq!(doc.status, DocStatus::Graphed);
    assert_eq!(
        doc.raw_content.as_deref(),
        Some("Acme Corp is based in Springfield.")
    );
    assert_eq!(doc.last_error, None);

    // Graph holds exactly 2 nodes and 1 edge.
    assert_eq!(h.graph.entity_count().await.unwrap(), 2);
    assert_eq!(h.graph.relation_count().await.unwrap(), 1);

    // The CLI-facing listing returns exactly the two entities.
    let entities = h.pipeline.list_entities().unwrap();
    assert_eq!(
        entities,
        vec![
            Entity::new("Acme Corp", "Organization"),
            Entity::new("Springfield", "Location"),
        ]
    );
    let relations = h.pipeline.list_relations("Acme Corp").unwrap();
    assert_eq!(
        relations,
        vec![Relation::new("Acme Corp", "Springfield", "based_in")]
    );

    // All queues drained.
    assert!(h.queues.crawl.is_empty().unwrap());
    assert!(h.queues.extract.is_empty().unwrap());
    assert!(h.queues.graph.is_empty().unwrap());
}

// --- Scenario: crawl fails twice, then succeeds on the third attempt ---

#[tokio::test]
async fn crawl_recovers_after_two_failures() {
    let h = harness(
        MockCrawler::new()
            .with_page(URL, "Acme Corp is based in Springfield.")
            .with_failures(URL, 2),
        MockExtractor::new().returning(acme_extraction()),
    );

    h.pipeline.enqueue_url(URL, false).unwrap();

    // First two pops fail and requeue.
    assert!(h.url_worker.tick().await.unwrap());
    let doc = h.store.get(URL).unwrap().unwrap();
    assert_eq!(doc.status, DocStatus::Pending);
    assert!(doc.last_error.is_some());

    assert!(h.url_worker.tick().await.unwrap());
    assert_eq!(h.store.get(URL).unwrap().unwrap().crawl_attempts, 2);

    // Third pop succeeds.
    assert!(h.url_worker.tick().await.unwrap());
    let doc = h.store.get(URL).unwrap().unwrap();
    assert_eq!(doc.status, DocStatus::Crawled);
    assert_eq!(doc.crawl_attempts, 2);
    assert_eq!(doc.last_error, None);
    assert_eq!(h.crawler.fetch_count(URL), 3);

    // Exactly three url-queue pops were needed; the queue is now empty.
    assert!(!h.url_worker.tick().await.unwrap());
}

// --- Scenario: at-least-once — a failing item is retried, never dropped ---

#[tokio::test]
async fn permanently_failing_crawl_stays_queued_with_error() {
    let h = harness(MockCrawler::new(), MockExtractor::new());

    h.pipeline.enqueue_url(URL, false).unwrap();

    for expected_attempts in 1..=5u32 {
        assert!(h.url_worker.tick().await.unwrap());
        let doc = h.store.get(URL).unwrap().unwrap();
        assert_eq!(doc.crawl_attempts, expected_attempts);
        assert!(doc.last_error.is_some());
        // The item is always back in the queue, never silently dropped.
        assert_eq!(h.queues.crawl.len().unwrap(), 1);
    }
}

// --- Scenario: cache bypass re-crawls a graphed document ---

#[tokio::test]
async fn ignore_cache_recrawls_a_graphed_document() {
    let h = harness(
        MockCrawler::new().with_page(URL, "Acme Corp is based in Springfield."),
        MockExtractor::new().returning(acme_extraction()),
    );

    h.pipeline.enqueue_url(URL, false).unwrap();
    h.settle().await;
    assert_eq!(h.status(URL), DocStatus::Graphed);
    assert_eq!(h.crawler.fetch_count(URL), 1);

    // Honoring the cache: no new work item.
    assert_eq!(
        h.pipeline.enqueue_url(URL, false).unwrap(),
        weaver::Enqueue::AlreadyComplete
    );

    // Bypassing it: the document is re-crawled and re-graphed.
    assert_eq!(
        h.pipeline.enqueue_url(URL, true).unwrap(),
        weaver::Enqueue::Scheduled
    );
    h.settle().await;
    assert_eq!(h.crawler.fetch_count(URL), 2);

    // Idempotent upserts: reprocessing did not duplicate graph state.
    assert_eq!(h.graph.entity_count().await.unwrap(), 2);
    assert_eq!(h.graph.relation_count().await.unwrap(), 1);
}

// --- Scenario: graph failure mid-document requeues and completes on retry ---

/// Graph wrapper that fails exactly one upsert call (1-based index).
struct FlakyGraph {
    inner: Arc<SqliteGraph>,
    fail_on_call: u32,
    calls: Mutex<u32>,
}

impl FlakyGraph {
    fn fail_on(inner: Arc<SqliteGraph>, fail_on_call: u32) -> Self {
        Self {
            inner,
            fail_on_call,
            calls: Mutex::new(0),
        }
    }

    fn maybe_fail(&self) -> GraphResult<()> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if *calls == self.fail_on_call {
            return Err(GraphError::Unavailable("scripted graph failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for FlakyGraph {
    async fn upsert_entity(&self, entity: &Entity) -> GraphResult<()> {
        self.maybe_fail()?;
        self.inner.upsert_entity(entity).await
    }

    async fn upsert_relation(&self, relation: &Relation) -> GraphResult<()> {
        self.maybe_fail()?;
        self.inner.upsert_relation(relation).await
    }

    async fn list_entities(&self, label: Option<&str>) -> GraphResult<Vec<Entity>> {
        self.inner.list_entities(label).await
    }

    async fn relations_for(
        &self,
        entity_name: &str,
        relation: Option<&str>,
    ) -> GraphResult<Vec<Relation>> {
        self.inner.relations_for(entity_name, relation).await
    }

    async fn entity_count(&self) -> GraphResult<usize> {
        self.inner.entity_count().await
    }

    async fn relation_count(&self) -> GraphResult<usize> {
        self.inner.relation_count().await
    }
}

#[tokio::test]
async fn partial_graph_failure_retries_without_duplicates() {
    let h = harness_with_graph(
        MockCrawler::new().with_page(URL, "Acme Corp is based in Springfield."),
        MockExtractor::new().returning(acme_extraction()),
        // The second upsert call fails: the first entity has already landed
        // when the stage aborts and requeues.
        |sqlite| Arc::new(FlakyGraph::fail_on(sqlite, 2)),
    );

    h.pipeline.enqueue_url(URL, false).unwrap();
    h.settle().await;

    let doc = h.store.get(URL).unwrap().unwrap();
    assert_eq!(doc.status, DocStatus::Graphed);
    assert_eq!(doc.graph_attempts, 1);

    // The retried document reapplied the surviving upserts without
    // duplicating them.
    assert_eq!(h.graph.entity_count().await.unwrap(), 2);
    assert_eq!(h.graph.relation_count().await.unwrap(), 1);
}

// --- Scenario: the live run loop processes a document and shuts down ---

#[tokio::test]
async fn run_loop_processes_to_graphed_and_stops_on_shutdown() {
    let store = Arc::new(DocumentStore::open_in_memory().unwrap());
    let queues = QueueSet::open_in_memory().unwrap();
    let pipeline = Pipeline::new(
        store.clone(),
        queues,
        Arc::new(MockCrawler::new().with_page(URL, "Acme Corp is based in Springfield.")),
        Arc::new(MockExtractor::new().returning(acme_extraction())),
        Arc::new(SqliteGraph::open_in_memory().unwrap()),
    )
    .with_check_period(Duration::from_millis(20));

    pipeline.enqueue_url(URL, false).unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let run = pipeline.run(rx);
    let observe = async {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(doc) = store.get(URL).unwrap() {
                    if doc.status == DocStatus::Graphed {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("document should reach graphed before the timeout");
        tx.send(true).unwrap();
    };

    tokio::join!(run, observe);

    assert_eq!(store.get(URL).unwrap().unwrap().status, DocStatus::Graphed);
}
