//! Worker loops — one concurrent loop per pipeline stage
//!
//! Each worker exposes a single [`Worker::tick`]: pop one item, process it,
//! report whether anything was there to process. The shared [`run`] loop adds
//! the scheduling around it: idle sleep between queue checks, wake-up on
//! shutdown, and the failure policy. Collaborator failures are fully
//! recovered inside `tick` (item requeued, loop continues), while a
//! durable-state failure escapes `tick` and halts the loop rather than
//! letting it run on against inconsistent state.

mod extract;
mod graph;
mod url;

pub use extract::ExtractWorker;
pub use graph::GraphWorker;
pub use url::UrlWorker;

use crate::store::StoreResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Fixed delay before a failed item becomes eligible again. There is no
/// maximum-attempt cutoff: a permanently failing item keeps retrying at this
/// cadence with its attempt counter ticking up.
pub const RETRY_DELAY: Duration = Duration::from_secs(10);

/// A pipeline stage worker.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Process at most one queued item. Returns `false` when the queue was
    /// empty (the caller sleeps before checking again). Collaborator and
    /// ordering failures are handled internally; only durable-state errors
    /// propagate.
    async fn tick(&self) -> StoreResult<bool>;
}

/// Drive a worker until shutdown is signalled.
///
/// Idle loops re-check their queue every `check_period`; the shutdown signal
/// interrupts the sleep so the process stops promptly.
pub async fn run(worker: &dyn Worker, check_period: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(worker = worker.name(), "worker started");

    while !*shutdown.borrow() {
        match worker.tick().await {
            Ok(true) => {}
            Ok(false) => {
                tokio::select! {
                    _ = tokio::time::sleep(check_period) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            // Sender dropped: treat as shutdown.
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!(worker = worker.name(), error = %e, "durable state failure, halting worker");
                break;
            }
        }
    }

    info!(worker = worker.name(), "worker stopped");
}
