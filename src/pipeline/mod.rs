//! The operation pipeline.
//!
//! Multi-step mint workflows run here as background tasks on a worker pool:
//! collection mint, then item mint, then item transfer, each with its own
//! retry budget and a durable status row in the ledger. Step completion
//! enqueues the dependent step as a queue message, never as a direct call,
//! so pipeline stages stay decoupled.
//!
//! - [`status`]: the per-entity status state machines
//! - [`task`]: task and retry-budget types
//! - [`worker`]: the queue, the workers, and the step logic itself

pub mod status;
pub mod task;
pub mod worker;

pub use status::{CollectionStatus, IllegalTransition, TaskStatus};
pub use task::{QueuedTask, RetryBudget, Task};
pub use worker::{Pipeline, SubmitOutcome};

use log::info;
use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("task queue is closed")]
    QueueClosed,
}

/// Fire-and-forget sink for user-facing messages. The real messenger lives
/// outside this crate; terminal pipeline transitions report through here.
pub trait Notifier: Send + Sync {
    fn notify(&self, author_id: i64, message: &str);
}

/// Default sink: the notification only reaches the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, author_id: i64, message: &str) {
        info!("notification for author {}: {}", author_id, message);
    }
}
