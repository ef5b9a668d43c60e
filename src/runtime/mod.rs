//! Simulation runtime: queue, workers, orchestration, recovery.
//!
//! The runtime owns no domain logic of its own. It moves jobs through their
//! state machine, carries oracle replies into the ledger through the
//! validator, and reports status through the bus.
//!
//! # Sub-modules
//!
//! - `queue`: the queue seam and the in-process implementation
//! - `backoff`: retry delays and poll cadence
//! - `direct`: per-job synchronous execution workers (direct mode)
//! - `batch`: batch submit/poll/fan-out (batch mode)
//! - `orchestrator`: scenario-closed handling, job creation, mode routing
//! - `recovery`: startup recovery of interrupted work

pub mod backoff;
pub mod batch;
pub mod direct;
pub mod orchestrator;
pub mod queue;
pub mod recovery;


use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::bus::{EventBus, NotificationSink};
use crate::config::Config;
use crate::db::{Database, DbError};
use crate::domain::ErrorKind;
use crate::jobs::JobError;
use crate::ledger::{LedgerEngine, LedgerError};
use crate::oracle::{OracleClient, OracleError};
use crate::prompt::validate::ValidateError;
use crate::prompt::PromptError;

use queue::{JobQueue, QueueError, Topic};

/// Everything a worker needs, built once at startup and shared by `Arc`.
pub struct RuntimeContext {
    pub db: Arc<Database>,
    pub bus: Arc<EventBus>,
    pub ledger: LedgerEngine,
    pub oracle: Arc<dyn OracleClient>,
    pub queue: Arc<dyn JobQueue>,
    pub sink: Arc<dyn NotificationSink>,
    pub config: Config,
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Reply(#[from] ValidateError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("pack file io: {0}")]
    Io(#[from] std::io::Error),
    #[error("oracle call exceeded the {0}s deadline")]
    Deadline(u64),
    #[error("snapshot serialization: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl SimError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SimError::Job(e) => e.kind(),
            SimError::Ledger(e) => e.kind(),
            SimError::Oracle(e) => e.kind(),
            SimError::Prompt(_) => ErrorKind::Validation,
            SimError::Reply(e) => e.kind(),
            SimError::Deadline(_) => ErrorKind::OracleTransient,
            SimError::Db(_) | SimError::Queue(_) | SimError::Io(_) | SimError::Snapshot(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Spawn the configured worker pools. Handles are aborted on shutdown.
pub fn spawn_workers(ctx: &Arc<RuntimeContext>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for index in 0..ctx.config.direct_worker_concurrency {
        let ctx = Arc::clone(ctx);
        handles.push(tokio::spawn(async move {
            direct::run_worker(ctx, index).await;
        }));
    }
    for index in 0..ctx.config.batch_worker_concurrency {
        let ctx = Arc::clone(ctx);
        handles.push(tokio::spawn(async move {
            batch::run_worker(ctx, index).await;
        }));
    }
    handles
}

/// Log-and-continue wrapper for worker loops: a failed message never kills
/// the worker.
pub(crate) fn log_worker_error(topic: Topic, error: &SimError) {
    tracing::error!(topic = topic.as_str(), kind = %error.kind(), "message handling failed: {error}");
}
