//! Simulation execution core for classroom business-operations scenarios.
//!
//! Instructors author scenarios; students submit weekly decisions; when a
//! scenario closes, this crate simulates every student's week against an
//! external AI oracle and records the result in an append-only
//! cash-and-inventory ledger.
//!
//! # Architecture
//!
//! - `db`: SQLite persistence (jobs, batches, ledger, scenarios, events)
//! - `domain`: closed status enums, money rounding, the oracle result contract
//! - `ledger`: the continuity engine (normalization, invariants, overrides)
//! - `oracle`: the OpenAI-compatible client behind the `OracleClient` seam
//! - `prompt`: request assembly, injection hardening, reply validation
//! - `jobs`: the per-student unit of work and its snapshot
//! - `runtime`: queue, direct workers, batch orchestration, recovery
//! - `bus`: event fan-out and the notification gateway
//!
//! The only process-wide state is the `App` bundle of collaborator clients,
//! built once at startup and torn down on signal-driven shutdown.

pub mod bus;
pub mod config;
pub mod db;
pub mod domain;
pub mod jobs;
pub mod ledger;
pub mod oracle;
pub mod prompt;
pub mod runtime;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use bus::{BusNotificationSink, EventBus};
use config::Config;
use db::Database;
use ledger::LedgerEngine;
use oracle::OpenAiClient;
use runtime::orchestrator::SimulationOrchestrator;
use runtime::queue::InMemoryQueue;
use runtime::RuntimeContext;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Db(#[from] db::DbError),
}

/// The initialized collaborator set: database, bus, oracle client, queue,
/// notification sink, and the orchestrator in front of them.
pub struct App {
    pub ctx: Arc<RuntimeContext>,
    pub orchestrator: SimulationOrchestrator,
    queue: Arc<InMemoryQueue>,
}

impl App {
    pub fn build(config: Config) -> Result<Self, AppError> {
        let db = Arc::new(Database::open(&config.database_path)?);
        let bus = Arc::new(EventBus::new());
        let queue = Arc::new(InMemoryQueue::new());
        let oracle = Arc::new(OpenAiClient::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
        ));
        let sink = Arc::new(BusNotificationSink::new(db.clone(), bus.clone()));

        let ctx = Arc::new(RuntimeContext {
            ledger: LedgerEngine::new(db.clone()),
            db,
            bus,
            oracle,
            queue: queue.clone(),
            sink,
            config,
        });
        let orchestrator = SimulationOrchestrator::new(ctx.clone());
        Ok(Self {
            ctx,
            orchestrator,
            queue,
        })
    }

    /// Abort pending delayed deliveries. Durable state is in the store; the
    /// messages are reconstructed by recovery on the next start.
    pub fn shutdown(&self) {
        self.queue.cancel_scheduled();
    }
}
