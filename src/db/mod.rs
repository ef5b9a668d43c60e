//! Database layer for persistent simulation state.
//!
//! This module provides:
//! - SQLite database management behind a single connection
//! - Schema migrations for versioned upgrades
//! - Query functions for all data operations
//! - Error types for database failures
//!
//! # Schema
//!
//! Core tables:
//! - `classrooms`, `store_types`, `stores`: cohort and business configuration
//! - `scenarios`, `scenario_outcomes`, `submissions`: instructor-authored play
//! - `jobs`: per-student simulation work items
//! - `batches`: grouped oracle submissions
//! - `ledger_entries`: the append-only cash-and-inventory ledger
//! - `events`: audit log of emitted notifications
//!
//! See `migrations.rs` for the complete schema definition. The two partial
//! unique indices on `ledger_entries` and the live-job index on `jobs` are
//! load-bearing: they enforce entry uniqueness and single-in-flight at the
//! storage layer.

mod migrations;
pub mod queries;


use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl DbError {
    /// True when the underlying failure is a UNIQUE constraint violation.
    /// The ledger engine uses this to turn index conflicts into the
    /// uniqueness-invariant error instead of a generic storage failure.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database file at `path`, enable WAL mode, and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database. Used by tests and dry-run tooling.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire a lock on the connection for queries.
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }
}
