//! Job model and lifecycle.
//!
//! A job is the scheduling record for simulating one student in one closed
//! scenario. It owns the snapshot captured at creation: the expected cash
//! and inventory anchors, the full calculation context, and (once built) the
//! oracle request. Workers only ever read that snapshot; later edits to
//! submissions or ledger entries never change a job already created.

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{queries, Database, DbError};
use crate::domain::outcome::InventoryState;
use crate::domain::{ErrorKind, JobState, ScenarioStatus};
use crate::oracle::types::ChatRequest;
use crate::prompt::SimulationContext;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("scenario {0} is not closed")]
    ScenarioNotClosed(String),
    #[error("no submission for scenario {scenario} and user {user}")]
    SubmissionMissing { scenario: String, user: String },
    #[error("a live job already exists for scenario {scenario} and user {user}")]
    Duplicate { scenario: String, user: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("snapshot serialization: {0}")]
    Snapshot(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::ScenarioNotClosed(_)
            | JobError::SubmissionMissing { .. }
            | JobError::Duplicate { .. } => ErrorKind::Validation,
            JobError::NotFound(_) | JobError::Snapshot(_) | JobError::Db(_) => ErrorKind::Internal,
        }
    }
}

/// Inputs for creating one job. The context snapshot and anchors are
/// captured by the orchestrator before any work is enqueued.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub classroom_id: String,
    pub scenario_id: String,
    pub user_id: String,
    pub submission_id: String,
    pub dry_run: bool,
    pub expected_cash_before: f64,
    pub expected_inventory: InventoryState,
    pub context: SimulationContext,
    pub oracle_request: Option<ChatRequest>,
}

/// Create a job for a closed scenario. Fails when the scenario is not
/// closed, the submission is missing, or a non-failed job already exists for
/// the same `(scenario, user)`. The partial unique index backs the last
/// guard against races.
pub fn create_job(db: &Database, new: NewJob) -> Result<queries::JobRow, JobError> {
    let scenario = queries::get_scenario(db, &new.scenario_id)?
        .ok_or_else(|| JobError::NotFound(format!("scenario {}", new.scenario_id)))?;
    if scenario.status != ScenarioStatus::Closed {
        return Err(JobError::ScenarioNotClosed(new.scenario_id));
    }

    if queries::get_submission(db, &new.scenario_id, &new.user_id)?.is_none() {
        return Err(JobError::SubmissionMissing {
            scenario: new.scenario_id,
            user: new.user_id,
        });
    }

    if queries::get_live_job(db, &new.scenario_id, &new.user_id)?.is_some() {
        return Err(JobError::Duplicate {
            scenario: new.scenario_id,
            user: new.user_id,
        });
    }

    let context_json = serde_json::to_string(&new.context)
        .map_err(|e| JobError::Snapshot(e.to_string()))?;
    let oracle_request_json = new
        .oracle_request
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| JobError::Snapshot(e.to_string()))?;

    let row = queries::JobRow {
        id: Uuid::new_v4().to_string(),
        classroom_id: new.classroom_id,
        scenario_id: new.scenario_id.clone(),
        user_id: new.user_id.clone(),
        submission_id: new.submission_id,
        status: JobState::Pending,
        dry_run: new.dry_run,
        attempts: 0,
        expected_cash_before: new.expected_cash_before,
        expected_refrigerated_units: new.expected_inventory.refrigerated_units as i64,
        expected_ambient_units: new.expected_inventory.ambient_units as i64,
        expected_not_for_resale_units: new.expected_inventory.not_for_resale_units as i64,
        context_fingerprint: fingerprint(&new.scenario_id, &new.user_id, 0, &context_json),
        context_json,
        oracle_request_json,
        batch_id: None,
        batch_input_file_id: None,
        batch_submitted_at: None,
        ledger_entry_id: None,
        error_kind: None,
        error_message: None,
        error_at: None,
        error_attempt: None,
        warning_kind: None,
        created_at: Utc::now().to_rfc3339(),
        started_at: None,
        finished_at: None,
    };

    queries::insert_job(db, &row).map_err(|e| {
        if e.is_unique_violation() {
            JobError::Duplicate {
                scenario: row.scenario_id.clone(),
                user: row.user_id.clone(),
            }
        } else {
            JobError::Db(e)
        }
    })?;

    tracing::debug!(job = %row.id, scenario = %row.scenario_id, user = %row.user_id, "job created");
    Ok(row)
}

/// Idempotency fingerprint over the snapshot and attempt counter.
pub fn fingerprint(scenario_id: &str, user_id: &str, attempt: i64, context_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scenario_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(user_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(attempt.to_le_bytes());
    hasher.update(b"\x1f");
    hasher.update(context_json.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deserialize a job's frozen calculation context.
pub fn job_context(job: &queries::JobRow) -> Result<SimulationContext, JobError> {
    serde_json::from_str(&job.context_json).map_err(|e| JobError::Snapshot(e.to_string()))
}

/// Deserialize the oracle request persisted on a job, if any.
pub fn job_oracle_request(job: &queries::JobRow) -> Result<Option<ChatRequest>, JobError> {
    job.oracle_request_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| JobError::Snapshot(e.to_string()))
}
