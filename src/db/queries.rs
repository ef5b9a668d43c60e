use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::domain::{AutoGeneratePolicy, BatchState, ErrorKind, GenerationMethod, JobState, ScenarioStatus};

use super::{Database, DbError};

// ---------------------------------------------------------------------------
// Row types — flat structs that map directly to table columns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassroomRow {
    pub id: String,
    pub name: String,
    pub base_prompts_json: String,
    pub starting_balance: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreTypeRow {
    pub id: String,
    pub name: String,
    pub refrigerated_capacity_units: i64,
    pub ambient_capacity_units: i64,
    pub not_for_resale_capacity_units: i64,
    pub refrigerated_starting_units: i64,
    pub ambient_starting_units: i64,
    pub not_for_resale_starting_units: i64,
    pub cost_per_unit: f64,
    pub price_baseline: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRow {
    pub id: String,
    pub classroom_id: String,
    pub store_type_id: String,
    pub user_id: String,
    pub name: String,
    pub variables_json: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRow {
    pub id: String,
    pub classroom_id: String,
    pub title: String,
    pub status: ScenarioStatus,
    pub created_at: String,
    pub closed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutcomeRow {
    pub scenario_id: String,
    pub notes: String,
    pub random_event_chance_percent: i64,
    pub auto_generate_submissions: AutoGeneratePolicy,
    pub punish_absent_students: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRow {
    pub id: String,
    pub scenario_id: String,
    pub user_id: String,
    pub decisions_json: String,
    pub generation_method: GenerationMethod,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    pub id: String,
    pub classroom_id: String,
    pub scenario_id: String,
    pub user_id: String,
    pub submission_id: String,
    pub status: JobState,
    pub dry_run: bool,
    pub attempts: i64,
    pub expected_cash_before: f64,
    pub expected_refrigerated_units: i64,
    pub expected_ambient_units: i64,
    pub expected_not_for_resale_units: i64,
    pub context_json: String,
    pub context_fingerprint: String,
    pub oracle_request_json: Option<String>,
    pub batch_id: Option<String>,
    pub batch_input_file_id: Option<String>,
    pub batch_submitted_at: Option<String>,
    pub ledger_entry_id: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub error_at: Option<String>,
    pub error_attempt: Option<i64>,
    pub warning_kind: Option<ErrorKind>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRow {
    pub id: String,
    pub scenario_id: String,
    pub classroom_id: String,
    pub oracle_batch_id: Option<String>,
    pub input_file_id: Option<String>,
    pub output_file_id: Option<String>,
    pub status: BatchState,
    pub job_count: i64,
    pub submit_attempts: i64,
    pub poll_attempts: i64,
    pub submitted_at: Option<String>,
    pub finalized_at: Option<String>,
    pub created_at: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryRow {
    pub id: String,
    pub store_id: String,
    pub classroom_id: String,
    pub scenario_id: Option<String>,
    pub submission_id: Option<String>,
    pub user_id: String,
    pub sales: i64,
    pub revenue: f64,
    pub costs: f64,
    pub waste: f64,
    pub cash_before: f64,
    pub cash_after: f64,
    pub refrigerated_units: i64,
    pub ambient_units: i64,
    pub not_for_resale_units: i64,
    pub net_profit: f64,
    pub random_event: Option<String>,
    pub summary: String,
    pub education_json: String,
    pub ai_model: Option<String>,
    pub ai_run_id: Option<String>,
    pub ai_generated_at: Option<String>,
    pub calculation_context_json: Option<String>,
    pub overridden: bool,
    pub overridden_by: Option<String>,
    pub overridden_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub id: String,
    pub seq: i64,
    pub category: String,
    pub event_type: String,
    pub scenario_id: Option<String>,
    pub payload_json: String,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Column parsing helpers
// ---------------------------------------------------------------------------

fn parse_col<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn parse_opt_col<T>(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    match raw {
        Some(s) => parse_col(idx, s).map(Some),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Classroom / store configuration queries
// ---------------------------------------------------------------------------

pub fn insert_classroom(db: &Database, row: &ClassroomRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO classrooms (id, name, base_prompts_json, starting_balance, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            row.id,
            row.name,
            row.base_prompts_json,
            row.starting_balance,
            row.created_at
        ],
    )?;
    Ok(())
}

pub fn get_classroom(db: &Database, id: &str) -> Result<Option<ClassroomRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT id, name, base_prompts_json, starting_balance, created_at
         FROM classrooms WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map(params![id], |row| {
        Ok(ClassroomRow {
            id: row.get(0)?,
            name: row.get(1)?,
            base_prompts_json: row.get(2)?,
            starting_balance: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn insert_store_type(db: &Database, row: &StoreTypeRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO store_types (id, name,
            refrigerated_capacity_units, ambient_capacity_units, not_for_resale_capacity_units,
            refrigerated_starting_units, ambient_starting_units, not_for_resale_starting_units,
            cost_per_unit, price_baseline)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            row.id,
            row.name,
            row.refrigerated_capacity_units,
            row.ambient_capacity_units,
            row.not_for_resale_capacity_units,
            row.refrigerated_starting_units,
            row.ambient_starting_units,
            row.not_for_resale_starting_units,
            row.cost_per_unit,
            row.price_baseline
        ],
    )?;
    Ok(())
}

fn store_type_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoreTypeRow> {
    Ok(StoreTypeRow {
        id: row.get(0)?,
        name: row.get(1)?,
        refrigerated_capacity_units: row.get(2)?,
        ambient_capacity_units: row.get(3)?,
        not_for_resale_capacity_units: row.get(4)?,
        refrigerated_starting_units: row.get(5)?,
        ambient_starting_units: row.get(6)?,
        not_for_resale_starting_units: row.get(7)?,
        cost_per_unit: row.get(8)?,
        price_baseline: row.get(9)?,
    })
}

pub fn get_store_type(db: &Database, id: &str) -> Result<Option<StoreTypeRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT id, name,
            refrigerated_capacity_units, ambient_capacity_units, not_for_resale_capacity_units,
            refrigerated_starting_units, ambient_starting_units, not_for_resale_starting_units,
            cost_per_unit, price_baseline
         FROM store_types WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map(params![id], store_type_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

fn store_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoreRow> {
    Ok(StoreRow {
        id: row.get(0)?,
        classroom_id: row.get(1)?,
        store_type_id: row.get(2)?,
        user_id: row.get(3)?,
        name: row.get(4)?,
        variables_json: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const STORE_COLUMNS: &str =
    "id, classroom_id, store_type_id, user_id, name, variables_json, created_at";

pub fn insert_store(db: &Database, row: &StoreRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO stores (id, classroom_id, store_type_id, user_id, name, variables_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            row.id,
            row.classroom_id,
            row.store_type_id,
            row.user_id,
            row.name,
            row.variables_json,
            row.created_at
        ],
    )?;
    Ok(())
}

pub fn get_store(db: &Database, id: &str) -> Result<Option<StoreRow>, DbError> {
    let conn = db.conn();
    let mut stmt =
        conn.prepare(&format!("SELECT {STORE_COLUMNS} FROM stores WHERE id = ?1"))?;
    let mut rows = stmt.query_map(params![id], store_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn get_store_for_user(
    db: &Database,
    classroom_id: &str,
    user_id: &str,
) -> Result<Option<StoreRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {STORE_COLUMNS} FROM stores WHERE classroom_id = ?1 AND user_id = ?2"
    ))?;
    let mut rows = stmt.query_map(params![classroom_id, user_id], store_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn list_stores_for_classroom(
    db: &Database,
    classroom_id: &str,
) -> Result<Vec<StoreRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {STORE_COLUMNS} FROM stores WHERE classroom_id = ?1 ORDER BY created_at"
    ))?;
    let rows = stmt
        .query_map(params![classroom_id], store_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Scenario queries
// ---------------------------------------------------------------------------

fn scenario_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScenarioRow> {
    Ok(ScenarioRow {
        id: row.get(0)?,
        classroom_id: row.get(1)?,
        title: row.get(2)?,
        status: parse_col(3, row.get::<_, String>(3)?)?,
        created_at: row.get(4)?,
        closed_at: row.get(5)?,
    })
}

pub fn insert_scenario(db: &Database, row: &ScenarioRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO scenarios (id, classroom_id, title, status, created_at, closed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            row.id,
            row.classroom_id,
            row.title,
            row.status.as_str(),
            row.created_at,
            row.closed_at
        ],
    )?;
    Ok(())
}

pub fn get_scenario(db: &Database, id: &str) -> Result<Option<ScenarioRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT id, classroom_id, title, status, created_at, closed_at FROM scenarios WHERE id = ?1",
    )?;
    let mut rows = stmt.query_map(params![id], scenario_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn update_scenario_status(
    db: &Database,
    id: &str,
    status: ScenarioStatus,
    closed_at: Option<&str>,
) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "UPDATE scenarios SET status = ?2, closed_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), closed_at],
    )?;
    Ok(())
}

pub fn insert_scenario_outcome(db: &Database, row: &ScenarioOutcomeRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO scenario_outcomes
            (scenario_id, notes, random_event_chance_percent, auto_generate_submissions,
             punish_absent_students, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            row.scenario_id,
            row.notes,
            row.random_event_chance_percent,
            row.auto_generate_submissions.as_str(),
            row.punish_absent_students,
            row.created_at
        ],
    )?;
    Ok(())
}

pub fn get_scenario_outcome(
    db: &Database,
    scenario_id: &str,
) -> Result<Option<ScenarioOutcomeRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT scenario_id, notes, random_event_chance_percent, auto_generate_submissions,
                punish_absent_students, created_at
         FROM scenario_outcomes WHERE scenario_id = ?1",
    )?;
    let mut rows = stmt.query_map(params![scenario_id], |row| {
        Ok(ScenarioOutcomeRow {
            scenario_id: row.get(0)?,
            notes: row.get(1)?,
            random_event_chance_percent: row.get(2)?,
            auto_generate_submissions: parse_col(3, row.get::<_, String>(3)?)?,
            punish_absent_students: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Submission queries
// ---------------------------------------------------------------------------

fn submission_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubmissionRow> {
    Ok(SubmissionRow {
        id: row.get(0)?,
        scenario_id: row.get(1)?,
        user_id: row.get(2)?,
        decisions_json: row.get(3)?,
        generation_method: parse_col(4, row.get::<_, String>(4)?)?,
        created_at: row.get(5)?,
    })
}

pub fn insert_submission(db: &Database, row: &SubmissionRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO submissions (id, scenario_id, user_id, decisions_json, generation_method, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            row.id,
            row.scenario_id,
            row.user_id,
            row.decisions_json,
            row.generation_method.as_str(),
            row.created_at
        ],
    )?;
    Ok(())
}

pub fn get_submission(
    db: &Database,
    scenario_id: &str,
    user_id: &str,
) -> Result<Option<SubmissionRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT id, scenario_id, user_id, decisions_json, generation_method, created_at
         FROM submissions WHERE scenario_id = ?1 AND user_id = ?2",
    )?;
    let mut rows = stmt.query_map(params![scenario_id, user_id], submission_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

/// The user's most recent submission in an earlier scenario of the same
/// classroom. Used by the FORWARD_PREVIOUS auto-generate policy.
pub fn latest_prior_submission(
    db: &Database,
    current_scenario_id: &str,
    user_id: &str,
) -> Result<Option<SubmissionRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT s.id, s.scenario_id, s.user_id, s.decisions_json, s.generation_method, s.created_at
         FROM submissions s
         JOIN scenarios sc ON sc.id = s.scenario_id
         JOIN scenarios cur ON cur.id = ?1
         WHERE s.user_id = ?2
           AND sc.classroom_id = cur.classroom_id
           AND sc.created_at < cur.created_at
         ORDER BY sc.created_at DESC
         LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![current_scenario_id, user_id], submission_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Job queries
// ---------------------------------------------------------------------------

const JOB_COLUMNS: &str = "id, classroom_id, scenario_id, user_id, submission_id, status, dry_run,
    attempts, expected_cash_before, expected_refrigerated_units, expected_ambient_units,
    expected_not_for_resale_units, context_json, context_fingerprint, oracle_request_json,
    batch_id, batch_input_file_id, batch_submitted_at, ledger_entry_id,
    error_kind, error_message, error_at, error_attempt, warning_kind,
    created_at, started_at, finished_at";

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        classroom_id: row.get(1)?,
        scenario_id: row.get(2)?,
        user_id: row.get(3)?,
        submission_id: row.get(4)?,
        status: parse_col(5, row.get::<_, String>(5)?)?,
        dry_run: row.get(6)?,
        attempts: row.get(7)?,
        expected_cash_before: row.get(8)?,
        expected_refrigerated_units: row.get(9)?,
        expected_ambient_units: row.get(10)?,
        expected_not_for_resale_units: row.get(11)?,
        context_json: row.get(12)?,
        context_fingerprint: row.get(13)?,
        oracle_request_json: row.get(14)?,
        batch_id: row.get(15)?,
        batch_input_file_id: row.get(16)?,
        batch_submitted_at: row.get(17)?,
        ledger_entry_id: row.get(18)?,
        error_kind: parse_opt_col(19, row.get::<_, Option<String>>(19)?)?,
        error_message: row.get(20)?,
        error_at: row.get(21)?,
        error_attempt: row.get(22)?,
        warning_kind: parse_opt_col(23, row.get::<_, Option<String>>(23)?)?,
        created_at: row.get(24)?,
        started_at: row.get(25)?,
        finished_at: row.get(26)?,
    })
}

pub fn insert_job(db: &Database, row: &JobRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO jobs (id, classroom_id, scenario_id, user_id, submission_id, status, dry_run,
            attempts, expected_cash_before, expected_refrigerated_units, expected_ambient_units,
            expected_not_for_resale_units, context_json, context_fingerprint, oracle_request_json,
            batch_id, batch_input_file_id, batch_submitted_at, ledger_entry_id,
            error_kind, error_message, error_at, error_attempt, warning_kind,
            created_at, started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
        params![
            row.id,
            row.classroom_id,
            row.scenario_id,
            row.user_id,
            row.submission_id,
            row.status.as_str(),
            row.dry_run,
            row.attempts,
            row.expected_cash_before,
            row.expected_refrigerated_units,
            row.expected_ambient_units,
            row.expected_not_for_resale_units,
            row.context_json,
            row.context_fingerprint,
            row.oracle_request_json,
            row.batch_id,
            row.batch_input_file_id,
            row.batch_submitted_at,
            row.ledger_entry_id,
            row.error_kind.map(|k| k.as_str()),
            row.error_message,
            row.error_at,
            row.error_attempt,
            row.warning_kind.map(|k| k.as_str()),
            row.created_at,
            row.started_at,
            row.finished_at
        ],
    )?;
    Ok(())
}

pub fn get_job(db: &Database, id: &str) -> Result<Option<JobRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))?;
    let mut rows = stmt.query_map(params![id], job_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

/// The non-failed job for `(scenario, user)`, if any. At most one exists,
/// enforced by the partial unique index.
pub fn get_live_job(
    db: &Database,
    scenario_id: &str,
    user_id: &str,
) -> Result<Option<JobRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs
         WHERE scenario_id = ?1 AND user_id = ?2 AND status != 'failed'"
    ))?;
    let mut rows = stmt.query_map(params![scenario_id, user_id], job_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn list_jobs_by_status_for_scenario(
    db: &Database,
    scenario_id: &str,
    status: JobState,
) -> Result<Vec<JobRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs
         WHERE status = ?1 AND scenario_id = ?2
         ORDER BY created_at"
    ))?;
    let rows = stmt
        .query_map(params![status.as_str(), scenario_id], job_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_jobs_for_batch(db: &Database, batch_id: &str) -> Result<Vec<JobRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE batch_id = ?1 ORDER BY created_at"
    ))?;
    let rows = stmt
        .query_map(params![batch_id], job_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Jobs stuck in `running` outside any batch: interrupted direct work
/// found during startup recovery.
pub fn list_interrupted_direct_jobs(db: &Database) -> Result<Vec<JobRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs
         WHERE status = 'running' AND batch_id IS NULL
         ORDER BY created_at"
    ))?;
    let rows = stmt
        .query_map([], job_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Claim a pending job for execution. Returns false if the job was not
/// pending (already claimed, completed, or failed).
pub fn claim_job(db: &Database, id: &str, started_at: &str) -> Result<bool, DbError> {
    let conn = db.conn();
    let changed = conn.execute(
        "UPDATE jobs SET status = 'running', started_at = ?2, attempts = attempts + 1
         WHERE id = ?1 AND status = 'pending'",
        params![id, started_at],
    )?;
    Ok(changed > 0)
}

/// Mark a running job completed. `ledger_entry_id` is NULL for dry runs.
pub fn complete_job(
    db: &Database,
    id: &str,
    ledger_entry_id: Option<&str>,
    finished_at: &str,
) -> Result<bool, DbError> {
    let conn = db.conn();
    let changed = conn.execute(
        "UPDATE jobs SET status = 'completed', ledger_entry_id = ?2, finished_at = ?3
         WHERE id = ?1 AND status = 'running'",
        params![id, ledger_entry_id, finished_at],
    )?;
    Ok(changed > 0)
}

pub fn fail_job(
    db: &Database,
    id: &str,
    kind: ErrorKind,
    message: &str,
    occurred_at: &str,
    attempt: i64,
) -> Result<bool, DbError> {
    let conn = db.conn();
    let changed = conn.execute(
        "UPDATE jobs SET status = 'failed', error_kind = ?2, error_message = ?3,
            error_at = ?4, error_attempt = ?5, finished_at = ?4
         WHERE id = ?1 AND status != 'completed'",
        params![id, kind.as_str(), message, occurred_at, attempt],
    )?;
    Ok(changed > 0)
}

/// Return a running job to the backlog for another attempt (transient oracle
/// error or interrupted worker). Attempt count is preserved.
pub fn release_job(db: &Database, id: &str) -> Result<bool, DbError> {
    let conn = db.conn();
    let changed = conn.execute(
        "UPDATE jobs SET status = 'pending', started_at = NULL,
            batch_id = NULL, batch_input_file_id = NULL, batch_submitted_at = NULL
         WHERE id = ?1 AND status = 'running'",
        params![id],
    )?;
    Ok(changed > 0)
}

/// Admin requeue of a failed job. Attempts are preserved; error fields are
/// cleared so the next failure records fresh context.
pub fn requeue_failed_job(db: &Database, id: &str) -> Result<bool, DbError> {
    let conn = db.conn();
    let changed = conn.execute(
        "UPDATE jobs SET status = 'pending',
            error_kind = NULL, error_message = NULL, error_at = NULL, error_attempt = NULL,
            batch_id = NULL, batch_input_file_id = NULL, batch_submitted_at = NULL,
            started_at = NULL, finished_at = NULL
         WHERE id = ?1 AND status = 'failed'",
        params![id],
    )?;
    Ok(changed > 0)
}

/// Cancel a pending job. Running jobs cannot be cancelled.
pub fn cancel_pending_job(db: &Database, id: &str, occurred_at: &str) -> Result<bool, DbError> {
    let conn = db.conn();
    let changed = conn.execute(
        "UPDATE jobs SET status = 'failed', error_kind = 'cancelled',
            error_message = 'cancelled before execution', error_at = ?2, finished_at = ?2
         WHERE id = ?1 AND status = 'pending'",
        params![id, occurred_at],
    )?;
    Ok(changed > 0)
}

pub fn set_job_oracle_request(db: &Database, id: &str, request_json: &str) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "UPDATE jobs SET oracle_request_json = ?2 WHERE id = ?1",
        params![id, request_json],
    )?;
    Ok(())
}

pub fn set_job_warning(db: &Database, id: &str, kind: ErrorKind) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "UPDATE jobs SET warning_kind = ?2 WHERE id = ?1",
        params![id, kind.as_str()],
    )?;
    Ok(())
}

pub fn assign_job_to_batch(
    db: &Database,
    id: &str,
    batch_id: &str,
    input_file_id: &str,
    submitted_at: &str,
) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "UPDATE jobs SET batch_id = ?2, batch_input_file_id = ?3, batch_submitted_at = ?4
         WHERE id = ?1",
        params![id, batch_id, input_file_id, submitted_at],
    )?;
    Ok(())
}

/// Transition every pending job of a batch to running in one statement.
pub fn mark_batch_jobs_running(
    db: &Database,
    batch_id: &str,
    started_at: &str,
) -> Result<usize, DbError> {
    let conn = db.conn();
    let changed = conn.execute(
        "UPDATE jobs SET status = 'running', started_at = ?2, attempts = attempts + 1
         WHERE batch_id = ?1 AND status = 'pending'",
        params![batch_id, started_at],
    )?;
    Ok(changed)
}

// ---------------------------------------------------------------------------
// Batch queries
// ---------------------------------------------------------------------------

const BATCH_COLUMNS: &str = "id, scenario_id, classroom_id, oracle_batch_id, input_file_id,
    output_file_id, status, job_count, submit_attempts, poll_attempts,
    submitted_at, finalized_at, created_at, error";

fn batch_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BatchRow> {
    Ok(BatchRow {
        id: row.get(0)?,
        scenario_id: row.get(1)?,
        classroom_id: row.get(2)?,
        oracle_batch_id: row.get(3)?,
        input_file_id: row.get(4)?,
        output_file_id: row.get(5)?,
        status: parse_col(6, row.get::<_, String>(6)?)?,
        job_count: row.get(7)?,
        submit_attempts: row.get(8)?,
        poll_attempts: row.get(9)?,
        submitted_at: row.get(10)?,
        finalized_at: row.get(11)?,
        created_at: row.get(12)?,
        error: row.get(13)?,
    })
}

pub fn insert_batch(db: &Database, row: &BatchRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO batches (id, scenario_id, classroom_id, oracle_batch_id, input_file_id,
            output_file_id, status, job_count, submit_attempts, poll_attempts,
            submitted_at, finalized_at, created_at, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            row.id,
            row.scenario_id,
            row.classroom_id,
            row.oracle_batch_id,
            row.input_file_id,
            row.output_file_id,
            row.status.as_str(),
            row.job_count,
            row.submit_attempts,
            row.poll_attempts,
            row.submitted_at,
            row.finalized_at,
            row.created_at,
            row.error
        ],
    )?;
    Ok(())
}

pub fn get_batch(db: &Database, id: &str) -> Result<Option<BatchRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"))?;
    let mut rows = stmt.query_map(params![id], batch_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn mark_batch_submitted(
    db: &Database,
    id: &str,
    oracle_batch_id: &str,
    input_file_id: &str,
    job_count: i64,
    submitted_at: &str,
) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "UPDATE batches SET status = 'submitted', oracle_batch_id = ?2, input_file_id = ?3,
            job_count = ?4, submitted_at = ?5
         WHERE id = ?1",
        params![id, oracle_batch_id, input_file_id, job_count, submitted_at],
    )?;
    Ok(())
}

pub fn update_batch_status(db: &Database, id: &str, status: BatchState) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "UPDATE batches SET status = ?2 WHERE id = ?1",
        params![id, status.as_str()],
    )?;
    Ok(())
}

pub fn finalize_batch(
    db: &Database,
    id: &str,
    status: BatchState,
    output_file_id: Option<&str>,
    finalized_at: &str,
    error: Option<&str>,
) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "UPDATE batches SET status = ?2, output_file_id = ?3, finalized_at = ?4, error = ?5
         WHERE id = ?1",
        params![id, status.as_str(), output_file_id, finalized_at, error],
    )?;
    Ok(())
}

/// Increment and return the poll attempt counter.
pub fn bump_batch_poll_attempts(db: &Database, id: &str) -> Result<i64, DbError> {
    let conn = db.conn();
    conn.execute(
        "UPDATE batches SET poll_attempts = poll_attempts + 1 WHERE id = ?1",
        params![id],
    )?;
    let attempts =
        conn.query_row("SELECT poll_attempts FROM batches WHERE id = ?1", params![id], |row| {
            row.get(0)
        })?;
    Ok(attempts)
}

/// Increment and return the submit attempt counter.
pub fn bump_batch_submit_attempts(db: &Database, id: &str) -> Result<i64, DbError> {
    let conn = db.conn();
    conn.execute(
        "UPDATE batches SET submit_attempts = submit_attempts + 1 WHERE id = ?1",
        params![id],
    )?;
    let attempts = conn.query_row(
        "SELECT submit_attempts FROM batches WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(attempts)
}

/// Batches that still need polling after a process restart.
pub fn list_live_batches(db: &Database) -> Result<Vec<BatchRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {BATCH_COLUMNS} FROM batches
         WHERE status IN ('submitted', 'in_progress', 'finalizing')
         ORDER BY created_at"
    ))?;
    let rows = stmt
        .query_map([], batch_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Ledger queries
// ---------------------------------------------------------------------------

const LEDGER_COLUMNS: &str = "id, store_id, classroom_id, scenario_id, submission_id, user_id,
    sales, revenue, costs, waste, cash_before, cash_after,
    refrigerated_units, ambient_units, not_for_resale_units, net_profit,
    random_event, summary, education_json, ai_model, ai_run_id, ai_generated_at,
    calculation_context_json, overridden, overridden_by, overridden_at, created_at";

fn ledger_entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntryRow> {
    Ok(LedgerEntryRow {
        id: row.get(0)?,
        store_id: row.get(1)?,
        classroom_id: row.get(2)?,
        scenario_id: row.get(3)?,
        submission_id: row.get(4)?,
        user_id: row.get(5)?,
        sales: row.get(6)?,
        revenue: row.get(7)?,
        costs: row.get(8)?,
        waste: row.get(9)?,
        cash_before: row.get(10)?,
        cash_after: row.get(11)?,
        refrigerated_units: row.get(12)?,
        ambient_units: row.get(13)?,
        not_for_resale_units: row.get(14)?,
        net_profit: row.get(15)?,
        random_event: row.get(16)?,
        summary: row.get(17)?,
        education_json: row.get(18)?,
        ai_model: row.get(19)?,
        ai_run_id: row.get(20)?,
        ai_generated_at: row.get(21)?,
        calculation_context_json: row.get(22)?,
        overridden: row.get(23)?,
        overridden_by: row.get(24)?,
        overridden_at: row.get(25)?,
        created_at: row.get(26)?,
    })
}

pub fn insert_ledger_entry(db: &Database, row: &LedgerEntryRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO ledger_entries (id, store_id, classroom_id, scenario_id, submission_id,
            user_id, sales, revenue, costs, waste, cash_before, cash_after,
            refrigerated_units, ambient_units, not_for_resale_units, net_profit,
            random_event, summary, education_json, ai_model, ai_run_id, ai_generated_at,
            calculation_context_json, overridden, overridden_by, overridden_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
        params![
            row.id,
            row.store_id,
            row.classroom_id,
            row.scenario_id,
            row.submission_id,
            row.user_id,
            row.sales,
            row.revenue,
            row.costs,
            row.waste,
            row.cash_before,
            row.cash_after,
            row.refrigerated_units,
            row.ambient_units,
            row.not_for_resale_units,
            row.net_profit,
            row.random_event,
            row.summary,
            row.education_json,
            row.ai_model,
            row.ai_run_id,
            row.ai_generated_at,
            row.calculation_context_json,
            row.overridden,
            row.overridden_by,
            row.overridden_at,
            row.created_at
        ],
    )?;
    Ok(())
}

pub fn get_ledger_entry(db: &Database, id: &str) -> Result<Option<LedgerEntryRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE id = ?1"
    ))?;
    let mut rows = stmt.query_map(params![id], ledger_entry_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

/// Most recent entry for `(store, user)`. Entry order is creation order;
/// rowid breaks same-timestamp ties.
pub fn latest_ledger_entry(
    db: &Database,
    store_id: &str,
    user_id: &str,
) -> Result<Option<LedgerEntryRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {LEDGER_COLUMNS} FROM ledger_entries
         WHERE store_id = ?1 AND user_id = ?2
         ORDER BY created_at DESC, rowid DESC
         LIMIT 1"
    ))?;
    let mut rows = stmt.query_map(params![store_id, user_id], ledger_entry_from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

pub fn list_ledger_entries(
    db: &Database,
    classroom_id: &str,
    user_id: &str,
    exclude_scenario_id: Option<&str>,
) -> Result<Vec<LedgerEntryRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {LEDGER_COLUMNS} FROM ledger_entries
         WHERE classroom_id = ?1 AND user_id = ?2
           AND (?3 IS NULL OR scenario_id IS NULL OR scenario_id != ?3)
         ORDER BY created_at ASC, rowid ASC"
    ))?;
    let rows = stmt
        .query_map(
            params![classroom_id, user_id, exclude_scenario_id],
            ledger_entry_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Apply an admin override. Only the patchable numeric/summary columns and
/// the `overridden*` markers change; everything else is immutable.
pub fn apply_ledger_override(db: &Database, row: &LedgerEntryRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "UPDATE ledger_entries SET
            sales = ?2, revenue = ?3, costs = ?4, waste = ?5,
            cash_before = ?6, cash_after = ?7,
            refrigerated_units = ?8, ambient_units = ?9, not_for_resale_units = ?10,
            net_profit = ?11, random_event = ?12, summary = ?13,
            overridden = 1, overridden_by = ?14, overridden_at = ?15
         WHERE id = ?1",
        params![
            row.id,
            row.sales,
            row.revenue,
            row.costs,
            row.waste,
            row.cash_before,
            row.cash_after,
            row.refrigerated_units,
            row.ambient_units,
            row.not_for_resale_units,
            row.net_profit,
            row.random_event,
            row.summary,
            row.overridden_by,
            row.overridden_at
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Event queries
// ---------------------------------------------------------------------------

pub fn insert_event(db: &Database, row: &EventRow) -> Result<(), DbError> {
    let conn = db.conn();
    conn.execute(
        "INSERT INTO events (id, seq, category, event_type, scenario_id, payload_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            row.id,
            row.seq,
            row.category,
            row.event_type,
            row.scenario_id,
            row.payload_json,
            row.created_at
        ],
    )?;
    Ok(())
}

pub fn list_events_for_scenario(
    db: &Database,
    scenario_id: &str,
) -> Result<Vec<EventRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT id, seq, category, event_type, scenario_id, payload_json, created_at
         FROM events WHERE scenario_id = ?1
         ORDER BY created_at ASC, seq ASC",
    )?;
    let rows = stmt
        .query_map(params![scenario_id], |row| {
            Ok(EventRow {
                id: row.get(0)?,
                seq: row.get(1)?,
                category: row.get(2)?,
                event_type: row.get(3)?,
                scenario_id: row.get(4)?,
                payload_json: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
