use rusqlite::Connection;

use super::DbError;

struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: r#"
CREATE TABLE classrooms (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    base_prompts_json   TEXT NOT NULL DEFAULT '[]',
    starting_balance    REAL NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL
);

CREATE TABLE store_types (
    id                              TEXT PRIMARY KEY,
    name                            TEXT NOT NULL,
    refrigerated_capacity_units     INTEGER NOT NULL,
    ambient_capacity_units          INTEGER NOT NULL,
    not_for_resale_capacity_units   INTEGER NOT NULL,
    refrigerated_starting_units     INTEGER NOT NULL DEFAULT 0,
    ambient_starting_units          INTEGER NOT NULL DEFAULT 0,
    not_for_resale_starting_units   INTEGER NOT NULL DEFAULT 0,
    cost_per_unit                   REAL NOT NULL DEFAULT 0,
    price_baseline                  REAL NOT NULL DEFAULT 0
);

CREATE TABLE stores (
    id              TEXT PRIMARY KEY,
    classroom_id    TEXT NOT NULL REFERENCES classrooms(id),
    store_type_id   TEXT NOT NULL REFERENCES store_types(id),
    user_id         TEXT NOT NULL,
    name            TEXT NOT NULL,
    variables_json  TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE scenarios (
    id              TEXT PRIMARY KEY,
    classroom_id    TEXT NOT NULL REFERENCES classrooms(id),
    title           TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'draft',
    created_at      TEXT NOT NULL,
    closed_at       TEXT
);

CREATE TABLE scenario_outcomes (
    scenario_id                 TEXT PRIMARY KEY REFERENCES scenarios(id),
    notes                       TEXT NOT NULL DEFAULT '',
    random_event_chance_percent INTEGER NOT NULL DEFAULT 0,
    auto_generate_submissions   TEXT NOT NULL DEFAULT 'MANUAL',
    punish_absent_students      INTEGER NOT NULL DEFAULT 0,
    created_at                  TEXT NOT NULL
);

CREATE TABLE submissions (
    id                  TEXT PRIMARY KEY,
    scenario_id         TEXT NOT NULL REFERENCES scenarios(id),
    user_id             TEXT NOT NULL,
    decisions_json      TEXT NOT NULL DEFAULT '{}',
    generation_method   TEXT NOT NULL DEFAULT 'MANUAL',
    created_at          TEXT NOT NULL
);

CREATE TABLE jobs (
    id                              TEXT PRIMARY KEY,
    classroom_id                    TEXT NOT NULL REFERENCES classrooms(id),
    scenario_id                     TEXT NOT NULL REFERENCES scenarios(id),
    user_id                         TEXT NOT NULL,
    submission_id                   TEXT NOT NULL REFERENCES submissions(id),
    status                          TEXT NOT NULL DEFAULT 'pending',
    dry_run                         INTEGER NOT NULL DEFAULT 0,
    attempts                        INTEGER NOT NULL DEFAULT 0,
    expected_cash_before            REAL NOT NULL,
    expected_refrigerated_units     INTEGER NOT NULL,
    expected_ambient_units          INTEGER NOT NULL,
    expected_not_for_resale_units   INTEGER NOT NULL,
    context_json                    TEXT NOT NULL,
    context_fingerprint             TEXT NOT NULL,
    oracle_request_json             TEXT,
    batch_id                        TEXT,
    batch_input_file_id             TEXT,
    batch_submitted_at              TEXT,
    ledger_entry_id                 TEXT,
    error_kind                      TEXT,
    error_message                   TEXT,
    error_at                        TEXT,
    error_attempt                   INTEGER,
    created_at                      TEXT NOT NULL,
    started_at                      TEXT,
    finished_at                     TEXT
);

CREATE TABLE batches (
    id              TEXT PRIMARY KEY,
    scenario_id     TEXT NOT NULL REFERENCES scenarios(id),
    classroom_id    TEXT NOT NULL REFERENCES classrooms(id),
    oracle_batch_id TEXT,
    input_file_id   TEXT,
    output_file_id  TEXT,
    status          TEXT NOT NULL DEFAULT 'created',
    job_count       INTEGER NOT NULL DEFAULT 0,
    submitted_at    TEXT,
    finalized_at    TEXT,
    created_at      TEXT NOT NULL,
    error           TEXT
);

CREATE TABLE ledger_entries (
    id                          TEXT PRIMARY KEY,
    store_id                    TEXT NOT NULL REFERENCES stores(id),
    classroom_id                TEXT NOT NULL REFERENCES classrooms(id),
    scenario_id                 TEXT REFERENCES scenarios(id),
    submission_id               TEXT,
    user_id                     TEXT NOT NULL,
    sales                       INTEGER NOT NULL DEFAULT 0,
    revenue                     REAL NOT NULL DEFAULT 0,
    costs                       REAL NOT NULL DEFAULT 0,
    waste                       REAL NOT NULL DEFAULT 0,
    cash_before                 REAL NOT NULL,
    cash_after                  REAL NOT NULL,
    refrigerated_units          INTEGER NOT NULL DEFAULT 0,
    ambient_units               INTEGER NOT NULL DEFAULT 0,
    not_for_resale_units        INTEGER NOT NULL DEFAULT 0,
    net_profit                  REAL NOT NULL DEFAULT 0,
    random_event                TEXT,
    summary                     TEXT NOT NULL DEFAULT '',
    education_json              TEXT NOT NULL DEFAULT '{}',
    ai_model                    TEXT,
    ai_run_id                   TEXT,
    ai_generated_at             TEXT,
    calculation_context_json    TEXT,
    overridden                  INTEGER NOT NULL DEFAULT 0,
    overridden_by               TEXT,
    overridden_at               TEXT,
    created_at                  TEXT NOT NULL
);

CREATE TABLE events (
    id           TEXT PRIMARY KEY,
    seq          INTEGER NOT NULL,
    category     TEXT NOT NULL,
    event_type   TEXT NOT NULL,
    scenario_id  TEXT,
    payload_json TEXT NOT NULL,
    created_at   TEXT NOT NULL
);
"#,
    },
    Migration {
        version: 2,
        sql: r#"
CREATE UNIQUE INDEX idx_ledger_scenario_user
    ON ledger_entries(scenario_id, user_id) WHERE scenario_id IS NOT NULL;
CREATE UNIQUE INDEX idx_ledger_initial_classroom_user
    ON ledger_entries(classroom_id, user_id) WHERE scenario_id IS NULL;
CREATE INDEX idx_ledger_classroom_user_created
    ON ledger_entries(classroom_id, user_id, created_at);
CREATE INDEX idx_ledger_store_user_created
    ON ledger_entries(store_id, user_id, created_at);

CREATE UNIQUE INDEX idx_jobs_scenario_user_live
    ON jobs(scenario_id, user_id) WHERE status != 'failed';
CREATE INDEX idx_jobs_status_scenario_created
    ON jobs(status, scenario_id, created_at);
CREATE INDEX idx_jobs_batch ON jobs(batch_id);

CREATE UNIQUE INDEX idx_submissions_scenario_user
    ON submissions(scenario_id, user_id);
CREATE UNIQUE INDEX idx_stores_classroom_user
    ON stores(classroom_id, user_id);

CREATE INDEX idx_batches_oracle ON batches(oracle_batch_id);
CREATE INDEX idx_scenarios_classroom_status ON scenarios(classroom_id, status);
CREATE INDEX idx_events_category_created ON events(category, created_at);
"#,
    },
    Migration {
        version: 3,
        sql: r#"
ALTER TABLE jobs ADD COLUMN warning_kind TEXT;
ALTER TABLE batches ADD COLUMN submit_attempts INTEGER NOT NULL DEFAULT 0;
ALTER TABLE batches ADD COLUMN poll_attempts INTEGER NOT NULL DEFAULT 0;
"#,
    },
];

pub(super) fn run_migrations(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );",
    )?;

    let applied: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT version FROM _migrations ORDER BY version")?;
        let result = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        result
    };

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }

        tracing::info!("applying migration v{}", migration.version);

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DbError::Migration(format!("v{}: {e}", migration.version)))?;
        tx.execute(
            "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
            rusqlite::params![migration.version],
        )?;
        tx.commit()?;
    }

    Ok(())
}
