//! Event category and type constants.
//!
//! Single source of truth for what the core emits. Downstream consumers of
//! the notifications topic deduplicate by ledger entry id.

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub const CATEGORY_NOTIFICATION: &str = "notification";
pub const CATEGORY_SIMULATION: &str = "simulation";
pub const CATEGORY_BATCH: &str = "batch";

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Exactly one per successful scenario append for a student.
pub const EVENT_SCENARIO_CLOSED_FOR_USER: &str = "scenario-closed-for-user";

pub const EVENT_JOB_STATUS_CHANGED: &str = "simulation.job_status_changed";
pub const EVENT_BATCH_STATUS_CHANGED: &str = "batch.status_changed";
