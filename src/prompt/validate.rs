//! Oracle reply validation and normalization.
//!
//! Parsing is two-stage: a lenient pass that repairs the one known
//! mis-nesting (education fields left at the root next to `teachingNotes`),
//! then the strict typed parse against the response contract. The validated
//! outcome is normalized with the ledger rules and anchored to the job's
//! expected opening cash.

use serde_json::Value;
use thiserror::Error;

use crate::domain::money::{cents, drifts_beyond_one_cent, round2};
use crate::domain::outcome::SimulationOutcome;
use crate::domain::ErrorKind;
use crate::ledger::invariants::cost_breakdown_total;
use crate::ledger::normalize::normalize_outcome;

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("reply is not valid JSON: {0}")]
    Parse(String),
    #[error("reply does not match the response schema: {0}")]
    Schema(String),
}

impl ValidateError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::OracleContent
    }
}

/// A normalized reply plus whether the cash anchor had to be rewritten.
#[derive(Debug, Clone)]
pub struct ValidatedReply {
    pub outcome: SimulationOutcome,
    /// True when the oracle's `cashBefore` drifted from the expected anchor
    /// by more than one cent and was overridden. Retained on the job as a
    /// warning for audit; the job still completes.
    pub anchor_corrected: bool,
}

/// Parse, repair, normalize, and anchor one oracle reply.
pub fn parse_and_validate(
    raw: &str,
    expected_cash_before: f64,
) -> Result<ValidatedReply, ValidateError> {
    let mut value: Value =
        serde_json::from_str(raw).map_err(|e| ValidateError::Parse(e.to_string()))?;
    unwrap_root_education(&mut value);

    let mut outcome: SimulationOutcome =
        serde_json::from_value(value).map_err(|e| ValidateError::Schema(e.to_string()))?;
    normalize_outcome(&mut outcome);

    let breakdown = cost_breakdown_total(&outcome);
    if breakdown != 0 && breakdown != cents(outcome.costs) {
        tracing::debug!(
            costs = outcome.costs,
            breakdown_cents = breakdown,
            "cost breakdown does not sum to reported costs"
        );
    }

    let anchor_corrected = correct_cash_anchor(&mut outcome, expected_cash_before);
    Ok(ValidatedReply {
        outcome,
        anchor_corrected,
    })
}

/// Rewrite `cash_before` to the known-good anchor when the oracle drifted by
/// more than one cent, shifting `cash_after` by the same delta so the entry
/// invariant still holds.
fn correct_cash_anchor(outcome: &mut SimulationOutcome, expected_cash_before: f64) -> bool {
    let expected = round2(expected_cash_before);
    if !drifts_beyond_one_cent(outcome.cash_before, expected) {
        return false;
    }
    let delta = round2(expected - outcome.cash_before);
    tracing::warn!(
        reported = outcome.cash_before,
        expected,
        delta,
        "oracle disagreed with the cash anchor; overriding"
    );
    outcome.cash_before = expected;
    outcome.cash_after = round2(outcome.cash_after + delta);
    outcome.net_profit = round2(outcome.cash_after - outcome.cash_before);
    true
}

/// Some models place the education payload at the root instead of nesting
/// it. Detectable by a root-level `teachingNotes`; repair by folding the
/// education keys back into their object.
fn unwrap_root_education(value: &mut Value) {
    const EDUCATION_KEYS: [&str; 11] = [
        "demandForecast",
        "demandActual",
        "serviceLevel",
        "fillRate",
        "stockoutUnits",
        "lostSalesUnits",
        "backorderUnits",
        "realizedUnitPrice",
        "materialFlowByBucket",
        "costBreakdown",
        "teachingNotes",
    ];

    let Some(object) = value.as_object_mut() else {
        return;
    };
    if object.contains_key("education") || !object.contains_key("teachingNotes") {
        return;
    }

    let mut education = serde_json::Map::new();
    for key in EDUCATION_KEYS {
        if let Some(field) = object.remove(key) {
            education.insert(key.to_string(), field);
        }
    }
    object.insert("education".to_string(), Value::Object(education));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::balanced_outcome;
    use pretty_assertions::assert_eq;

    fn reply_json() -> String {
        serde_json::to_string(&balanced_outcome()).unwrap()
    }

    #[test]
    fn test_valid_reply_passes_unchanged() {
        let reply = parse_and_validate(&reply_json(), 1000.0).unwrap();
        assert!(!reply.anchor_corrected);
        assert_eq!(reply.outcome.cash_before, 1000.0);
        assert_eq!(reply.outcome.cash_after, 1300.0);
        assert_eq!(reply.outcome.revenue, 800.0);
    }

    #[test]
    fn test_anchor_drift_is_corrected() {
        let mut outcome = balanced_outcome();
        outcome.cash_before = 900.0;
        outcome.cash_after = 1200.0;
        let raw = serde_json::to_string(&outcome).unwrap();

        let reply = parse_and_validate(&raw, 1000.0).unwrap();
        assert!(reply.anchor_corrected);
        assert_eq!(reply.outcome.cash_before, 1000.0);
        assert_eq!(reply.outcome.cash_after, 1300.0);
        assert_eq!(reply.outcome.net_profit, 300.0);
    }

    #[test]
    fn test_one_cent_drift_is_left_alone() {
        let mut outcome = balanced_outcome();
        outcome.cash_before = 1000.01;
        outcome.cash_after = 1300.01;
        let raw = serde_json::to_string(&outcome).unwrap();

        let reply = parse_and_validate(&raw, 1000.0).unwrap();
        assert!(!reply.anchor_corrected);
        assert_eq!(reply.outcome.cash_before, 1000.01);
    }

    #[test]
    fn test_root_teaching_notes_unwrapped() {
        let outcome = balanced_outcome();
        let mut value = serde_json::to_value(&outcome).unwrap();
        let education = value
            .as_object_mut()
            .unwrap()
            .remove("education")
            .unwrap();
        for (key, field) in education.as_object().unwrap() {
            value[key] = field.clone();
        }
        let raw = serde_json::to_string(&value).unwrap();

        let reply = parse_and_validate(&raw, 1000.0).unwrap();
        assert_eq!(reply.outcome.education.realized_unit_price, 16.0);
        assert_eq!(
            reply.outcome.education.teaching_notes,
            outcome.education.teaching_notes
        );
    }

    #[test]
    fn test_unparseable_reply_is_a_parse_error() {
        let err = parse_and_validate("not json at all", 1000.0).unwrap_err();
        assert!(matches!(err, ValidateError::Parse(_)));
        assert_eq!(err.kind(), ErrorKind::OracleContent);
    }

    #[test]
    fn test_missing_field_is_a_schema_error() {
        let mut value = serde_json::to_value(balanced_outcome()).unwrap();
        value.as_object_mut().unwrap().remove("inventoryState");
        let raw = serde_json::to_string(&value).unwrap();
        let err = parse_and_validate(&raw, 1000.0).unwrap_err();
        assert!(matches!(err, ValidateError::Schema(_)));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let first = parse_and_validate(&reply_json(), 1000.0).unwrap();
        let raw = serde_json::to_string(&first.outcome).unwrap();
        let second = parse_and_validate(&raw, 1000.0).unwrap();
        assert_eq!(second.outcome, first.outcome);
    }
}
