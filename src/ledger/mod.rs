//! The append-only cash-and-inventory ledger.
//!
//! Entries are created, never mutated; the single exception is the admin
//! override path, which touches a fixed set of numeric fields and marks the
//! entry as overridden. Continuity (each entry's `cash_before` equals the
//! previous entry's `cash_after`) and the per-entry bookkeeping invariants
//! are enforced on every write.

pub mod invariants;
pub mod normalize;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{queries, Database, DbError};
use crate::domain::money::{cents_eq, round2, round_units};
use crate::domain::outcome::{InventoryState, SimulationOutcome};

use invariants::Capacities;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl LedgerError {
    pub fn kind(&self) -> crate::domain::ErrorKind {
        match self {
            LedgerError::Validation(_) => crate::domain::ErrorKind::Validation,
            LedgerError::Invariant(_) => crate::domain::ErrorKind::Invariant,
            LedgerError::NotFound(_) | LedgerError::Db(_) => crate::domain::ErrorKind::Internal,
        }
    }
}

/// Provenance of an AI-simulated entry.
#[derive(Debug, Clone)]
pub struct AiMetadata {
    pub model: String,
    pub run_id: String,
    pub generated_at: String,
}

/// Everything needed to append one entry.
#[derive(Debug, Clone)]
pub struct LedgerInput {
    pub store_id: String,
    pub classroom_id: String,
    pub scenario_id: Option<String>,
    pub submission_id: Option<String>,
    pub user_id: String,
    pub outcome: SimulationOutcome,
    pub ai: Option<AiMetadata>,
    pub calculation_context_json: Option<String>,
}

/// Admin override patch. Only these fields are patchable.
#[derive(Debug, Clone, Default)]
pub struct LedgerOverride {
    pub sales: Option<f64>,
    pub revenue: Option<f64>,
    pub costs: Option<f64>,
    pub waste: Option<f64>,
    pub cash_before: Option<f64>,
    pub cash_after: Option<f64>,
    pub inventory_state: Option<InventoryState>,
    pub net_profit: Option<f64>,
    pub random_event: Option<Option<String>>,
    pub summary: Option<String>,
}

/// Cash and inventory anchors for the next simulation of a store.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorState {
    pub cash_before: f64,
    pub inventory_state: InventoryState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSummary {
    pub total_sales: i64,
    pub total_revenue: f64,
    pub total_costs: f64,
    pub total_waste: f64,
    pub total_net_profit: f64,
    pub cash_balance: f64,
    pub inventory_state: InventoryState,
    pub entry_count: usize,
}

pub struct LedgerEngine {
    db: Arc<Database>,
}

impl LedgerEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Normalize, validate, and insert one entry.
    pub fn append(&self, input: LedgerInput) -> Result<queries::LedgerEntryRow, LedgerError> {
        let mut outcome = input.outcome;
        normalize::normalize_outcome(&mut outcome);

        let store = queries::get_store(&self.db, &input.store_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("store {}", input.store_id)))?;
        let store_type = queries::get_store_type(&self.db, &store.store_type_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("store type {}", store.store_type_id)))?;

        invariants::check_entry(&outcome, &capacities_of(&store_type))?;

        // Cross-entry continuity against the latest entry for this store.
        if let Some(prev) = queries::latest_ledger_entry(&self.db, &input.store_id, &input.user_id)? {
            if !cents_eq(outcome.cash_before, prev.cash_after) {
                return Err(LedgerError::Invariant(format!(
                    "cash continuity: entry opens at {} but ledger closed at {}",
                    outcome.cash_before, prev.cash_after
                )));
            }
        }

        let education_json = serde_json::to_string(&outcome.education)
            .map_err(|e| LedgerError::Validation(format!("education payload: {e}")))?;

        let row = queries::LedgerEntryRow {
            id: Uuid::new_v4().to_string(),
            store_id: input.store_id,
            classroom_id: input.classroom_id,
            scenario_id: input.scenario_id,
            submission_id: input.submission_id,
            user_id: input.user_id,
            sales: outcome.sales as i64,
            revenue: outcome.revenue,
            costs: outcome.costs,
            waste: outcome.waste,
            cash_before: outcome.cash_before,
            cash_after: outcome.cash_after,
            refrigerated_units: outcome.inventory_state.refrigerated_units as i64,
            ambient_units: outcome.inventory_state.ambient_units as i64,
            not_for_resale_units: outcome.inventory_state.not_for_resale_units as i64,
            net_profit: outcome.net_profit,
            random_event: outcome.random_event.clone(),
            summary: outcome.summary.clone(),
            education_json,
            ai_model: input.ai.as_ref().map(|m| m.model.clone()),
            ai_run_id: input.ai.as_ref().map(|m| m.run_id.clone()),
            ai_generated_at: input.ai.as_ref().map(|m| m.generated_at.clone()),
            calculation_context_json: input.calculation_context_json,
            overridden: false,
            overridden_by: None,
            overridden_at: None,
            created_at: Utc::now().to_rfc3339(),
        };

        queries::insert_ledger_entry(&self.db, &row).map_err(|e| {
            if e.is_unique_violation() {
                LedgerError::Invariant(match &row.scenario_id {
                    Some(scenario) => format!(
                        "uniqueness: entry already exists for scenario {} and user {}",
                        scenario, row.user_id
                    ),
                    None => format!(
                        "uniqueness: initial entry already exists for classroom {} and user {}",
                        row.classroom_id, row.user_id
                    ),
                })
            } else {
                LedgerError::Db(e)
            }
        })?;

        tracing::info!(
            entry = %row.id,
            store = %row.store_id,
            user = %row.user_id,
            cash_after = row.cash_after,
            "ledger entry appended"
        );
        Ok(row)
    }

    /// Admin override of a committed entry. Re-normalizes and re-validates
    /// the cash and revenue invariants; does not cascade to later entries.
    pub fn override_entry(
        &self,
        entry_id: &str,
        patch: LedgerOverride,
        actor: &str,
    ) -> Result<queries::LedgerEntryRow, LedgerError> {
        let mut row = queries::get_ledger_entry(&self.db, entry_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("ledger entry {entry_id}")))?;

        if let Some(sales) = patch.sales {
            row.sales = round_units(sales) as i64;
        }
        if let Some(revenue) = patch.revenue {
            row.revenue = round2(revenue);
        }
        if let Some(costs) = patch.costs {
            row.costs = round2(costs);
        }
        if let Some(waste) = patch.waste {
            row.waste = round2(waste);
        }
        if let Some(cash_before) = patch.cash_before {
            row.cash_before = round2(cash_before);
        }
        if let Some(cash_after) = patch.cash_after {
            row.cash_after = round2(cash_after);
        }
        if let Some(state) = patch.inventory_state {
            row.refrigerated_units = round_units(state.refrigerated_units) as i64;
            row.ambient_units = round_units(state.ambient_units) as i64;
            row.not_for_resale_units = round_units(state.not_for_resale_units) as i64;
        }
        if let Some(net_profit) = patch.net_profit {
            row.net_profit = round2(net_profit);
        }
        if let Some(random_event) = patch.random_event {
            row.random_event = random_event;
        }
        if let Some(summary) = patch.summary {
            row.summary = summary;
        }

        // Re-normalize the derived cash pair so invariant 1 holds around the
        // patched values.
        row.net_profit = round2(row.cash_after - row.cash_before);
        row.cash_after = round2(row.cash_before + row.net_profit);

        // Revenue consistency against the stored realized unit price, when
        // the education payload parses (seed entries carry none).
        if let Ok(education) =
            serde_json::from_str::<crate::domain::outcome::Education>(&row.education_json)
        {
            let expected = round2(row.sales as f64 * education.realized_unit_price);
            if !cents_eq(row.revenue, expected) {
                return Err(LedgerError::Invariant(format!(
                    "revenue consistency: revenue {} != sales {} x unit price {}",
                    row.revenue, row.sales, education.realized_unit_price
                )));
            }
        }

        row.overridden = true;
        row.overridden_by = Some(actor.to_string());
        row.overridden_at = Some(Utc::now().to_rfc3339());

        queries::apply_ledger_override(&self.db, &row)?;

        // An override may break continuity for the next entry. That repair
        // is a follow-up admin action, so surface it loudly and move on.
        let entries =
            queries::list_ledger_entries(&self.db, &row.classroom_id, &row.user_id, None)?;
        if let Some(position) = entries.iter().position(|e| e.id == row.id) {
            if let Some(next) = entries.get(position + 1) {
                if !cents_eq(next.cash_before, row.cash_after) {
                    tracing::warn!(
                        entry = %row.id,
                        dependent = %next.id,
                        cash_after = row.cash_after,
                        dependent_cash_before = next.cash_before,
                        "override broke cash continuity for a later entry"
                    );
                }
            }
        }

        Ok(row)
    }

    /// All entries for a student in a classroom, in creation order.
    pub fn history(
        &self,
        classroom_id: &str,
        user_id: &str,
        exclude_scenario_id: Option<&str>,
    ) -> Result<Vec<queries::LedgerEntryRow>, LedgerError> {
        Ok(queries::list_ledger_entries(
            &self.db,
            classroom_id,
            user_id,
            exclude_scenario_id,
        )?)
    }

    /// Aggregates over a student's history. `exclude_scenario_id` skips one
    /// scenario for rerun previews.
    pub fn summary(
        &self,
        classroom_id: &str,
        user_id: &str,
        exclude_scenario_id: Option<&str>,
    ) -> Result<LedgerSummary, LedgerError> {
        let entries = self.history(classroom_id, user_id, exclude_scenario_id)?;
        let mut summary = LedgerSummary {
            total_sales: 0,
            total_revenue: 0.0,
            total_costs: 0.0,
            total_waste: 0.0,
            total_net_profit: 0.0,
            cash_balance: 0.0,
            inventory_state: InventoryState::default(),
            entry_count: entries.len(),
        };
        for entry in &entries {
            summary.total_sales += entry.sales;
            summary.total_revenue = round2(summary.total_revenue + entry.revenue);
            summary.total_costs = round2(summary.total_costs + entry.costs);
            summary.total_waste = round2(summary.total_waste + entry.waste);
            summary.total_net_profit = round2(summary.total_net_profit + entry.net_profit);
        }
        if let Some(last) = entries.last() {
            summary.cash_balance = last.cash_after;
            summary.inventory_state = entry_inventory(last);
        }
        Ok(summary)
    }

    /// The anchors for a store's next simulation: the latest entry's closing
    /// state, seeding the initial entry first when the ledger is empty.
    pub fn prior_state(&self, store_id: &str, user_id: &str) -> Result<PriorState, LedgerError> {
        if let Some(latest) = queries::latest_ledger_entry(&self.db, store_id, user_id)? {
            return Ok(PriorState {
                cash_before: latest.cash_after,
                inventory_state: entry_inventory(&latest),
            });
        }
        let seeded = self.seed(store_id)?;
        Ok(PriorState {
            cash_before: seeded.cash_after,
            inventory_state: entry_inventory(&seeded),
        })
    }

    /// Issue the initial entry anchoring a store's starting cash and
    /// inventory. The classroom's starting balance is authoritative.
    pub fn seed(&self, store_id: &str) -> Result<queries::LedgerEntryRow, LedgerError> {
        let store = queries::get_store(&self.db, store_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("store {store_id}")))?;
        let classroom = queries::get_classroom(&self.db, &store.classroom_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("classroom {}", store.classroom_id)))?;
        let store_type = queries::get_store_type(&self.db, &store.store_type_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("store type {}", store.store_type_id)))?;

        let balance = round2(classroom.starting_balance);
        let row = queries::LedgerEntryRow {
            id: Uuid::new_v4().to_string(),
            store_id: store.id,
            classroom_id: store.classroom_id,
            scenario_id: None,
            submission_id: None,
            user_id: store.user_id,
            sales: 0,
            revenue: 0.0,
            costs: 0.0,
            waste: 0.0,
            cash_before: balance,
            cash_after: balance,
            refrigerated_units: store_type.refrigerated_starting_units,
            ambient_units: store_type.ambient_starting_units,
            not_for_resale_units: store_type.not_for_resale_starting_units,
            net_profit: 0.0,
            random_event: None,
            summary: "Opening balance".to_string(),
            education_json: "{}".to_string(),
            ai_model: None,
            ai_run_id: None,
            ai_generated_at: None,
            calculation_context_json: None,
            overridden: false,
            overridden_by: None,
            overridden_at: None,
            created_at: Utc::now().to_rfc3339(),
        };

        match queries::insert_ledger_entry(&self.db, &row) {
            Ok(()) => Ok(row),
            // Lost a seeding race: another worker already wrote the initial
            // entry. Use theirs.
            Err(e) if e.is_unique_violation() => {
                queries::latest_ledger_entry(&self.db, &row.store_id, &row.user_id)?.ok_or_else(
                    || LedgerError::NotFound(format!("seed entry for store {} vanished", row.store_id)),
                )
            }
            Err(e) => Err(LedgerError::Db(e)),
        }
    }
}

fn capacities_of(store_type: &queries::StoreTypeRow) -> Capacities {
    Capacities {
        refrigerated_units: store_type.refrigerated_capacity_units,
        ambient_units: store_type.ambient_capacity_units,
        not_for_resale_units: store_type.not_for_resale_capacity_units,
    }
}

/// Bucket counts of a stored entry.
pub fn entry_inventory(entry: &queries::LedgerEntryRow) -> InventoryState {
    InventoryState::new(
        entry.refrigerated_units as f64,
        entry.ambient_units as f64,
        entry.not_for_resale_units as f64,
    )
}
