//! Per-entry bookkeeping invariant checks.
//!
//! The cross-entry invariants (cash continuity between consecutive entries,
//! entry uniqueness) are enforced in the engine against the store; everything
//! that can be judged from a single normalized outcome lives here.

use crate::domain::money::{cents, cents_eq};
use crate::domain::outcome::{BucketFlow, SimulationOutcome};

use super::LedgerError;

/// Per-bucket capacity limits from the store type.
#[derive(Debug, Clone, Copy)]
pub struct Capacities {
    pub refrigerated_units: i64,
    pub ambient_units: i64,
    pub not_for_resale_units: i64,
}

/// Run every per-entry invariant against a normalized outcome.
pub fn check_entry(outcome: &SimulationOutcome, capacities: &Capacities) -> Result<(), LedgerError> {
    check_cash_continuity(outcome)?;
    check_revenue_consistency(outcome)?;
    check_inventory_non_negative(outcome)?;
    check_inventory_capacity(outcome, capacities)?;
    check_material_flow(outcome)?;
    check_bucket_consistency(outcome)?;
    Ok(())
}

/// `cash_after = cash_before + net_profit`, to the cent.
pub fn check_cash_continuity(outcome: &SimulationOutcome) -> Result<(), LedgerError> {
    if !cents_eq(outcome.cash_after, outcome.cash_before + outcome.net_profit) {
        return Err(LedgerError::Invariant(format!(
            "cash continuity: cash_after {} != cash_before {} + net_profit {}",
            outcome.cash_after, outcome.cash_before, outcome.net_profit
        )));
    }
    Ok(())
}

/// `revenue = sales x realized_unit_price`, to the cent.
pub fn check_revenue_consistency(outcome: &SimulationOutcome) -> Result<(), LedgerError> {
    let expected = outcome.sales * outcome.education.realized_unit_price;
    if !cents_eq(outcome.revenue, expected) {
        return Err(LedgerError::Invariant(format!(
            "revenue consistency: revenue {} != sales {} x unit price {}",
            outcome.revenue, outcome.sales, outcome.education.realized_unit_price
        )));
    }
    if outcome.sales < 0.0 {
        return Err(LedgerError::Validation(format!(
            "sales must be non-negative, got {}",
            outcome.sales
        )));
    }
    Ok(())
}

/// Every bucket count is non-negative.
pub fn check_inventory_non_negative(outcome: &SimulationOutcome) -> Result<(), LedgerError> {
    let state = &outcome.inventory_state;
    for (bucket, units) in [
        ("refrigerated", state.refrigerated_units),
        ("ambient", state.ambient_units),
        ("notForResale", state.not_for_resale_units),
    ] {
        if units < 0.0 {
            return Err(LedgerError::Invariant(format!(
                "inventory non-negativity: {bucket} is {units}"
            )));
        }
    }
    Ok(())
}

/// Every bucket count fits within the store type's capacity.
pub fn check_inventory_capacity(
    outcome: &SimulationOutcome,
    capacities: &Capacities,
) -> Result<(), LedgerError> {
    let state = &outcome.inventory_state;
    for (bucket, units, capacity) in [
        ("refrigerated", state.refrigerated_units, capacities.refrigerated_units),
        ("ambient", state.ambient_units, capacities.ambient_units),
        (
            "notForResale",
            state.not_for_resale_units,
            capacities.not_for_resale_units,
        ),
    ] {
        if units > capacity as f64 {
            return Err(LedgerError::Invariant(format!(
                "inventory capacity: {bucket} holds {units} of {capacity}"
            )));
        }
    }
    Ok(())
}

/// `end = begin + received - used - waste` for every bucket.
pub fn check_material_flow(outcome: &SimulationOutcome) -> Result<(), LedgerError> {
    let flows = &outcome.education.material_flow_by_bucket;
    for (bucket, flow) in [
        ("refrigerated", &flows.refrigerated),
        ("ambient", &flows.ambient),
        ("notForResale", &flows.not_for_resale),
    ] {
        if !flow.reconciles() {
            return Err(LedgerError::Invariant(format!(
                "material flow: {bucket} does not reconcile ({})",
                describe_flow(flow)
            )));
        }
        for (field, units) in [
            ("beginUnits", flow.begin_units),
            ("receivedUnits", flow.received_units),
            ("usedUnits", flow.used_units),
            ("wasteUnits", flow.waste_units),
            ("endUnits", flow.end_units),
        ] {
            if units < 0.0 {
                return Err(LedgerError::Invariant(format!(
                    "material flow: {bucket}.{field} is negative ({units})"
                )));
            }
        }
    }
    Ok(())
}

/// The inventory state mirrors the material-flow end units.
pub fn check_bucket_consistency(outcome: &SimulationOutcome) -> Result<(), LedgerError> {
    let state = &outcome.inventory_state;
    let flows = &outcome.education.material_flow_by_bucket;
    for (bucket, units, end_units) in [
        ("refrigerated", state.refrigerated_units, flows.refrigerated.end_units),
        ("ambient", state.ambient_units, flows.ambient.end_units),
        (
            "notForResale",
            state.not_for_resale_units,
            flows.not_for_resale.end_units,
        ),
    ] {
        if units != end_units {
            return Err(LedgerError::Invariant(format!(
                "bucket consistency: {bucket} inventory {units} != flow end {end_units}"
            )));
        }
    }
    Ok(())
}

/// Itemized cost total in cents. The breakdown is teaching material; drift
/// from the reported costs is logged, never fatal.
pub fn cost_breakdown_total(outcome: &SimulationOutcome) -> i64 {
    let costs = &outcome.education.cost_breakdown;
    cents(
        costs.ingredient_cost
            + costs.labor_cost
            + costs.logistics_cost
            + costs.tariff_cost
            + costs.holding_cost
            + costs.overflow_storage_cost
            + costs.expedite_cost
            + costs.waste_disposal_cost
            + costs.other_cost,
    )
}

fn describe_flow(flow: &BucketFlow) -> String {
    format!(
        "begin {} + received {} - used {} - waste {} != end {}",
        flow.begin_units, flow.received_units, flow.used_units, flow.waste_units, flow.end_units
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::{Education, InventoryState, MaterialFlow};
    use crate::ledger::normalize::normalize_outcome;

    fn capacities() -> Capacities {
        Capacities {
            refrigerated_units: 40,
            ambient_units: 80,
            not_for_resale_units: 60,
        }
    }

    fn balanced_outcome() -> SimulationOutcome {
        let mut outcome = SimulationOutcome {
            sales: 50.0,
            revenue: 800.0,
            costs: 500.0,
            waste: 10.0,
            cash_before: 1000.0,
            cash_after: 1300.0,
            inventory_state: InventoryState::new(20.0, 40.0, 10.0),
            net_profit: 300.0,
            random_event: None,
            summary: "normal week".to_string(),
            education: Education {
                realized_unit_price: 16.0,
                material_flow_by_bucket: MaterialFlow {
                    refrigerated: BucketFlow {
                        begin_units: 30.0,
                        received_units: 10.0,
                        used_units: 15.0,
                        waste_units: 5.0,
                        end_units: 20.0,
                        end_units_value: 100.0,
                    },
                    ambient: BucketFlow {
                        begin_units: 40.0,
                        received_units: 10.0,
                        used_units: 8.0,
                        waste_units: 2.0,
                        end_units: 40.0,
                        end_units_value: 200.0,
                    },
                    not_for_resale: BucketFlow {
                        begin_units: 10.0,
                        end_units: 10.0,
                        ..Default::default()
                    },
                    explanation: String::new(),
                },
                ..Default::default()
            },
        };
        normalize_outcome(&mut outcome);
        outcome
    }

    #[test]
    fn test_balanced_outcome_passes() {
        assert!(check_entry(&balanced_outcome(), &capacities()).is_ok());
    }

    #[test]
    fn test_capacity_saturation_accepted_overflow_rejected() {
        let mut outcome = balanced_outcome();
        // Exactly at capacity is fine.
        outcome.inventory_state.refrigerated_units = 40.0;
        outcome.education.material_flow_by_bucket.refrigerated.end_units = 40.0;
        outcome.education.material_flow_by_bucket.refrigerated.received_units = 30.0;
        assert!(check_inventory_capacity(&outcome, &capacities()).is_ok());

        // One unit over is not.
        outcome.inventory_state.refrigerated_units = 41.0;
        let err = check_inventory_capacity(&outcome, &capacities()).unwrap_err();
        assert!(matches!(err, LedgerError::Invariant(_)));
    }

    #[test]
    fn test_cash_continuity_detects_drift() {
        let mut outcome = balanced_outcome();
        outcome.net_profit = 250.0;
        assert!(check_cash_continuity(&outcome).is_err());
    }

    #[test]
    fn test_negative_bucket_rejected() {
        let mut outcome = balanced_outcome();
        outcome.inventory_state.ambient_units = -1.0;
        assert!(check_inventory_non_negative(&outcome).is_err());
    }

    #[test]
    fn test_unbalanced_flow_rejected() {
        let mut outcome = balanced_outcome();
        outcome.education.material_flow_by_bucket.ambient.end_units = 45.0;
        outcome.inventory_state.ambient_units = 45.0;
        assert!(check_material_flow(&outcome).is_err());
    }

    #[test]
    fn test_bucket_mismatch_rejected() {
        let mut outcome = balanced_outcome();
        outcome.inventory_state.not_for_resale_units = 12.0;
        assert!(check_bucket_consistency(&outcome).is_err());
    }
}
