//! Numeric normalization applied before any ledger write.
//!
//! One pass, in a fixed order: round cents fields half-away-from-zero to two
//! decimals, round count fields to whole units, reconcile the inventory
//! state against the material-flow end units, then recompute the derived
//! fields (`net_profit`, `cash_after`, `revenue`) from their sources. The
//! pass is idempotent; running it twice never changes a value the second
//! time.

use crate::domain::money::{round2, round_units};
use crate::domain::outcome::{BucketFlow, SimulationOutcome};

fn normalize_flow(flow: &mut BucketFlow) {
    flow.begin_units = round_units(flow.begin_units);
    flow.received_units = round_units(flow.received_units);
    flow.used_units = round_units(flow.used_units);
    flow.waste_units = round_units(flow.waste_units);
    flow.end_units = round_units(flow.end_units);
    flow.end_units_value = round2(flow.end_units_value);
}

/// Normalize an outcome in place.
pub fn normalize_outcome(outcome: &mut SimulationOutcome) {
    // Count fields to whole units.
    outcome.sales = round_units(outcome.sales);
    outcome.inventory_state.refrigerated_units = round_units(outcome.inventory_state.refrigerated_units);
    outcome.inventory_state.ambient_units = round_units(outcome.inventory_state.ambient_units);
    outcome.inventory_state.not_for_resale_units =
        round_units(outcome.inventory_state.not_for_resale_units);

    let education = &mut outcome.education;
    education.stockout_units = round_units(education.stockout_units);
    education.lost_sales_units = round_units(education.lost_sales_units);
    education.backorder_units = round_units(education.backorder_units);

    let flows = &mut education.material_flow_by_bucket;
    normalize_flow(&mut flows.refrigerated);
    normalize_flow(&mut flows.ambient);
    normalize_flow(&mut flows.not_for_resale);

    // Cents fields to two decimals.
    outcome.revenue = round2(outcome.revenue);
    outcome.costs = round2(outcome.costs);
    outcome.waste = round2(outcome.waste);
    outcome.cash_before = round2(outcome.cash_before);
    outcome.cash_after = round2(outcome.cash_after);
    outcome.net_profit = round2(outcome.net_profit);
    education.realized_unit_price = round2(education.realized_unit_price);

    let costs = &mut education.cost_breakdown;
    costs.ingredient_cost = round2(costs.ingredient_cost);
    costs.labor_cost = round2(costs.labor_cost);
    costs.logistics_cost = round2(costs.logistics_cost);
    costs.tariff_cost = round2(costs.tariff_cost);
    costs.holding_cost = round2(costs.holding_cost);
    costs.overflow_storage_cost = round2(costs.overflow_storage_cost);
    costs.expedite_cost = round2(costs.expedite_cost);
    costs.waste_disposal_cost = round2(costs.waste_disposal_cost);
    costs.other_cost = round2(costs.other_cost);

    // Material flow wins when it disagrees with the reported inventory state.
    let flows = &outcome.education.material_flow_by_bucket;
    if outcome.inventory_state.refrigerated_units != flows.refrigerated.end_units {
        outcome.inventory_state.refrigerated_units = flows.refrigerated.end_units;
    }
    if outcome.inventory_state.ambient_units != flows.ambient.end_units {
        outcome.inventory_state.ambient_units = flows.ambient.end_units;
    }
    if outcome.inventory_state.not_for_resale_units != flows.not_for_resale.end_units {
        outcome.inventory_state.not_for_resale_units = flows.not_for_resale.end_units;
    }

    // Derived fields from their sources.
    outcome.net_profit = round2(outcome.cash_after - outcome.cash_before);
    outcome.cash_after = round2(outcome.cash_before + outcome.net_profit);
    outcome.revenue = round2(outcome.sales * outcome.education.realized_unit_price);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::{Education, InventoryState, MaterialFlow};
    use pretty_assertions::assert_eq;

    fn raw_outcome() -> SimulationOutcome {
        SimulationOutcome {
            sales: 49.6,
            revenue: 812.339,
            costs: 500.004,
            waste: 9.995,
            cash_before: 1000.001,
            cash_after: 1300.006,
            inventory_state: InventoryState::new(19.7, 40.2, 10.0),
            net_profit: 299.0,
            random_event: None,
            summary: "week".to_string(),
            education: Education {
                realized_unit_price: 16.004,
                material_flow_by_bucket: MaterialFlow {
                    refrigerated: BucketFlow {
                        begin_units: 30.0,
                        received_units: 10.0,
                        used_units: 15.2,
                        waste_units: 4.8,
                        end_units: 20.0,
                        end_units_value: 100.009,
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
        }
    }

    #[test]
    fn test_counts_round_to_whole_units() {
        let mut outcome = raw_outcome();
        normalize_outcome(&mut outcome);
        assert_eq!(outcome.sales, 50.0);
        assert_eq!(outcome.education.material_flow_by_bucket.refrigerated.used_units, 15.0);
        assert_eq!(outcome.education.material_flow_by_bucket.refrigerated.waste_units, 5.0);
    }

    #[test]
    fn test_inventory_follows_material_flow() {
        let mut outcome = raw_outcome();
        // Reported 19.7 refrigerated disagrees with the flow's 20.
        normalize_outcome(&mut outcome);
        assert_eq!(outcome.inventory_state.refrigerated_units, 20.0);
        assert_eq!(outcome.inventory_state.ambient_units, 40.0);
        assert_eq!(outcome.inventory_state.not_for_resale_units, 10.0);
    }

    #[test]
    fn test_derived_fields_recomputed() {
        let mut outcome = raw_outcome();
        normalize_outcome(&mut outcome);
        // net profit from the rounded cash pair, not the oracle's claim
        assert_eq!(outcome.net_profit, 300.01);
        assert_eq!(outcome.cash_after, 1300.01);
        // revenue from sales x realized unit price
        assert_eq!(outcome.revenue, 800.0);
    }

    #[test]
    fn test_zero_sales_zero_revenue() {
        let mut outcome = raw_outcome();
        outcome.sales = 0.0;
        outcome.revenue = 812.0;
        normalize_outcome(&mut outcome);
        assert_eq!(outcome.revenue, 0.0);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mut once = raw_outcome();
        normalize_outcome(&mut once);
        let mut twice = once.clone();
        normalize_outcome(&mut twice);
        assert_eq!(twice, once);
    }
}
