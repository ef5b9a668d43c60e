//! The structured result contract for one simulated week.
//!
//! These types are the single source of truth for the oracle's reply shape:
//! serde gives the wire names (camelCase) and schemars derives the strict
//! JSON schema attached to every oracle request. Counts are `f64` on the
//! wire; normalization rounds them to whole units before the ledger sees
//! them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Units on hand per inventory bucket.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InventoryState {
    pub refrigerated_units: f64,
    pub ambient_units: f64,
    pub not_for_resale_units: f64,
}

impl InventoryState {
    pub fn new(refrigerated: f64, ambient: f64, not_for_resale: f64) -> Self {
        Self {
            refrigerated_units: refrigerated,
            ambient_units: ambient,
            not_for_resale_units: not_for_resale,
        }
    }
}

/// Begin/receive/use/waste/end breakdown for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BucketFlow {
    pub begin_units: f64,
    pub received_units: f64,
    pub used_units: f64,
    pub waste_units: f64,
    pub end_units: f64,
    pub end_units_value: f64,
}

impl BucketFlow {
    /// `end = begin + received - used - waste`, in whole units.
    pub fn reconciles(&self) -> bool {
        let expected =
            self.begin_units + self.received_units - self.used_units - self.waste_units;
        (expected - self.end_units).abs() < 0.5
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MaterialFlow {
    pub refrigerated: BucketFlow,
    pub ambient: BucketFlow,
    pub not_for_resale: BucketFlow,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CostBreakdown {
    pub ingredient_cost: f64,
    pub labor_cost: f64,
    pub logistics_cost: f64,
    pub tariff_cost: f64,
    pub holding_cost: f64,
    pub overflow_storage_cost: f64,
    pub expedite_cost: f64,
    pub waste_disposal_cost: f64,
    pub other_cost: f64,
    pub explanation: String,
}

/// Opaque-to-the-ledger teaching payload. The engine only reads
/// `realized_unit_price` and `material_flow_by_bucket` for normalization;
/// everything else flows through to downstream consumers untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Education {
    pub demand_forecast: f64,
    pub demand_actual: f64,
    pub service_level: f64,
    pub fill_rate: f64,
    pub stockout_units: f64,
    pub lost_sales_units: f64,
    pub backorder_units: f64,
    pub realized_unit_price: f64,
    pub material_flow_by_bucket: MaterialFlow,
    pub cost_breakdown: CostBreakdown,
    pub teaching_notes: String,
}

/// The exact top-level object the oracle must return for one student-week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SimulationOutcome {
    pub sales: f64,
    pub revenue: f64,
    pub costs: f64,
    pub waste: f64,
    pub cash_before: f64,
    pub cash_after: f64,
    pub inventory_state: InventoryState,
    pub net_profit: f64,
    pub random_event: Option<String>,
    pub summary: String,
    pub education: Education,
}
