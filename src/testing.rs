//! Shared fixtures for unit tests.
//!
//! Builds a minimal classroom world (classroom, store type, store, closed
//! scenario with outcome, submission) against an in-memory database, plus a
//! balanced oracle outcome that satisfies every ledger invariant.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::db::{queries, Database};
use crate::domain::outcome::{
    BucketFlow, Education, InventoryState, MaterialFlow, SimulationOutcome,
};
use crate::domain::{AutoGeneratePolicy, GenerationMethod, ScenarioStatus};

pub fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Ids of a seeded classroom world.
pub struct World {
    pub db: Arc<Database>,
    pub classroom_id: String,
    pub store_type_id: String,
    pub store_id: String,
    pub scenario_id: String,
    pub user_id: String,
    pub submission_id: String,
}

/// One classroom, one student with a store, one closed scenario with an
/// outcome and a manual submission. Starting balance 1000, capacities
/// (40, 80, 60), starting units (30, 40, 10).
pub fn seed_world() -> World {
    let db = Arc::new(Database::open_in_memory().expect("in-memory DB"));
    seed_world_on(db)
}

pub fn seed_world_on(db: Arc<Database>) -> World {
    let classroom_id = Uuid::new_v4().to_string();
    let store_type_id = Uuid::new_v4().to_string();
    let store_id = Uuid::new_v4().to_string();
    let scenario_id = Uuid::new_v4().to_string();
    let user_id = Uuid::new_v4().to_string();
    let submission_id = Uuid::new_v4().to_string();

    queries::insert_classroom(
        &db,
        &queries::ClassroomRow {
            id: classroom_id.clone(),
            name: "Ops 101".to_string(),
            base_prompts_json: r#"[{"role":"system","content":"You grade fairly."}]"#.to_string(),
            starting_balance: 1000.0,
            created_at: now(),
        },
    )
    .unwrap();
    queries::insert_store_type(
        &db,
        &queries::StoreTypeRow {
            id: store_type_id.clone(),
            name: "Corner cafe".to_string(),
            refrigerated_capacity_units: 40,
            ambient_capacity_units: 80,
            not_for_resale_capacity_units: 60,
            refrigerated_starting_units: 30,
            ambient_starting_units: 40,
            not_for_resale_starting_units: 10,
            cost_per_unit: 4.0,
            price_baseline: 16.0,
        },
    )
    .unwrap();
    queries::insert_store(
        &db,
        &queries::StoreRow {
            id: store_id.clone(),
            classroom_id: classroom_id.clone(),
            store_type_id: store_type_id.clone(),
            user_id: user_id.clone(),
            name: "Store A".to_string(),
            variables_json: Some(r#"{"pricing-multiplier":1.0}"#.to_string()),
            created_at: now(),
        },
    )
    .unwrap();
    queries::insert_scenario(
        &db,
        &queries::ScenarioRow {
            id: scenario_id.clone(),
            classroom_id: classroom_id.clone(),
            title: "Week 1".to_string(),
            status: ScenarioStatus::Closed,
            created_at: now(),
            closed_at: Some(now()),
        },
    )
    .unwrap();
    queries::insert_scenario_outcome(
        &db,
        &queries::ScenarioOutcomeRow {
            scenario_id: scenario_id.clone(),
            notes: "normal week".to_string(),
            random_event_chance_percent: 0,
            auto_generate_submissions: AutoGeneratePolicy::Manual,
            punish_absent_students: 0,
            created_at: now(),
        },
    )
    .unwrap();
    queries::insert_submission(
        &db,
        &queries::SubmissionRow {
            id: submission_id.clone(),
            scenario_id: scenario_id.clone(),
            user_id: user_id.clone(),
            decisions_json: r#"{"pricing-multiplier":1.0}"#.to_string(),
            generation_method: GenerationMethod::Manual,
            created_at: now(),
        },
    )
    .unwrap();

    World {
        db,
        classroom_id,
        store_type_id,
        store_id,
        scenario_id,
        user_id,
        submission_id,
    }
}

/// Enroll one more student in the seeded world: a store and a manual
/// submission for the existing scenario. Returns (user_id, store_id,
/// submission_id).
pub fn add_student(world: &World) -> (String, String, String) {
    let user_id = Uuid::new_v4().to_string();
    let store_id = Uuid::new_v4().to_string();
    let submission_id = Uuid::new_v4().to_string();

    queries::insert_store(
        &world.db,
        &queries::StoreRow {
            id: store_id.clone(),
            classroom_id: world.classroom_id.clone(),
            store_type_id: world.store_type_id.clone(),
            user_id: user_id.clone(),
            name: format!("Store {}", &user_id[..8]),
            variables_json: None,
            created_at: now(),
        },
    )
    .unwrap();
    queries::insert_submission(
        &world.db,
        &queries::SubmissionRow {
            id: submission_id.clone(),
            scenario_id: world.scenario_id.clone(),
            user_id: user_id.clone(),
            decisions_json: "{}".to_string(),
            generation_method: GenerationMethod::Manual,
            created_at: now(),
        },
    )
    .unwrap();

    (user_id, store_id, submission_id)
}

/// An outcome for the seeded world's first week: opens at 1000, closes at
/// 1300, flows balance against the (30, 40, 10) starting units.
pub fn balanced_outcome() -> SimulationOutcome {
    SimulationOutcome {
        sales: 50.0,
        revenue: 800.0,
        costs: 500.0,
        waste: 10.0,
        cash_before: 1000.0,
        cash_after: 1300.0,
        inventory_state: InventoryState::new(20.0, 40.0, 10.0),
        net_profit: 300.0,
        random_event: None,
        summary: "Normal week with steady demand.".to_string(),
        education: Education {
            demand_forecast: 52.0,
            demand_actual: 50.0,
            service_level: 0.96,
            fill_rate: 0.98,
            stockout_units: 0.0,
            lost_sales_units: 0.0,
            backorder_units: 0.0,
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
                explanation: "Steady replenishment".to_string(),
            },
            cost_breakdown: Default::default(),
            teaching_notes: "Forecast error stayed under 5%.".to_string(),
        },
    }
}
