//! Ledger engine unit tests

#[cfg(test)]
mod tests {
    use crate::ledger::{LedgerEngine, LedgerError, LedgerInput, LedgerOverride};
    use crate::testing::{balanced_outcome, seed_world};
    use pretty_assertions::assert_eq;

    fn input_for(world: &crate::testing::World) -> LedgerInput {
        LedgerInput {
            store_id: world.store_id.clone(),
            classroom_id: world.classroom_id.clone(),
            scenario_id: Some(world.scenario_id.clone()),
            submission_id: Some(world.submission_id.clone()),
            user_id: world.user_id.clone(),
            outcome: balanced_outcome(),
            ai: None,
            calculation_context_json: None,
        }
    }

    #[test]
    fn test_append_after_seed_preserves_history_order() {
        let world = seed_world();
        let engine = LedgerEngine::new(world.db.clone());

        let prior = engine.prior_state(&world.store_id, &world.user_id).unwrap();
        assert_eq!(prior.cash_before, 1000.0);
        assert_eq!(prior.inventory_state.refrigerated_units, 30.0);

        let entry = engine.append(input_for(&world)).unwrap();
        assert_eq!(entry.cash_after, 1300.0);
        assert_eq!(entry.net_profit, 300.0);

        let history = engine.history(&world.classroom_id, &world.user_id, None).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].scenario_id.is_none());
        assert_eq!(history[1].id, entry.id);
        // Earlier entries are untouched by the append.
        assert_eq!(history[0].cash_after, 1000.0);
    }

    #[test]
    fn test_append_rejects_broken_continuity() {
        let world = seed_world();
        let engine = LedgerEngine::new(world.db.clone());
        engine.prior_state(&world.store_id, &world.user_id).unwrap();

        let mut input = input_for(&world);
        input.outcome.cash_before = 900.0;
        input.outcome.cash_after = 1200.0;
        let err = engine.append(input).unwrap_err();
        assert!(matches!(err, LedgerError::Invariant(_)), "{err}");
    }

    #[test]
    fn test_append_rejects_duplicate_scenario_entry() {
        let world = seed_world();
        let engine = LedgerEngine::new(world.db.clone());
        engine.prior_state(&world.store_id, &world.user_id).unwrap();
        engine.append(input_for(&world)).unwrap();

        let mut second = input_for(&world);
        // Chain correctly off the first entry so only uniqueness can fail.
        second.outcome.cash_before = 1300.0;
        second.outcome.cash_after = 1600.0;
        let err = engine.append(second).unwrap_err();
        match err {
            LedgerError::Invariant(message) => assert!(message.contains("uniqueness")),
            other => panic!("expected invariant error, got {other}"),
        }
    }

    #[test]
    fn test_append_rejects_capacity_overflow() {
        let world = seed_world();
        let engine = LedgerEngine::new(world.db.clone());
        engine.prior_state(&world.store_id, &world.user_id).unwrap();

        let mut input = input_for(&world);
        // Refrigerated capacity is 40; push the end units to 45.
        let flow = &mut input.outcome.education.material_flow_by_bucket.refrigerated;
        flow.received_units = 35.0;
        flow.end_units = 45.0;
        input.outcome.inventory_state.refrigerated_units = 45.0;
        let err = engine.append(input).unwrap_err();
        match err {
            LedgerError::Invariant(message) => assert!(message.contains("capacity")),
            other => panic!("expected invariant error, got {other}"),
        }
    }

    #[test]
    fn test_seed_is_idempotent_per_store() {
        let world = seed_world();
        let engine = LedgerEngine::new(world.db.clone());

        let first = engine.seed(&world.store_id).unwrap();
        let second = engine.seed(&world.store_id).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.cash_before, 1000.0);
        assert_eq!(first.cash_after, 1000.0);
        assert_eq!(first.net_profit, 0.0);
        assert!(first.scenario_id.is_none());
    }

    #[test]
    fn test_summary_aggregates_and_excludes() {
        let world = seed_world();
        let engine = LedgerEngine::new(world.db.clone());
        engine.prior_state(&world.store_id, &world.user_id).unwrap();
        engine.append(input_for(&world)).unwrap();

        let summary = engine.summary(&world.classroom_id, &world.user_id, None).unwrap();
        assert_eq!(summary.entry_count, 2);
        assert_eq!(summary.total_sales, 50);
        assert_eq!(summary.total_revenue, 800.0);
        assert_eq!(summary.total_net_profit, 300.0);
        assert_eq!(summary.cash_balance, 1300.0);
        assert_eq!(summary.inventory_state.refrigerated_units, 20.0);

        let excluded = engine
            .summary(&world.classroom_id, &world.user_id, Some(&world.scenario_id))
            .unwrap();
        assert_eq!(excluded.entry_count, 1);
        assert_eq!(excluded.cash_balance, 1000.0);
    }

    #[test]
    fn test_override_renormalizes_and_marks_entry() {
        let world = seed_world();
        let engine = LedgerEngine::new(world.db.clone());
        engine.prior_state(&world.store_id, &world.user_id).unwrap();
        let entry = engine.append(input_for(&world)).unwrap();

        let patched = engine
            .override_entry(
                &entry.id,
                LedgerOverride {
                    cash_after: Some(1250.009),
                    summary: Some("Adjusted for a miscounted delivery.".to_string()),
                    ..Default::default()
                },
                "admin-1",
            )
            .unwrap();

        assert_eq!(patched.cash_after, 1250.01);
        assert_eq!(patched.net_profit, 250.01);
        assert!(patched.overridden);
        assert_eq!(patched.overridden_by.as_deref(), Some("admin-1"));
        assert!(patched.overridden_at.is_some());

        let reloaded = engine.history(&world.classroom_id, &world.user_id, None).unwrap();
        assert_eq!(reloaded[1].cash_after, 1250.01);
        assert_eq!(reloaded[1].summary, "Adjusted for a miscounted delivery.");
    }

    #[test]
    fn test_override_rejects_inconsistent_revenue() {
        let world = seed_world();
        let engine = LedgerEngine::new(world.db.clone());
        engine.prior_state(&world.store_id, &world.user_id).unwrap();
        let entry = engine.append(input_for(&world)).unwrap();

        // Sales change without a matching revenue change breaks invariant 4.
        let err = engine
            .override_entry(
                &entry.id,
                LedgerOverride {
                    sales: Some(10.0),
                    ..Default::default()
                },
                "admin-1",
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Invariant(_)));

        // Patching both sides together is accepted.
        let patched = engine
            .override_entry(
                &entry.id,
                LedgerOverride {
                    sales: Some(10.0),
                    revenue: Some(160.0),
                    ..Default::default()
                },
                "admin-1",
            )
            .unwrap();
        assert_eq!(patched.sales, 10);
        assert_eq!(patched.revenue, 160.0);
    }

    #[test]
    fn test_override_does_not_cascade() {
        let world = seed_world();
        let engine = LedgerEngine::new(world.db.clone());
        let seeded = engine.seed(&world.store_id).unwrap();

        // Lower the seed entry's closing cash; the week entry keeps its
        // original opening cash.
        engine.prior_state(&world.store_id, &world.user_id).unwrap();
        let week = engine.append(input_for(&world)).unwrap();
        engine
            .override_entry(
                &seeded.id,
                LedgerOverride {
                    cash_after: Some(900.0),
                    cash_before: Some(900.0),
                    ..Default::default()
                },
                "admin-1",
            )
            .unwrap();

        let history = engine.history(&world.classroom_id, &world.user_id, None).unwrap();
        assert_eq!(history[0].cash_after, 900.0);
        assert_eq!(history[1].id, week.id);
        assert_eq!(history[1].cash_before, 1000.0);
    }
}
