//! Full-stack simulation tests.
//!
//! The runtime runs exactly as deployed: production oracle client, real
//! HTTP against a mock server, on-disk SQLite, driven from the
//! scenario-closed event through to ledger entries and notifications.

mod common;

use common::{balanced_outcome, build_world, completion_body};
use httpmock::prelude::*;

use ledgerix::bus::CATEGORY_NOTIFICATION;
use ledgerix::config::SimulationMode;
use ledgerix::db::queries;
use ledgerix::domain::{BatchState, ErrorKind, JobState};
use ledgerix::runtime::orchestrator::SimulationOrchestrator;
use ledgerix::runtime::queue::{JobQueue, QueueMessage, Topic};
use ledgerix::runtime::{batch, direct};

#[tokio::test]
async fn test_direct_flow_over_http() {
    let server = MockServer::start();
    let completion = server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .header("authorization", "Bearer test-key")
            .json_body_partial(r#"{"response_format": {"type": "json_schema"}}"#);
        then.status(200).json_body(completion_body(&balanced_outcome()));
    });

    let world = build_world(1, &server.base_url(), SimulationMode::Direct);
    let orchestrator = SimulationOrchestrator::new(world.ctx.clone());
    let report = orchestrator
        .handle_scenario_closed(&world.scenario_id, "instructor-1")
        .await
        .unwrap();
    assert_eq!(report.job_ids.len(), 1);

    let Some(QueueMessage::Direct { job_id }) =
        world.ctx.queue.next(Topic::SimulationDirect).await
    else {
        panic!("expected direct message");
    };
    direct::process_job(&world.ctx, &job_id).await.unwrap();
    completion.assert();

    let job = queries::get_job(&world.db, &job_id).unwrap().unwrap();
    assert_eq!(job.status, JobState::Completed);

    let entry = queries::get_ledger_entry(&world.db, &job.ledger_entry_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(entry.cash_before, 1000.0);
    assert_eq!(entry.cash_after, 1300.0);
    assert_eq!(entry.sales, 50);
    assert_eq!(entry.ai_model.as_deref(), Some("gpt-4o-mini"));

    // The student history chains seed -> week.
    let history = queries::list_ledger_entries(
        &world.db,
        &world.classroom_id,
        &world.students[0].user_id,
        None,
    )
    .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].cash_after, history[1].cash_before);

    // Exactly one notification was recorded for the append.
    let notifications = queries::list_events_for_scenario(&world.db, &world.scenario_id)
        .unwrap()
        .into_iter()
        .filter(|e| e.category == CATEGORY_NOTIFICATION)
        .count();
    assert_eq!(notifications, 1);
}

#[tokio::test]
async fn test_batch_flow_over_http() {
    let server = MockServer::start();
    let world = build_world(2, &server.base_url(), SimulationMode::Batch);

    let orchestrator = SimulationOrchestrator::new(world.ctx.clone());
    let report = orchestrator
        .handle_scenario_closed(&world.scenario_id, "instructor-1")
        .await
        .unwrap();
    assert_eq!(report.job_ids.len(), 2);

    let Some(QueueMessage::BatchSubmit {
        scenario_id,
        classroom_id,
        actor_id,
    }) = world.ctx.queue.next(Topic::SimulationBatch).await
    else {
        panic!("expected batch submit message");
    };

    // The oracle surface for the whole batch lifecycle.
    let pending =
        queries::list_jobs_by_status_for_scenario(&world.db, &world.scenario_id, JobState::Pending)
            .unwrap();
    let output = format!(
        "{}\n{}\n",
        serde_json::json!({
            "custom_id": pending[0].id,
            "response": {"status_code": 200, "body": completion_body(&balanced_outcome())},
        }),
        serde_json::json!({
            "custom_id": pending[1].id,
            "response": {"status_code": 400, "body": {"error": "schema rejected"}},
        }),
    );
    let upload = server.mock(|when, then| {
        when.method(POST).path("/files");
        then.status(200).json_body(serde_json::json!({"id": "file-in-1"}));
    });
    let create = server.mock(|when, then| {
        when.method(POST).path("/batches");
        then.status(200)
            .json_body(serde_json::json!({"id": "oracle-batch-1", "status": "validating"}));
    });
    let retrieve = server.mock(|when, then| {
        when.method(GET).path("/batches/oracle-batch-1");
        then.status(200).json_body(serde_json::json!({
            "id": "oracle-batch-1",
            "status": "completed",
            "output_file_id": "file-out-1",
        }));
    });
    let download = server.mock(|when, then| {
        when.method(GET).path("/files/file-out-1/content");
        then.status(200).body(&output);
    });

    batch::submit(&world.ctx, &scenario_id, &classroom_id, &actor_id)
        .await
        .unwrap();
    upload.assert();
    create.assert();

    let batch_row = {
        let job = queries::get_job(&world.db, &pending[0].id).unwrap().unwrap();
        assert_eq!(job.status, JobState::Running);
        queries::get_batch(&world.db, job.batch_id.as_ref().unwrap())
            .unwrap()
            .unwrap()
    };
    assert_eq!(batch_row.status, BatchState::Submitted);
    assert_eq!(batch_row.oracle_batch_id.as_deref(), Some("oracle-batch-1"));

    batch::poll(&world.ctx, &batch_row.id, "oracle-batch-1")
        .await
        .unwrap();
    retrieve.assert();
    download.assert();

    let final_batch = queries::get_batch(&world.db, &batch_row.id).unwrap().unwrap();
    assert_eq!(final_batch.status, BatchState::Completed);
    assert!(final_batch.finalized_at.is_some());

    let first = queries::get_job(&world.db, &pending[0].id).unwrap().unwrap();
    assert_eq!(first.status, JobState::Completed);
    assert!(first.ledger_entry_id.is_some());

    let second = queries::get_job(&world.db, &pending[1].id).unwrap().unwrap();
    assert_eq!(second.status, JobState::Failed);
    assert_eq!(second.error_kind, Some(ErrorKind::OraclePermanent));
}

#[tokio::test]
async fn test_direct_flow_rejects_bad_oracle_content() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(200).json_body(serde_json::json!({
            "choices": [{"message": {"content": "the dog ate my balance sheet"}}]
        }));
    });

    let world = build_world(1, &server.base_url(), SimulationMode::Direct);
    let orchestrator = SimulationOrchestrator::new(world.ctx.clone());
    let report = orchestrator
        .handle_scenario_closed(&world.scenario_id, "instructor-1")
        .await
        .unwrap();

    let Some(QueueMessage::Direct { job_id }) =
        world.ctx.queue.next(Topic::SimulationDirect).await
    else {
        panic!("expected direct message");
    };
    direct::process_job(&world.ctx, &job_id).await.unwrap();

    let job = queries::get_job(&world.db, &job_id).unwrap().unwrap();
    assert_eq!(job.status, JobState::Failed);
    assert_eq!(job.error_kind, Some(ErrorKind::OracleContent));
    let _ = report;
}
