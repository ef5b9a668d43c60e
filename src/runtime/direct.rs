//! Direct execution workers.
//!
//! Each worker pulls `{jobId}` messages off the direct topic, runs the job
//! synchronously against the oracle, and writes the result. Transient oracle
//! failures put the job back on the backlog with exponential backoff;
//! everything else fails the job with its error kind. The `pending →
//! running` claim is the single-in-flight guarantee: a redelivered message
//! for a job that is no longer pending is dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::bus::{
    emit_and_record, Notification, NotificationSink, CATEGORY_SIMULATION, EVENT_JOB_STATUS_CHANGED,
};
use crate::db::queries;
use crate::domain::{ErrorKind, JobState};
use crate::jobs;
use crate::ledger::{AiMetadata, LedgerInput};
use crate::oracle::OracleClient;
use crate::prompt::validate::ValidatedReply;
use crate::prompt::{self, validate};

use super::backoff;
use super::queue::{JobQueue, QueueMessage, Topic};
use super::{log_worker_error, RuntimeContext, SimError};

pub async fn run_worker(ctx: Arc<RuntimeContext>, index: usize) {
    tracing::info!(worker = index, "direct worker started");
    while let Some(message) = ctx.queue.next(Topic::SimulationDirect).await {
        let QueueMessage::Direct { job_id } = message else {
            tracing::warn!(?message, "unexpected message on the direct topic");
            continue;
        };
        if let Err(error) = process_job(&ctx, &job_id).await {
            log_worker_error(Topic::SimulationDirect, &error);
        }
    }
    tracing::info!(worker = index, "direct worker stopped");
}

/// Run one job end to end. Returns Ok even when the job fails; Err is
/// reserved for infrastructure trouble (the message will be logged, not
/// retried; durable state is on the job).
pub async fn process_job(ctx: &RuntimeContext, job_id: &str) -> Result<(), SimError> {
    let Some(job) = queries::get_job(&ctx.db, job_id)? else {
        tracing::warn!(job = job_id, "direct message for unknown job");
        return Ok(());
    };
    if job.status != JobState::Pending {
        tracing::debug!(job = job_id, status = %job.status, "dropping redelivery for non-pending job");
        return Ok(());
    }
    if !queries::claim_job(&ctx.db, job_id, &Utc::now().to_rfc3339())? {
        return Ok(());
    }
    let attempt = job.attempts + 1;
    emit_job_status(ctx, &job, JobState::Running)?;

    match execute(ctx, &job).await {
        Ok(()) => Ok(()),
        Err(error) => handle_failure(ctx, &job, attempt, error).await,
    }
}

async fn execute(ctx: &RuntimeContext, job: &queries::JobRow) -> Result<(), SimError> {
    let request = match jobs::job_oracle_request(job)? {
        Some(request) => request,
        None => {
            let context = jobs::job_context(job)?;
            let built = prompt::build_request(&context, &ctx.config.prompt_settings())?;
            queries::set_job_oracle_request(
                &ctx.db,
                &job.id,
                &serde_json::to_string(&built.request)?,
            )?;
            built.request
        }
    };

    let deadline = ctx.config.oracle_timeout_seconds;
    let content = tokio::time::timeout(
        Duration::from_secs(deadline),
        ctx.oracle.complete(&request),
    )
    .await
    .map_err(|_| SimError::Deadline(deadline))??;

    let reply = validate::parse_and_validate(&content, job.expected_cash_before)?;
    finish_job(ctx, job, reply).await
}

/// Shared tail of both execution paths: record the anchor warning, append
/// unless dry-run, complete the job, emit the notification.
pub(crate) async fn finish_job(
    ctx: &RuntimeContext,
    job: &queries::JobRow,
    reply: ValidatedReply,
) -> Result<(), SimError> {
    if reply.anchor_corrected {
        queries::set_job_warning(&ctx.db, &job.id, ErrorKind::CashAnchorMismatch)?;
    }

    let entry = if job.dry_run {
        None
    } else {
        let context = jobs::job_context(job)?;
        Some(ctx.ledger.append(LedgerInput {
            store_id: context.store.id.clone(),
            classroom_id: job.classroom_id.clone(),
            scenario_id: Some(job.scenario_id.clone()),
            submission_id: Some(job.submission_id.clone()),
            user_id: job.user_id.clone(),
            outcome: reply.outcome,
            ai: Some(AiMetadata {
                model: ctx.config.model.clone(),
                run_id: job.id.clone(),
                generated_at: Utc::now().to_rfc3339(),
            }),
            calculation_context_json: Some(job.context_json.clone()),
        })?)
    };

    queries::complete_job(
        &ctx.db,
        &job.id,
        entry.as_ref().map(|e| e.id.as_str()),
        &Utc::now().to_rfc3339(),
    )?;
    emit_job_status(ctx, job, JobState::Completed)?;

    if let Some(entry) = entry {
        let notification = Notification::scenario_closed_for_user(
            entry.id.clone(),
            job.scenario_id.clone(),
            job.user_id.clone(),
            entry.net_profit,
        );
        // At-least-once: a failed delivery is logged, never fails the job.
        if let Err(error) = ctx.sink.deliver(&notification).await {
            tracing::warn!(entry = %entry.id, "notification delivery failed: {error}");
        }
    }
    Ok(())
}

async fn handle_failure(
    ctx: &RuntimeContext,
    job: &queries::JobRow,
    attempt: i64,
    error: SimError,
) -> Result<(), SimError> {
    let kind = error.kind();
    if kind.is_retryable() && attempt < ctx.config.direct_max_attempts {
        queries::release_job(&ctx.db, &job.id)?;
        let delay = backoff::retry_delay(attempt, &mut rand::thread_rng());
        tracing::warn!(
            job = %job.id,
            attempt,
            delay_secs = delay.as_secs(),
            "transient oracle failure, re-enqueueing: {error}"
        );
        ctx.queue
            .publish_delayed(
                Topic::SimulationDirect,
                QueueMessage::Direct {
                    job_id: job.id.clone(),
                },
                delay,
            )
            .await?;
        return Ok(());
    }

    tracing::error!(job = %job.id, attempt, kind = %kind, "job failed: {error}");
    queries::fail_job(
        &ctx.db,
        &job.id,
        kind,
        &error.to_string(),
        &Utc::now().to_rfc3339(),
        attempt,
    )?;
    emit_job_status(ctx, job, JobState::Failed)?;
    Ok(())
}

fn emit_job_status(
    ctx: &RuntimeContext,
    job: &queries::JobRow,
    status: JobState,
) -> Result<(), SimError> {
    emit_and_record(
        &ctx.db,
        &ctx.bus,
        CATEGORY_SIMULATION,
        EVENT_JOB_STATUS_CHANGED,
        Some(job.scenario_id.clone()),
        serde_json::json!({
            "jobId": job.id,
            "userId": job.user_id,
            "status": status,
        }),
    )?;
    Ok(())
}
