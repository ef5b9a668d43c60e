//! Batch orchestration: submit, poll, fan-out.
//!
//! Large scenarios trade latency for throughput on the oracle's batch
//! endpoint. The submit step packs every pending job of a scenario into one
//! newline-delimited file, uploads it, and flips the jobs to running in a
//! single statement. Polling mirrors the oracle's batch states on the local
//! record and re-schedules itself until a terminal state. Fan-out walks the
//! output file line by line and finishes each job exactly once; duplicate
//! lines for a completed job are dropped.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::bus::{emit_and_record, CATEGORY_BATCH, EVENT_BATCH_STATUS_CHANGED};
use crate::db::queries;
use crate::domain::{BatchState, ErrorKind, JobState};
use crate::jobs;
use crate::oracle::types::{BatchOutputLine, BatchRequestLine, ChatRequest};
use crate::oracle::{OracleClient, CHAT_COMPLETIONS_PATH};
use crate::prompt::{self, validate};

use super::backoff;
use super::direct::finish_job;
use super::queue::{JobQueue, QueueMessage, Topic};
use super::{log_worker_error, RuntimeContext, SimError};

pub async fn run_worker(ctx: Arc<RuntimeContext>, index: usize) {
    tracing::info!(worker = index, "batch worker started");
    while let Some(message) = ctx.queue.next(Topic::SimulationBatch).await {
        let result = match message {
            QueueMessage::BatchSubmit {
                scenario_id,
                classroom_id,
                actor_id,
            } => submit(&ctx, &scenario_id, &classroom_id, &actor_id).await,
            QueueMessage::BatchPoll {
                batch_id,
                oracle_batch_id,
            } => poll(&ctx, &batch_id, &oracle_batch_id).await,
            other => {
                tracing::warn!(?other, "unexpected message on the batch topic");
                Ok(())
            }
        };
        if let Err(error) = result {
            log_worker_error(Topic::SimulationBatch, &error);
        }
    }
    tracing::info!(worker = index, "batch worker stopped");
}

/// The batch input file. Owned exclusively by the submit step and removed on
/// every exit path, success or failure.
struct BatchPackFile {
    path: PathBuf,
}

impl BatchPackFile {
    fn create(batch_id: &str, content: &[u8]) -> std::io::Result<Self> {
        let path = std::env::temp_dir().join(format!("ledgerix-batch-{batch_id}.jsonl"));
        std::fs::write(&path, content)?;
        Ok(Self { path })
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "batch.jsonl".to_string())
    }

    fn read(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }
}

impl Drop for BatchPackFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), "pack file cleanup failed: {e}");
        }
    }
}

/// Pack every pending job of a scenario into one oracle batch.
pub async fn submit(
    ctx: &RuntimeContext,
    scenario_id: &str,
    classroom_id: &str,
    actor_id: &str,
) -> Result<(), SimError> {
    let pending =
        queries::list_jobs_by_status_for_scenario(&ctx.db, scenario_id, JobState::Pending)?;
    if pending.is_empty() {
        tracing::info!(scenario = scenario_id, "no pending jobs; skipping batch submit");
        return Ok(());
    }

    let batch = queries::BatchRow {
        id: Uuid::new_v4().to_string(),
        scenario_id: scenario_id.to_string(),
        classroom_id: classroom_id.to_string(),
        oracle_batch_id: None,
        input_file_id: None,
        output_file_id: None,
        status: BatchState::Created,
        job_count: pending.len() as i64,
        submit_attempts: 0,
        poll_attempts: 0,
        submitted_at: None,
        finalized_at: None,
        created_at: Utc::now().to_rfc3339(),
        error: None,
    };
    queries::insert_batch(&ctx.db, &batch)?;
    tracing::info!(
        batch = %batch.id,
        scenario = scenario_id,
        jobs = pending.len(),
        actor = actor_id,
        "packing batch"
    );

    let mut lines = String::new();
    for job in &pending {
        let request = request_for(ctx, job)?;
        let line = BatchRequestLine::post(job.id.clone(), CHAT_COMPLETIONS_PATH, request);
        lines.push_str(&serde_json::to_string(&line)?);
        lines.push('\n');
    }
    let pack = BatchPackFile::create(&batch.id, lines.as_bytes())?;

    loop {
        let attempts = queries::bump_batch_submit_attempts(&ctx.db, &batch.id)?;
        match try_submit(ctx, &pack).await {
            Ok((input_file_id, oracle_batch)) => {
                let now = Utc::now().to_rfc3339();
                queries::mark_batch_submitted(
                    &ctx.db,
                    &batch.id,
                    &oracle_batch.id,
                    &input_file_id,
                    pending.len() as i64,
                    &now,
                )?;
                for job in &pending {
                    queries::assign_job_to_batch(&ctx.db, &job.id, &batch.id, &input_file_id, &now)?;
                }
                let moved = queries::mark_batch_jobs_running(&ctx.db, &batch.id, &now)?;
                emit_batch_status(ctx, &batch.id, scenario_id, BatchState::Submitted)?;
                tracing::info!(
                    batch = %batch.id,
                    oracle_batch = %oracle_batch.id,
                    jobs = moved,
                    "batch submitted"
                );

                let delay = backoff::first_poll_delay(&mut rand::thread_rng());
                ctx.queue
                    .publish_delayed(
                        Topic::SimulationBatch,
                        QueueMessage::BatchPoll {
                            batch_id: batch.id.clone(),
                            oracle_batch_id: oracle_batch.id,
                        },
                        delay,
                    )
                    .await?;
                return Ok(());
            }
            Err(error) if error.is_retryable() && attempts < ctx.config.batch_max_attempts_submit => {
                let delay = backoff::retry_delay(attempts, &mut rand::thread_rng());
                tracing::warn!(
                    batch = %batch.id,
                    attempts,
                    delay_secs = delay.as_secs(),
                    "batch submit failed transiently, retrying: {error}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                let now = Utc::now().to_rfc3339();
                queries::finalize_batch(
                    &ctx.db,
                    &batch.id,
                    BatchState::Failed,
                    None,
                    &now,
                    Some(&error.to_string()),
                )?;
                for job in &pending {
                    queries::fail_job(
                        &ctx.db,
                        &job.id,
                        error.kind(),
                        &format!("batch submit failed: {error}"),
                        &now,
                        job.attempts,
                    )?;
                }
                emit_batch_status(ctx, &batch.id, scenario_id, BatchState::Failed)?;
                return Err(error);
            }
        }
    }
}

fn request_for(ctx: &RuntimeContext, job: &queries::JobRow) -> Result<ChatRequest, SimError> {
    if let Some(request) = jobs::job_oracle_request(job)? {
        return Ok(request);
    }
    let context = jobs::job_context(job)?;
    let built = prompt::build_request(&context, &ctx.config.prompt_settings())?;
    queries::set_job_oracle_request(&ctx.db, &job.id, &serde_json::to_string(&built.request)?)?;
    Ok(built.request)
}

async fn try_submit(
    ctx: &RuntimeContext,
    pack: &BatchPackFile,
) -> Result<(String, crate::oracle::OracleBatch), SimError> {
    let body = pack.read()?;
    let input_file_id = ctx
        .oracle
        .upload_batch_input(&pack.file_name(), body)
        .await?;
    let oracle_batch = ctx.oracle.create_batch(&input_file_id).await?;
    Ok((input_file_id, oracle_batch))
}

/// One poll step. Re-schedules itself while the batch is live.
pub async fn poll(
    ctx: &RuntimeContext,
    batch_id: &str,
    oracle_batch_id: &str,
) -> Result<(), SimError> {
    let Some(batch) = queries::get_batch(&ctx.db, batch_id)? else {
        tracing::warn!(batch = batch_id, "poll message for unknown batch");
        return Ok(());
    };
    if batch.status.is_terminal() {
        tracing::debug!(batch = batch_id, status = %batch.status, "dropping poll for finished batch");
        return Ok(());
    }

    let oracle_batch = match ctx.oracle.retrieve_batch(oracle_batch_id).await {
        Ok(oracle_batch) => oracle_batch,
        Err(error) => {
            let attempts = queries::bump_batch_poll_attempts(&ctx.db, batch_id)?;
            if matches!(error.kind(), ErrorKind::OracleTransient)
                && attempts < ctx.config.batch_max_attempts_poll
            {
                let delay = backoff::retry_delay(attempts, &mut rand::thread_rng());
                tracing::warn!(
                    batch = batch_id,
                    attempts,
                    delay_secs = delay.as_secs(),
                    "batch poll failed transiently, retrying: {error}"
                );
                ctx.queue
                    .publish_delayed(
                        Topic::SimulationBatch,
                        QueueMessage::BatchPoll {
                            batch_id: batch_id.to_string(),
                            oracle_batch_id: oracle_batch_id.to_string(),
                        },
                        delay,
                    )
                    .await?;
                return Ok(());
            }
            fail_batch(ctx, &batch, error.kind(), &error.to_string()).await?;
            return Err(error.into());
        }
    };

    match oracle_batch.status {
        BatchState::Submitted | BatchState::InProgress => {
            queries::update_batch_status(&ctx.db, batch_id, BatchState::InProgress)?;
            reschedule_poll(ctx, batch_id, oracle_batch_id, BatchState::InProgress).await
        }
        BatchState::Finalizing => {
            queries::update_batch_status(&ctx.db, batch_id, BatchState::Finalizing)?;
            reschedule_poll(ctx, batch_id, oracle_batch_id, BatchState::Finalizing).await
        }
        BatchState::Completed => {
            let output_file_id = oracle_batch.output_file_id.clone().ok_or_else(|| {
                SimError::Oracle(crate::oracle::OracleError::Content(
                    "completed batch has no output file".to_string(),
                ))
            })?;
            let output = ctx.oracle.download_file(&output_file_id).await?;
            let stats = fan_out(ctx, &batch, &output).await?;

            // Jobs with no output line would hang in running forever.
            let now = Utc::now().to_rfc3339();
            for job in queries::list_jobs_for_batch(&ctx.db, &batch.id)? {
                if job.status == JobState::Running {
                    queries::fail_job(
                        &ctx.db,
                        &job.id,
                        ErrorKind::OracleContent,
                        "batch output had no line for this job",
                        &now,
                        job.attempts,
                    )?;
                }
            }

            queries::finalize_batch(
                &ctx.db,
                &batch.id,
                BatchState::Completed,
                Some(&output_file_id),
                &now,
                None,
            )?;
            emit_batch_status(ctx, &batch.id, &batch.scenario_id, BatchState::Completed)?;
            tracing::info!(
                batch = %batch.id,
                completed = stats.completed,
                failed = stats.failed,
                skipped = stats.skipped,
                "batch fan-out finished"
            );
            Ok(())
        }
        BatchState::Failed | BatchState::Expired | BatchState::Cancelled => {
            let reason = oracle_batch
                .error
                .unwrap_or_else(|| format!("oracle batch {}", oracle_batch.status));
            fail_batch(ctx, &batch, ErrorKind::OracleTransient, &reason).await
        }
        BatchState::Created => {
            // The oracle never reports `created`; treat as still submitted.
            reschedule_poll(ctx, batch_id, oracle_batch_id, BatchState::Submitted).await
        }
    }
}

async fn reschedule_poll(
    ctx: &RuntimeContext,
    batch_id: &str,
    oracle_batch_id: &str,
    state: BatchState,
) -> Result<(), SimError> {
    let delay = backoff::poll_delay(state, &ctx.config, &mut rand::thread_rng());
    ctx.queue
        .publish_delayed(
            Topic::SimulationBatch,
            QueueMessage::BatchPoll {
                batch_id: batch_id.to_string(),
                oracle_batch_id: oracle_batch_id.to_string(),
            },
            delay,
        )
        .await?;
    Ok(())
}

/// Terminal batch failure: every in-flight job fails with the terminal
/// reason; the batch record is marked failed.
async fn fail_batch(
    ctx: &RuntimeContext,
    batch: &queries::BatchRow,
    kind: ErrorKind,
    reason: &str,
) -> Result<(), SimError> {
    let now = Utc::now().to_rfc3339();
    for job in queries::list_jobs_for_batch(&ctx.db, &batch.id)? {
        if job.status == JobState::Running {
            queries::fail_job(&ctx.db, &job.id, kind, reason, &now, job.attempts)?;
        }
    }
    queries::finalize_batch(&ctx.db, &batch.id, BatchState::Failed, None, &now, Some(reason))?;
    emit_batch_status(ctx, &batch.id, &batch.scenario_id, BatchState::Failed)?;
    tracing::error!(batch = %batch.id, "batch failed: {reason}");
    Ok(())
}

#[derive(Debug, Default, PartialEq)]
pub struct FanOutStats {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Apply a batch output file to its jobs. Idempotent per line: output for a
/// job already in a terminal state is dropped.
pub async fn fan_out(
    ctx: &RuntimeContext,
    batch: &queries::BatchRow,
    output: &str,
) -> Result<FanOutStats, SimError> {
    let mut stats = FanOutStats::default();
    for raw_line in output.lines() {
        if raw_line.trim().is_empty() {
            continue;
        }
        let line: BatchOutputLine = match serde_json::from_str(raw_line) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(batch = %batch.id, "unparseable batch output line: {e}");
                stats.skipped += 1;
                continue;
            }
        };
        match fan_out_line(ctx, &line).await? {
            LineResult::Completed => stats.completed += 1,
            LineResult::Failed => stats.failed += 1,
            LineResult::Skipped => stats.skipped += 1,
        }
    }
    Ok(stats)
}

enum LineResult {
    Completed,
    Failed,
    Skipped,
}

async fn fan_out_line(ctx: &RuntimeContext, line: &BatchOutputLine) -> Result<LineResult, SimError> {
    let Some(job) = queries::get_job(&ctx.db, &line.custom_id)? else {
        tracing::warn!(custom_id = %line.custom_id, "batch output for unknown job");
        return Ok(LineResult::Skipped);
    };
    if job.status.is_terminal() {
        tracing::debug!(job = %job.id, status = %job.status, "dropping duplicate batch output line");
        return Ok(LineResult::Skipped);
    }

    match line_reply(line) {
        Ok(content) => match finish_from_content(ctx, &job, &content).await {
            Ok(()) => Ok(LineResult::Completed),
            Err(error) => {
                queries::fail_job(
                    &ctx.db,
                    &job.id,
                    error.kind(),
                    &error.to_string(),
                    &Utc::now().to_rfc3339(),
                    job.attempts,
                )?;
                Ok(LineResult::Failed)
            }
        },
        Err((kind, message)) => {
            queries::fail_job(
                &ctx.db,
                &job.id,
                kind,
                &message,
                &Utc::now().to_rfc3339(),
                job.attempts,
            )?;
            Ok(LineResult::Failed)
        }
    }
}

async fn finish_from_content(
    ctx: &RuntimeContext,
    job: &queries::JobRow,
    content: &str,
) -> Result<(), SimError> {
    let reply = validate::parse_and_validate(content, job.expected_cash_before)?;
    finish_job(ctx, job, reply).await
}

/// Pull the completion content out of one output line, or classify why it
/// cannot be used.
fn line_reply(line: &BatchOutputLine) -> Result<String, (ErrorKind, String)> {
    let Some(response) = &line.response else {
        let message = line
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "batch item carried neither response nor error".to_string());
        return Err((ErrorKind::OraclePermanent, message));
    };
    if !(200..300).contains(&response.status_code) {
        let kind = match response.status_code {
            429 => ErrorKind::OracleTransient,
            code if code >= 500 => ErrorKind::OracleTransient,
            _ => ErrorKind::OraclePermanent,
        };
        return Err((kind, format!("batch item status {}", response.status_code)));
    }
    response.body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            (
                ErrorKind::OracleContent,
                "batch item body has no message content".to_string(),
            )
        })
}

fn emit_batch_status(
    ctx: &RuntimeContext,
    batch_id: &str,
    scenario_id: &str,
    status: BatchState,
) -> Result<(), SimError> {
    emit_and_record(
        &ctx.db,
        &ctx.bus,
        CATEGORY_BATCH,
        EVENT_BATCH_STATUS_CHANGED,
        Some(scenario_id.to_string()),
        serde_json::json!({
            "batchId": batch_id,
            "status": status,
        }),
    )?;
    Ok(())
}
