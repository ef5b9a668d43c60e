//! Startup recovery of interrupted work.
//!
//! A process can die between claiming a job and finishing it, or between
//! poll messages for a live batch. Recovery runs once at startup, before the
//! workers start consuming: direct jobs stuck in `running` go back to
//! `pending` and are re-enqueued; every non-terminal batch gets a fresh poll
//! message.

use std::sync::Arc;

use crate::db::queries;

use super::backoff;
use super::queue::{JobQueue, QueueMessage, Topic};
use super::{RuntimeContext, SimError};

#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub released_jobs: usize,
    pub rescheduled_batches: usize,
}

pub async fn recover(ctx: &Arc<RuntimeContext>) -> Result<RecoveryReport, SimError> {
    let mut report = RecoveryReport::default();

    for job in queries::list_interrupted_direct_jobs(&ctx.db)? {
        if queries::release_job(&ctx.db, &job.id)? {
            ctx.queue
                .publish(
                    Topic::SimulationDirect,
                    QueueMessage::Direct {
                        job_id: job.id.clone(),
                    },
                )
                .await?;
            tracing::info!(job = %job.id, "recovered interrupted direct job");
            report.released_jobs += 1;
        }
    }

    for batch in queries::list_live_batches(&ctx.db)? {
        let Some(oracle_batch_id) = batch.oracle_batch_id.clone() else {
            tracing::warn!(
                batch = %batch.id,
                status = %batch.status,
                "live batch has no oracle id; leaving for manual inspection"
            );
            continue;
        };
        let delay = backoff::first_poll_delay(&mut rand::thread_rng());
        ctx.queue
            .publish_delayed(
                Topic::SimulationBatch,
                QueueMessage::BatchPoll {
                    batch_id: batch.id.clone(),
                    oracle_batch_id,
                },
                delay,
            )
            .await?;
        tracing::info!(batch = %batch.id, "rescheduled poll for live batch");
        report.rescheduled_batches += 1;
    }

    Ok(report)
}
