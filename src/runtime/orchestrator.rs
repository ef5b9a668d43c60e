//! Simulation orchestrator: turns a closed scenario into jobs.
//!
//! On a scenario-closed event the orchestrator resolves the enrolled
//! students (one store per student per classroom), ensures each has a
//! submission per the outcome's auto-generate policy, captures the cash and
//! inventory anchors plus the full calculation context, creates one job per
//! eligible student, and routes the work to the direct queue or a single
//! batch submit message.

use std::sync::Arc;

use crate::config::SimulationMode;
use crate::db::queries;
use crate::domain::{AutoGeneratePolicy, GenerationMethod, ScenarioStatus};
use crate::jobs::{self, JobError, NewJob};
use crate::prompt::{self, SimulationContext};

use super::queue::{JobQueue, QueueMessage, Topic};
use super::{RuntimeContext, SimError};

/// What a scenario-closed event turned into.
#[derive(Debug)]
pub struct DispatchReport {
    pub mode: SimulationMode,
    pub job_ids: Vec<String>,
    /// Students skipped for missing submissions (MANUAL policy) or live
    /// duplicate jobs.
    pub skipped: usize,
}

pub struct SimulationOrchestrator {
    ctx: Arc<RuntimeContext>,
}

impl SimulationOrchestrator {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self { ctx }
    }

    /// Handle a scenario-closed event end to end.
    pub async fn handle_scenario_closed(
        &self,
        scenario_id: &str,
        actor_id: &str,
    ) -> Result<DispatchReport, SimError> {
        let ctx = &self.ctx;
        let scenario = queries::get_scenario(&ctx.db, scenario_id)?
            .ok_or_else(|| JobError::NotFound(format!("scenario {scenario_id}")))?;
        if scenario.status != ScenarioStatus::Closed {
            return Err(JobError::ScenarioNotClosed(scenario_id.to_string()).into());
        }

        let classroom = queries::get_classroom(&ctx.db, &scenario.classroom_id)?
            .ok_or_else(|| JobError::NotFound(format!("classroom {}", scenario.classroom_id)))?;
        let outcome = queries::get_scenario_outcome(&ctx.db, scenario_id)?;
        let stores = queries::list_stores_for_classroom(&ctx.db, &classroom.id)?;

        let policy = outcome
            .as_ref()
            .map(|o| o.auto_generate_submissions)
            .unwrap_or(AutoGeneratePolicy::Manual);
        let chance = outcome
            .as_ref()
            .map(|o| o.random_event_chance_percent)
            .unwrap_or(0);

        let mut report = DispatchReport {
            mode: ctx.config.simulation_mode,
            job_ids: Vec::new(),
            skipped: 0,
        };

        for store in stores {
            let Some(submission) =
                self.ensure_submission(&scenario, &store.user_id, policy)?
            else {
                tracing::debug!(
                    scenario = scenario_id,
                    user = %store.user_id,
                    "no submission and policy is MANUAL; skipping student"
                );
                report.skipped += 1;
                continue;
            };

            let store_type = queries::get_store_type(&ctx.db, &store.store_type_id)?
                .ok_or_else(|| JobError::NotFound(format!("store type {}", store.store_type_id)))?;
            let prior = ctx.ledger.prior_state(&store.id, &store.user_id)?;
            let history = ctx.ledger.history(&classroom.id, &store.user_id, None)?;

            let include_random_event = ctx.config.ai_random_event_sampling
                && prompt::sample_random_event(chance, &mut rand::thread_rng());

            let context = SimulationContext {
                classroom: classroom.clone(),
                store: store.clone(),
                store_type,
                scenario: scenario.clone(),
                scenario_outcome: outcome.clone(),
                submission: submission.clone(),
                ledger_history: history,
                inventory_state: prior.inventory_state,
                cash_before: prior.cash_before,
                include_random_event,
            };
            let built = prompt::build_request(&context, &ctx.config.prompt_settings())?;

            let user_id = store.user_id.clone();
            match jobs::create_job(
                &ctx.db,
                NewJob {
                    classroom_id: classroom.id.clone(),
                    scenario_id: scenario.id.clone(),
                    user_id,
                    submission_id: submission.id.clone(),
                    dry_run: false,
                    expected_cash_before: prior.cash_before,
                    expected_inventory: prior.inventory_state,
                    context,
                    oracle_request: Some(built.request),
                },
            ) {
                Ok(job) => report.job_ids.push(job.id),
                Err(JobError::Duplicate { user, .. }) => {
                    tracing::debug!(scenario = scenario_id, user = %user, "live job exists; skipping");
                    report.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if report.job_ids.is_empty() {
            tracing::info!(scenario = scenario_id, "scenario closed with zero eligible students");
            return Ok(report);
        }

        match ctx.config.simulation_mode {
            SimulationMode::Direct => {
                for job_id in &report.job_ids {
                    ctx.queue
                        .publish(
                            Topic::SimulationDirect,
                            QueueMessage::Direct {
                                job_id: job_id.clone(),
                            },
                        )
                        .await?;
                }
            }
            SimulationMode::Batch => {
                ctx.queue
                    .publish(
                        Topic::SimulationBatch,
                        QueueMessage::BatchSubmit {
                            scenario_id: scenario.id.clone(),
                            classroom_id: classroom.id.clone(),
                            actor_id: actor_id.to_string(),
                        },
                    )
                    .await?;
            }
        }

        tracing::info!(
            scenario = scenario_id,
            mode = %ctx.config.simulation_mode,
            jobs = report.job_ids.len(),
            skipped = report.skipped,
            "scenario dispatched"
        );
        Ok(report)
    }

    /// Admin requeue of a failed job: back to pending and onto the direct
    /// queue, attempts preserved.
    pub async fn requeue_job(&self, job_id: &str) -> Result<bool, SimError> {
        if !queries::requeue_failed_job(&self.ctx.db, job_id)? {
            return Ok(false);
        }
        self.ctx
            .queue
            .publish(
                Topic::SimulationDirect,
                QueueMessage::Direct {
                    job_id: job_id.to_string(),
                },
            )
            .await?;
        tracing::info!(job = job_id, "failed job requeued");
        Ok(true)
    }

    /// Ensure the student has a submission, per the outcome policy. `None`
    /// means the student is ineligible this week.
    fn ensure_submission(
        &self,
        scenario: &queries::ScenarioRow,
        user_id: &str,
        policy: AutoGeneratePolicy,
    ) -> Result<Option<queries::SubmissionRow>, SimError> {
        let db = &self.ctx.db;
        if let Some(existing) = queries::get_submission(db, &scenario.id, user_id)? {
            return Ok(Some(existing));
        }

        let generated = match policy {
            AutoGeneratePolicy::Manual => return Ok(None),
            AutoGeneratePolicy::UseAi => queries::SubmissionRow {
                id: uuid::Uuid::new_v4().to_string(),
                scenario_id: scenario.id.clone(),
                user_id: user_id.to_string(),
                decisions_json: "{}".to_string(),
                generation_method: GenerationMethod::Ai,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
            AutoGeneratePolicy::ForwardPrevious => {
                let Some(previous) = queries::latest_prior_submission(db, &scenario.id, user_id)?
                else {
                    tracing::debug!(
                        scenario = %scenario.id,
                        user = user_id,
                        "FORWARD_PREVIOUS found nothing to forward; skipping student"
                    );
                    return Ok(None);
                };
                queries::SubmissionRow {
                    id: uuid::Uuid::new_v4().to_string(),
                    scenario_id: scenario.id.clone(),
                    user_id: user_id.to_string(),
                    decisions_json: previous.decisions_json,
                    generation_method: GenerationMethod::ForwardPrevious,
                    created_at: chrono::Utc::now().to_rfc3339(),
                }
            }
        };

        queries::insert_submission(db, &generated)?;
        tracing::debug!(
            scenario = %scenario.id,
            user = user_id,
            method = %generated.generation_method,
            "submission auto-generated"
        );
        Ok(Some(generated))
    }
}
