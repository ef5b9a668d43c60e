//! Retry and poll cadence computation.
//!
//! Transient oracle errors back off exponentially from a 60 s base, capped
//! at 600 s, with uniform jitter of up to 15 s so replicas never thunder in
//! step. Batch polls run on a fixed cadence chosen by the batch's current
//! state, jittered the same way.

use std::time::Duration;

use rand::Rng;

use crate::config::Config;
use crate::domain::BatchState;

pub const RETRY_BASE_SECS: u64 = 60;
pub const RETRY_CAP_SECS: u64 = 600;
pub const JITTER_MAX_SECS: u64 = 15;

/// Delay before re-enqueueing a job after its `attempt`-th failed try.
pub fn retry_delay(attempt: i64, rng: &mut impl Rng) -> Duration {
    let attempt = attempt.max(1) as u32;
    let exponent = attempt.saturating_sub(1).min(16);
    let base = RETRY_BASE_SECS
        .saturating_mul(1u64 << exponent)
        .min(RETRY_CAP_SECS);
    with_jitter(Duration::from_secs(base), rng)
}

/// Delay before the first poll of a freshly submitted batch.
pub fn first_poll_delay(rng: &mut impl Rng) -> Duration {
    with_jitter(Duration::from_secs(RETRY_BASE_SECS), rng)
}

/// Poll cadence for a batch in `state`, from configuration.
pub fn poll_delay(state: BatchState, config: &Config, rng: &mut impl Rng) -> Duration {
    let seconds = match state {
        BatchState::Finalizing => config.batch_poll_finalizing_seconds,
        _ => config.batch_poll_seconds,
    }
    .min(config.batch_poll_max_seconds);
    with_jitter(Duration::from_secs(seconds), rng)
}

fn with_jitter(base: Duration, rng: &mut impl Rng) -> Duration {
    base + Duration::from_millis(rng.gen_range(0..=JITTER_MAX_SECS * 1000))
}
