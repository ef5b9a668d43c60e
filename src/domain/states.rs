//! Closed status enums and parsing utilities.
//!
//! Statuses are stored as TEXT in SQLite but only ever cross the storage
//! boundary through these enums.

use std::fmt;
use std::str::FromStr;

/// Lifecycle of one per-student simulation job.
///
/// `pending → running → (completed | failed)`. Terminal states are absorbing;
/// the only way out of `failed` is an explicit admin requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            _ => Err(format!("unknown job state: {s}")),
        }
    }
}

/// Lifecycle of an oracle batch. The middle states mirror the oracle's own
/// batch states so polling is a straight copy of the remote status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchState {
    Created,
    Submitted,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl BatchState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            BatchState::Created => "created",
            BatchState::Submitted => "submitted",
            BatchState::InProgress => "in_progress",
            BatchState::Finalizing => "finalizing",
            BatchState::Completed => "completed",
            BatchState::Failed => "failed",
            BatchState::Expired => "expired",
            BatchState::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Completed | BatchState::Failed | BatchState::Expired | BatchState::Cancelled
        )
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BatchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(BatchState::Created),
            // "validating" is what the oracle reports between upload and run
            "submitted" | "validating" => Ok(BatchState::Submitted),
            "in_progress" => Ok(BatchState::InProgress),
            "finalizing" => Ok(BatchState::Finalizing),
            "completed" => Ok(BatchState::Completed),
            "failed" => Ok(BatchState::Failed),
            "expired" => Ok(BatchState::Expired),
            "cancelled" | "cancelling" => Ok(BatchState::Cancelled),
            _ => Err(format!("unknown batch state: {s}")),
        }
    }
}

/// Error taxonomy recorded on failed jobs and used to pick retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Invariant,
    OracleTransient,
    OraclePermanent,
    OracleContent,
    CashAnchorMismatch,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Invariant => "invariant",
            ErrorKind::OracleTransient => "oracle_transient",
            ErrorKind::OraclePermanent => "oracle_permanent",
            ErrorKind::OracleContent => "oracle_content",
            ErrorKind::CashAnchorMismatch => "cash_anchor_mismatch",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// Transient kinds are re-enqueued with backoff; everything else is
    /// terminal for the job.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::OracleTransient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation" => Ok(ErrorKind::Validation),
            "invariant" => Ok(ErrorKind::Invariant),
            "oracle_transient" => Ok(ErrorKind::OracleTransient),
            "oracle_permanent" => Ok(ErrorKind::OraclePermanent),
            "oracle_content" => Ok(ErrorKind::OracleContent),
            "cash_anchor_mismatch" => Ok(ErrorKind::CashAnchorMismatch),
            "cancelled" => Ok(ErrorKind::Cancelled),
            "internal" => Ok(ErrorKind::Internal),
            _ => Err(format!("unknown error kind: {s}")),
        }
    }
}

/// Instructor-facing scenario lifecycle. Only `published` scenarios accept
/// submissions; only `closed` scenarios are simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioStatus {
    Draft,
    Published,
    Closed,
}

impl ScenarioStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ScenarioStatus::Draft => "draft",
            ScenarioStatus::Published => "published",
            ScenarioStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScenarioStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ScenarioStatus::Draft),
            "published" => Ok(ScenarioStatus::Published),
            "closed" => Ok(ScenarioStatus::Closed),
            _ => Err(format!("unknown scenario status: {s}")),
        }
    }
}

/// How a submission came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationMethod {
    Manual,
    Ai,
    ForwardPrevious,
}

impl GenerationMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            GenerationMethod::Manual => "MANUAL",
            GenerationMethod::Ai => "AI",
            GenerationMethod::ForwardPrevious => "FORWARD_PREVIOUS",
        }
    }
}

impl fmt::Display for GenerationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GenerationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL" => Ok(GenerationMethod::Manual),
            "AI" => Ok(GenerationMethod::Ai),
            "FORWARD_PREVIOUS" => Ok(GenerationMethod::ForwardPrevious),
            _ => Err(format!("unknown generation method: {s}")),
        }
    }
}

/// Outcome policy for students with no submission when a scenario closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutoGeneratePolicy {
    Manual,
    UseAi,
    ForwardPrevious,
}

impl AutoGeneratePolicy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AutoGeneratePolicy::Manual => "MANUAL",
            AutoGeneratePolicy::UseAi => "USE_AI",
            AutoGeneratePolicy::ForwardPrevious => "FORWARD_PREVIOUS",
        }
    }
}

impl FromStr for AutoGeneratePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL" => Ok(AutoGeneratePolicy::Manual),
            "USE_AI" => Ok(AutoGeneratePolicy::UseAi),
            "FORWARD_PREVIOUS" => Ok(AutoGeneratePolicy::ForwardPrevious),
            _ => Err(format!("unknown auto-generate policy: {s}")),
        }
    }
}

macro_rules! impl_serde_via_str {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

impl_serde_via_str!(JobState);
impl_serde_via_str!(BatchState);
impl_serde_via_str!(ErrorKind);
impl_serde_via_str!(ScenarioStatus);
impl_serde_via_str!(GenerationMethod);
impl_serde_via_str!(AutoGeneratePolicy);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_round_trip() {
        for state in [
            JobState::Pending,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("queued".parse::<JobState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());

        assert!(!BatchState::Finalizing.is_terminal());
        assert!(BatchState::Expired.is_terminal());
    }

    #[test]
    fn test_batch_state_accepts_oracle_aliases() {
        assert_eq!(
            "validating".parse::<BatchState>().unwrap(),
            BatchState::Submitted
        );
        assert_eq!(
            "cancelling".parse::<BatchState>().unwrap(),
            BatchState::Cancelled
        );
    }

    #[test]
    fn test_only_transient_errors_retry() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Invariant,
            ErrorKind::OraclePermanent,
            ErrorKind::OracleContent,
            ErrorKind::CashAnchorMismatch,
            ErrorKind::Cancelled,
            ErrorKind::Internal,
        ] {
            assert!(!kind.is_retryable(), "{kind} must not retry");
        }
        assert!(ErrorKind::OracleTransient.is_retryable());
    }

    #[test]
    fn test_generation_method_wire_names() {
        assert_eq!(GenerationMethod::ForwardPrevious.as_str(), "FORWARD_PREVIOUS");
        assert_eq!(
            "USE_AI".parse::<AutoGeneratePolicy>().unwrap(),
            AutoGeneratePolicy::UseAi
        );
    }
}
