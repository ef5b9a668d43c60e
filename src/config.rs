//! Environment configuration.
//!
//! The recognized keys are a closed set with defaults; there is no free-form
//! options bag. `.env` files are honored in development via dotenvy.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::prompt::PromptSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Which execution path a closed scenario takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationMode {
    Direct,
    Batch,
}

impl SimulationMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SimulationMode::Direct => "direct",
            SimulationMode::Batch => "batch",
        }
    }
}

impl fmt::Display for SimulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SimulationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(SimulationMode::Direct),
            "batch" => Ok(SimulationMode::Batch),
            _ => Err(format!("unknown simulation mode: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub model: String,
    pub simulation_mode: SimulationMode,
    pub batch_poll_seconds: u64,
    pub batch_poll_finalizing_seconds: u64,
    pub batch_poll_max_seconds: u64,
    pub batch_max_attempts_poll: i64,
    pub batch_max_attempts_submit: i64,
    pub direct_worker_concurrency: usize,
    pub batch_worker_concurrency: usize,
    pub direct_max_attempts: i64,
    pub ai_max_message_chars: usize,
    pub ai_random_event_sampling: bool,
    pub oracle_timeout_seconds: u64,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub database_path: String,
}

impl Config {
    /// Load from the process environment, honoring a `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            model: var_or("MODEL", "gpt-4o-mini"),
            simulation_mode: parse_var("SIMULATION_MODE", SimulationMode::Direct)?,
            batch_poll_seconds: parse_var("BATCH_POLL_SECONDS", 120)?,
            batch_poll_finalizing_seconds: parse_var("BATCH_POLL_FINALIZING_SECONDS", 60)?,
            batch_poll_max_seconds: parse_var("BATCH_POLL_MAX_SECONDS", 600)?,
            batch_max_attempts_poll: parse_var("BATCH_MAX_ATTEMPTS_POLL", 20)?,
            batch_max_attempts_submit: parse_var("BATCH_MAX_ATTEMPTS_SUBMIT", 10)?,
            direct_worker_concurrency: parse_var("DIRECT_WORKER_CONCURRENCY", 4)?,
            batch_worker_concurrency: parse_var("BATCH_WORKER_CONCURRENCY", 2)?,
            direct_max_attempts: parse_var("DIRECT_MAX_ATTEMPTS", 5)?,
            ai_max_message_chars: parse_var("AI_MAX_MESSAGE_CHARS", 25_000)?,
            ai_random_event_sampling: on_off("AI_RANDOM_EVENT_SAMPLING", true)?,
            oracle_timeout_seconds: parse_var("ORACLE_TIMEOUT_SECONDS", 120)?,
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .map_err(|_| ConfigError::Missing("OPENAI_API_KEY"))?,
            openai_base_url: std::env::var("OPENAI_BASE_URL").ok(),
            database_path: var_or("DATABASE_PATH", "ledgerix.db"),
        })
    }

    pub fn prompt_settings(&self) -> PromptSettings {
        PromptSettings {
            model: self.model.clone(),
            max_message_chars: self.ai_max_message_chars,
        }
    }

    /// Defaults without touching the environment. Used by tests.
    pub fn for_tests() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            simulation_mode: SimulationMode::Direct,
            batch_poll_seconds: 120,
            batch_poll_finalizing_seconds: 60,
            batch_poll_max_seconds: 600,
            batch_max_attempts_poll: 20,
            batch_max_attempts_submit: 10,
            direct_worker_concurrency: 2,
            batch_worker_concurrency: 1,
            direct_max_attempts: 5,
            ai_max_message_chars: 25_000,
            ai_random_event_sampling: true,
            oracle_timeout_seconds: 30,
            openai_api_key: "test-key".to_string(),
            openai_base_url: None,
            database_path: ":memory:".to_string(),
        }
    }
}

fn var_or(key: &'static str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn on_off(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => match raw.as_str() {
            "on" => Ok(true),
            "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
        Err(_) => Ok(default),
    }
}
