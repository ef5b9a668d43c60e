//! Oracle client for the external simulation LLM.
//!
//! ## Structure
//!
//! - `types`: chat and batch wire types
//! - `schema`: the strict response schema derived from the domain types
//! - `openai`: the OpenAI-compatible HTTP implementation
//!
//! The runtime depends only on the `OracleClient` trait; tests substitute a
//! scripted implementation.

pub mod openai;
pub mod schema;
pub mod types;

use async_trait::async_trait;

use crate::domain::ErrorKind;

pub use openai::{OpenAiClient, CHAT_COMPLETIONS_PATH, DEFAULT_BASE_URL};
pub use schema::simulation_response_format;
pub use types::{
    BatchItemResponse, BatchOutputLine, BatchRequestLine, ChatMessage, ChatRequest, OracleBatch,
};

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Rate limits, timeouts, 5xx. Retried with backoff.
    #[error("transient oracle error: {0}")]
    Transient(String),
    /// Other 4xx. Terminal for the job.
    #[error("permanent oracle error: {0}")]
    Permanent(String),
    /// Credentials rejected. Terminal.
    #[error("oracle auth error: {0}")]
    Auth(String),
    /// Reply did not parse or did not match the schema. Terminal.
    #[error("oracle content error: {0}")]
    Content(String),
}

impl OracleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OracleError::Transient(_) => ErrorKind::OracleTransient,
            OracleError::Permanent(_) | OracleError::Auth(_) => ErrorKind::OraclePermanent,
            OracleError::Content(_) => ErrorKind::OracleContent,
        }
    }
}

/// The narrow seam between the runtime and the external LLM service.
#[async_trait]
pub trait OracleClient: Send + Sync {
    /// Run one schema-constrained completion and return the message content.
    async fn complete(&self, request: &ChatRequest) -> Result<String, OracleError>;

    /// Upload a newline-delimited batch input file; returns the file id.
    async fn upload_batch_input(&self, file_name: &str, body: Vec<u8>)
        -> Result<String, OracleError>;

    /// Submit a batch referencing an uploaded input file.
    async fn create_batch(&self, input_file_id: &str) -> Result<OracleBatch, OracleError>;

    /// Fetch the oracle's current view of a batch.
    async fn retrieve_batch(&self, oracle_batch_id: &str) -> Result<OracleBatch, OracleError>;

    /// Download a file's content (the batch output).
    async fn download_file(&self, file_id: &str) -> Result<String, OracleError>;
}
