//! OpenAI-compatible oracle client.
//!
//! Covers the three surfaces the simulation core needs: schema-constrained
//! chat completions, file upload/download, and the asynchronous batch
//! endpoint. Status codes are triaged into the retry taxonomy here so the
//! workers never look at HTTP details.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::BatchState;

use super::types::{ChatRequest, ChatResponse, OracleBatch};
use super::{OracleClient, OracleError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Endpoint path recorded on every batch input line.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

const BATCH_COMPLETION_WINDOW: &str = "24h";

/// Per-request deadline. The workers layer their own job-level deadline on
/// top of this transport bound.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn triage_status(&self, status: reqwest::StatusCode, body: &str) -> OracleError {
        match status.as_u16() {
            401 | 403 => OracleError::Auth(format!(
                "oracle auth failed ({status}); check API key and account access"
            )),
            429 => OracleError::Transient(format!("oracle rate limited ({status}): {body}")),
            code if code >= 500 => {
                OracleError::Transient(format!("oracle error {status}: {body}"))
            }
            _ => OracleError::Permanent(format!("oracle rejected request {status}: {body}")),
        }
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<String, OracleError> {
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(self.triage_status(status, &text))
        }
    }
}

fn transport_error(e: reqwest::Error) -> OracleError {
    // Network-level failures (timeouts, refused connections, resets) are
    // retryable; everything surfaced as a response is triaged by status.
    OracleError::Transient(format!("oracle transport error: {e}"))
}

#[derive(Debug, serde::Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, serde::Deserialize)]
struct BatchObject {
    id: String,
    status: String,
    #[serde(default)]
    output_file_id: Option<String>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

impl BatchObject {
    fn into_oracle_batch(self) -> Result<OracleBatch, OracleError> {
        let status = self
            .status
            .parse::<BatchState>()
            .map_err(OracleError::Content)?;
        Ok(OracleBatch {
            id: self.id,
            status,
            output_file_id: self.output_file_id,
            error: self.errors.map(|e| e.to_string()),
        })
    }
}

#[async_trait]
impl OracleClient for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, OracleError> {
        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(REQUEST_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let text = self.read_body(response).await?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| OracleError::Content(format!("completion parse failed: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                OracleError::Content("missing choices[0].message.content in completion".to_string())
            })
    }

    async fn upload_batch_input(
        &self,
        file_name: &str,
        body: Vec<u8>,
    ) -> Result<String, OracleError> {
        let part = reqwest::multipart::Part::bytes(body)
            .file_name(file_name.to_string())
            .mime_str("application/jsonl")
            .map_err(|e| OracleError::Permanent(format!("batch file part: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part("file", part);

        let response = self
            .client
            .post(self.endpoint("files"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(REQUEST_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let text = self.read_body(response).await?;
        let file: FileObject = serde_json::from_str(&text)
            .map_err(|e| OracleError::Content(format!("file upload parse failed: {e}")))?;
        Ok(file.id)
    }

    async fn create_batch(&self, input_file_id: &str) -> Result<OracleBatch, OracleError> {
        let response = self
            .client
            .post(self.endpoint("batches"))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({
                "input_file_id": input_file_id,
                "endpoint": CHAT_COMPLETIONS_PATH,
                "completion_window": BATCH_COMPLETION_WINDOW,
            }))
            .send()
            .await
            .map_err(transport_error)?;

        let text = self.read_body(response).await?;
        let batch: BatchObject = serde_json::from_str(&text)
            .map_err(|e| OracleError::Content(format!("batch create parse failed: {e}")))?;
        batch.into_oracle_batch()
    }

    async fn retrieve_batch(&self, oracle_batch_id: &str) -> Result<OracleBatch, OracleError> {
        let response = self
            .client
            .get(self.endpoint(&format!("batches/{oracle_batch_id}")))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        let text = self.read_body(response).await?;
        let batch: BatchObject = serde_json::from_str(&text)
            .map_err(|e| OracleError::Content(format!("batch retrieve parse failed: {e}")))?;
        batch.into_oracle_batch()
    }

    async fn download_file(&self, file_id: &str) -> Result<String, OracleError> {
        let response = self
            .client
            .get(self.endpoint(&format!("files/{file_id}/content")))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;

        self.read_body(response).await
    }
}
