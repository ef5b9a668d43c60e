//! Wire types for the oracle's chat and batch endpoints.

use serde::{Deserialize, Serialize};

use crate::domain::BatchState;

/// One chat message. Roles are the oracle's: `system`, `user`, `assistant`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A schema-constrained completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub response_format: ResponseFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    pub json_schema: JsonSchemaSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSchemaSpec {
    pub name: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// One line of a batch input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequestLine {
    pub custom_id: String,
    pub method: String,
    pub url: String,
    pub body: ChatRequest,
}

impl BatchRequestLine {
    pub fn post(custom_id: impl Into<String>, url: impl Into<String>, body: ChatRequest) -> Self {
        Self {
            custom_id: custom_id.into(),
            method: "POST".to_string(),
            url: url.into(),
            body,
        }
    }
}

/// One line of a batch output file.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchOutputLine {
    pub custom_id: String,
    #[serde(default)]
    pub response: Option<BatchItemResponse>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchItemResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

/// The oracle's view of a batch, reduced to what the poller needs.
#[derive(Debug, Clone)]
pub struct OracleBatch {
    pub id: String,
    pub status: BatchState,
    pub output_file_id: Option<String>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::schema::simulation_response_format;

    #[test]
    fn test_batch_request_line_serializes_in_oracle_shape() {
        let line = BatchRequestLine::post(
            "job-1",
            "/v1/chat/completions",
            ChatRequest {
                model: "gpt-4o-mini".to_string(),
                messages: vec![ChatMessage::system("be terse")],
                response_format: simulation_response_format(),
            },
        );
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["custom_id"], "job-1");
        assert_eq!(json["method"], "POST");
        assert_eq!(json["url"], "/v1/chat/completions");
        assert_eq!(json["body"]["response_format"]["type"], "json_schema");
    }

    #[test]
    fn test_batch_output_line_tolerates_missing_response() {
        let line: BatchOutputLine = serde_json::from_str(
            r#"{"custom_id":"job-2","error":{"message":"upstream failure"}}"#,
        )
        .unwrap();
        assert_eq!(line.custom_id, "job-2");
        assert!(line.response.is_none());
        assert!(line.error.is_some());
    }
}
