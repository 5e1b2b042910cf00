//! Inbound request validation. Runs before anything touches the network.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, AgentResult};

pub const QUESTION_REQUIRED: &str = "Field \"question\" is required.";

/// Body forwarded to the agent workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionEnvelope {
    pub question: String,
}

/// Validates a raw JSON payload and returns the trimmed question.
pub fn validate_question(payload: &Value) -> AgentResult<String> {
    match payload.get("question") {
        Some(Value::String(q)) => validate_text(q),
        _ => Err(AgentError::Validation(QUESTION_REQUIRED.to_string())),
    }
}

/// Same rule for already typed input.
pub fn validate_text(text: &str) -> AgentResult<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AgentError::Validation(QUESTION_REQUIRED.to_string()));
    }
    Ok(trimmed.to_string())
}
