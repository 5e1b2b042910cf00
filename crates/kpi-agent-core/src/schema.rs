//! Response schema for the agent workflow.
//!
//! Every top-level field is optional, but a field that is present must have the right
//! type: a mismatch is a [`AgentError::SchemaViolation`], never a silent coercion.
//! Unknown keys are dropped.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{AgentError, AgentResult};
use crate::upstream::UpstreamBody;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: String,
    pub end: String,
}

/// One KPI as the engine reports it. All values are strings on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricBlock {
    pub current: String,
    #[serde(default)]
    pub previous: String,
    #[serde(default)]
    pub delta_pct: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentResponse {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub window: Option<Window>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub cac: Option<MetricBlock>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub roas: Option<MetricBlock>,
}

// Absent keys fall back to `None` via `default`; a present `null` must still match `T`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

const OBJECT_FIELDS: &[&str] = &["window", "cac", "roas"];

impl AgentResponse {
    /// Validate a parsed upstream value against the response shape.
    pub fn validate(value: &Value) -> AgentResult<Self> {
        let map = value.as_object().ok_or_else(|| {
            AgentError::SchemaViolation(format!("expected an object, got {}", type_name(value)))
        })?;
        // serde would also accept positional arrays for structs; the wire format is objects only.
        for field in OBJECT_FIELDS {
            if let Some(v) = map.get(*field) {
                if !v.is_object() {
                    return Err(AgentError::SchemaViolation(format!(
                        "{}: expected an object, got {}",
                        field,
                        type_name(v)
                    )));
                }
            }
        }
        AgentResponse::deserialize(value).map_err(|e| AgentError::SchemaViolation(e.to_string()))
    }

    pub fn from_upstream(body: UpstreamBody) -> AgentResult<Self> {
        match body {
            UpstreamBody::Json(v) => Self::validate(&v),
            UpstreamBody::Text(_) => Err(AgentError::SchemaViolation(
                "expected a JSON object, got plain text".to_string(),
            )),
        }
    }

    pub fn has_metrics(&self) -> bool {
        self.cac.is_some() || self.roas.is_some()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
