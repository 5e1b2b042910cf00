//! KPI Agent — Core library.
//! Request validation, the authenticated upstream call, response schema, chart metrics
//! and the conversation state machine behind the gateway and the chat client.

pub mod config;
pub mod conversation;
pub mod error;
pub mod metrics;
pub mod request;
pub mod schema;
pub mod service;
pub mod upstream;

pub use config::{BasicCredential, GatewayConfig};
pub use conversation::{
    AgentMessage, AgentStatus, Conversation, ConversationError, ConversationSession, Message,
    MessageId, Submission,
};
pub use error::{AgentError, AgentResult, ErrorKind};
pub use metrics::{derive_chart, format_delta, format_value, ChartData, MetricLabel, Reading};
pub use request::{validate_question, validate_text, QuestionEnvelope, QUESTION_REQUIRED};
pub use schema::{AgentResponse, MetricBlock, Window};
pub use service::{AgentBackend, AgentService, IngestOutcome};
pub use upstream::{UpstreamBody, UpstreamClient};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
