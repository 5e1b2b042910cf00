//! Conversation state machine.
//!
//! Each submission appends a user message and a pending agent message. The agent message
//! is later resolved exactly once, by its identifier, to `Completed` or `Failed`:
//!
//! ```text
//! Pending ──ok──▶ Completed   (chart data, or empty when no metrics came back)
//!    └────err──▶ Failed       (generic text, raw error kept for diagnostics)
//! ```
//!
//! Several questions may be in flight at once, so resolution never assumes the
//! pending entry is the last one.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};
use crate::metrics::{derive_chart, ChartData, Deltas, WindowMeta};
use crate::request::validate_text;
use crate::schema::AgentResponse;
use crate::service::AgentBackend;

pub type MessageId = Uuid;

pub const PENDING_TEXT: &str = "Querying…";
pub const ANSWER_TEXT: &str = "Here is your answer:";
pub const FAILURE_TEXT: &str = "Failed to get a response.";
/// Shown by renderers for a completed answer without chart data.
pub const NO_METRICS_TEXT: &str = "No metrics returned by the agent.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AgentStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserMessage {
    pub id: MessageId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentMessage {
    pub id: MessageId,
    pub status: AgentStatus,
    pub loading: bool,
    pub text: String,
    #[serde(rename = "chartData", skip_serializing_if = "Option::is_none")]
    pub chart_data: Option<ChartData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<WindowMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deltas: Option<Deltas>,
    /// Raw failure message, for diagnostics only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentMessage {
    fn pending(id: MessageId) -> Self {
        Self {
            id,
            status: AgentStatus::Pending,
            loading: true,
            text: PENDING_TEXT.to_string(),
            chart_data: None,
            meta: None,
            deltas: None,
            error: None,
        }
    }

    fn complete(&mut self, response: &AgentResponse) {
        let chart = derive_chart(response);
        self.status = AgentStatus::Completed;
        self.loading = false;
        self.text = ANSWER_TEXT.to_string();
        self.deltas = chart.as_ref().map(|c| c.deltas.clone());
        self.meta = response
            .window
            .as_ref()
            .map(|_| WindowMeta::from_response(response));
        self.chart_data = chart;
    }

    fn fail(&mut self, err: &AgentError) {
        self.status = AgentStatus::Failed;
        self.loading = false;
        self.text = FAILURE_TEXT.to_string();
        self.chart_data = None;
        self.deltas = None;
        self.error = Some(err.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Agent(AgentMessage),
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Message::User(m) => m.id,
            Message::Agent(m) => m.id,
        }
    }

    pub fn as_agent(&self) -> Option<&AgentMessage> {
        match self {
            Message::Agent(m) => Some(m),
            Message::User(_) => None,
        }
    }
}

/// Identifiers handed back by [`Conversation::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub user_id: MessageId,
    pub agent_id: MessageId,
    pub question: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConversationError {
    #[error("no message with id {0}")]
    UnknownMessage(MessageId),
    #[error("message {0} is not an agent message")]
    NotAnAgentMessage(MessageId),
    #[error("message {0} was already resolved")]
    AlreadyResolved(MessageId),
}

/// Ordered message list plus an id → position index.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the user message and its pending agent reply.
    /// Blank text is rejected and leaves the conversation untouched.
    pub fn submit(&mut self, text: &str) -> AgentResult<Submission> {
        let question = validate_text(text)?;

        let user_id = self.fresh_id();
        self.push(Message::User(UserMessage {
            id: user_id,
            text: question.clone(),
        }));
        let agent_id = self.fresh_id();
        self.push(Message::Agent(AgentMessage::pending(agent_id)));

        Ok(Submission {
            user_id,
            agent_id,
            question,
        })
    }

    /// Move the pending agent message `agent_id` to its terminal state.
    pub fn resolve(
        &mut self,
        agent_id: MessageId,
        outcome: AgentResult<AgentResponse>,
    ) -> Result<AgentStatus, ConversationError> {
        let pos = *self
            .index
            .get(&agent_id)
            .ok_or(ConversationError::UnknownMessage(agent_id))?;
        let msg = match &mut self.messages[pos] {
            Message::Agent(m) => m,
            Message::User(_) => return Err(ConversationError::NotAnAgentMessage(agent_id)),
        };
        if msg.status.is_terminal() {
            return Err(ConversationError::AlreadyResolved(agent_id));
        }

        match outcome {
            Ok(response) => msg.complete(&response),
            Err(err) => msg.fail(&err),
        }
        Ok(msg.status)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.index.get(&id).map(|&pos| &self.messages[pos])
    }

    pub fn agent(&self, id: MessageId) -> Option<&AgentMessage> {
        self.get(id).and_then(Message::as_agent)
    }

    /// Number of agent messages still waiting on the upstream.
    pub fn pending(&self) -> usize {
        self.messages
            .iter()
            .filter_map(Message::as_agent)
            .filter(|m| m.status == AgentStatus::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn fresh_id(&self) -> MessageId {
        loop {
            let id = Uuid::new_v4();
            if !self.index.contains_key(&id) {
                return id;
            }
        }
    }

    fn push(&mut self, message: Message) {
        self.index.insert(message.id(), self.messages.len());
        self.messages.push(message);
    }
}

/// Async driver: submits, awaits the backend without holding the lock, resolves by id.
pub struct ConversationSession<B> {
    backend: Arc<B>,
    conversation: Arc<Mutex<Conversation>>,
}

impl<B> Clone for ConversationSession<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            conversation: Arc::clone(&self.conversation),
        }
    }
}

impl<B: AgentBackend> ConversationSession<B> {
    pub fn new(backend: B) -> Self {
        Self::with_backend(Arc::new(backend))
    }

    pub fn with_backend(backend: Arc<B>) -> Self {
        Self {
            backend,
            conversation: Arc::new(Mutex::new(Conversation::new())),
        }
    }

    /// Ask a question and return the id of its agent message once it is resolved.
    ///
    /// Only validation errors are returned; upstream failures end up on the message.
    pub async fn ask(&self, text: &str) -> AgentResult<MessageId> {
        let submission = self.conversation.lock().await.submit(text)?;
        let agent_id = submission.agent_id;
        let mut abandon = AbandonGuard::new(Arc::clone(&self.conversation), agent_id);

        let outcome = self.backend.query(&submission.question).await;
        if let Err(e) = &outcome {
            tracing::warn!(%agent_id, kind = ?e.kind(), "[CONVERSATION] query failed: {}", e);
        }

        let mut conversation = self.conversation.lock().await;
        match conversation.resolve(agent_id, outcome) {
            Ok(status) => tracing::debug!(%agent_id, ?status, "[CONVERSATION] resolved"),
            Err(e) => tracing::error!(%agent_id, "[CONVERSATION] resolve rejected: {}", e),
        }
        abandon.disarm();
        Ok(agent_id)
    }

    pub async fn agent(&self, id: MessageId) -> Option<AgentMessage> {
        self.conversation.lock().await.agent(id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Message> {
        self.conversation.lock().await.messages().to_vec()
    }

    pub async fn pending(&self) -> usize {
        self.conversation.lock().await.pending()
    }
}

/// Fails the pending agent message if `ask` is dropped before it resolves it.
struct AbandonGuard {
    conversation: Arc<Mutex<Conversation>>,
    agent_id: MessageId,
    armed: bool,
}

impl AbandonGuard {
    fn new(conversation: Arc<Mutex<Conversation>>, agent_id: MessageId) -> Self {
        Self {
            conversation,
            agent_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let agent_id = self.agent_id;
        tracing::warn!(%agent_id, "[CONVERSATION] query abandoned before it resolved");

        if let Ok(mut conversation) = self.conversation.try_lock() {
            let _ = conversation.resolve(agent_id, Err(AgentError::Cancelled));
            return;
        }
        // Lock is busy: finish on the runtime instead of blocking in drop.
        let conversation = Arc::clone(&self.conversation);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = conversation
                        .lock()
                        .await
                        .resolve(agent_id, Err(AgentError::Cancelled));
                });
            }
            Err(_) => tracing::error!(%agent_id, "[CONVERSATION] no runtime to fail abandoned query"),
        }
    }
}
