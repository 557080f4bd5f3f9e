//! Conversation Memory domain types (spec.md §4.7)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain_types::{SessionId, Timestamp, UserId};

/// Sender of one turn of conversation; agents are named by capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    /// The end user.
    User,
    /// The orchestrator's synthesised reply.
    Assistant,
    /// A compaction summary standing in for an evicted message prefix.
    Summary,
}

impl Sender {
    /// Renders as the `sender="_summary"` convention from spec.md §4.7.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
            Sender::Summary => "_summary",
        }
    }
}

/// One recorded turn of conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub sender: Sender,
    /// Message body.
    pub content: String,
    /// When the message was appended.
    pub timestamp: Timestamp,
}

/// Current lifecycle phase of a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionLifecycle {
    /// Received a message within `sessionTimeout`.
    Active,
    /// Idle longer than `sessionTimeout` but not yet evicted.
    Inactive,
}

/// A user's conversation with the mesh, identified by `(sessionId, userId)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// This session's ID.
    pub session_id: SessionId,
    /// The user this session belongs to.
    pub user_id: UserId,
    /// Messages recorded so far, oldest first. May begin with a `_summary`
    /// message once compaction has run.
    pub messages: Vec<Message>,
    /// When this session was first created.
    pub created_at: Timestamp,
    /// Timestamp of the most recent `appendMessage` call.
    pub last_active_at: Timestamp,
    /// Current lifecycle phase.
    pub lifecycle: SessionLifecycle,
}

/// Planning/response context assembled from a session (spec.md §4.7
/// `contextFor`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// The most recent `n` messages.
    pub messages: Vec<Message>,
    /// Topics detected across the session's message content.
    pub topics: Vec<String>,
    /// Capitalised-token entities detected across the session.
    pub entities: Vec<String>,
    /// How many messages mention each capability/agent-ish keyword.
    pub agent_interaction_counts: BTreeMap<String, u64>,
}

/// A compacted summary of a session's older messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    /// The session this summary belongs to.
    pub session_id: SessionId,
    /// Summary body text.
    pub text: String,
    /// Number of original messages the summary stands in for.
    pub covers_messages: usize,
}
