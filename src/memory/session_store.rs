//! Conversation Memory implementation (spec.md §4.7, component C7)

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tracing::instrument;

use crate::domain_types::{SessionId, Timestamp, UserId};
use crate::memory::domain_types::{Context, Message, Sender, Session, SessionLifecycle, Summary};
use crate::ports::Clock;

/// Curated topic vocabulary (spec.md §4.7 "Topic extraction").
const TOPIC_VOCABULARY: &[&str] = &["weather", "finance", "travel", "assistance"];

/// Errors raised by Conversation Memory.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// No session exists under this ID.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
}

/// Tunables for Conversation Memory (spec.md §4.7, §6 defaults).
#[derive(Debug, Clone, Copy)]
pub struct MemoryConfig {
    /// Messages returned by `contextFor`'s recent-messages window.
    pub context_window_size: usize,
    /// Idle duration after which a session becomes `Inactive`.
    pub session_timeout: Duration,
    /// Message count past which the oldest prefix is compacted.
    pub max_messages: usize,
    /// Idle duration (from `Inactive`) after which a session is evicted.
    pub retention: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            context_window_size: 20,
            session_timeout: Duration::from_secs(60 * 60),
            max_messages: 100,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Conversation Memory: per-session message history, context assembly, and
/// compaction.
pub struct ConversationMemory {
    sessions: DashMap<SessionId, Session>,
    config: MemoryConfig,
    clock: Arc<dyn Clock>,
}

impl ConversationMemory {
    /// Creates an empty memory store.
    #[must_use]
    pub fn new(config: MemoryConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            config,
            clock,
        })
    }

    /// Appends `message` to `session_id`, creating the session on first use
    /// for `(session_id, user_id)`. Triggers compaction if the session now
    /// exceeds `maxMessages`.
    #[instrument(skip(self, content))]
    pub fn append_message(
        &self,
        session_id: SessionId,
        user_id: UserId,
        sender: Sender,
        content: String,
    ) {
        let now = self.clock.now();
        let mut session = self.sessions.entry(session_id).or_insert_with(|| Session {
            session_id,
            user_id,
            messages: Vec::new(),
            created_at: now,
            last_active_at: now,
            lifecycle: SessionLifecycle::Active,
        });
        session.messages.push(Message {
            sender,
            content,
            timestamp: now,
        });
        session.last_active_at = now;
        session.lifecycle = SessionLifecycle::Active;

        if session.messages.len() > self.config.max_messages {
            compact(&mut session.messages, self.config.max_messages / 2);
        }
    }

    /// Returns the most recent `n` messages for `session_id`.
    ///
    /// # Errors
    /// Returns [`MemoryError::SessionNotFound`] if the session doesn't exist.
    pub fn recent_messages(&self, session_id: SessionId, n: usize) -> Result<Vec<Message>, MemoryError> {
        let session = self
            .sessions
            .get(&session_id)
            .ok_or(MemoryError::SessionNotFound(session_id))?;
        let len = session.messages.len();
        Ok(session.messages[len.saturating_sub(n)..].to_vec())
    }

    /// Substring-searches every message across every session belonging to
    /// `user_id`.
    #[must_use]
    pub fn search(&self, user_id: &UserId, query: &str) -> Vec<Message> {
        let needle = query.to_lowercase();
        self.sessions
            .iter()
            .filter(|e| &e.value().user_id == user_id)
            .flat_map(|e| {
                e.value()
                    .messages
                    .iter()
                    .filter(|m| m.content.to_lowercase().contains(&needle))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Builds the planning/response context for `session_id`.
    ///
    /// # Errors
    /// Returns [`MemoryError::SessionNotFound`] if the session doesn't exist.
    pub fn context_for(&self, session_id: SessionId) -> Result<Context, MemoryError> {
        let session = self
            .sessions
            .get(&session_id)
            .ok_or(MemoryError::SessionNotFound(session_id))?;
        let messages = &session.messages;
        let window = &messages[messages.len().saturating_sub(self.config.context_window_size)..];

        let mut topics = Vec::new();
        let mut entities = Vec::new();
        let mut agent_interaction_counts: BTreeMap<String, u64> = BTreeMap::new();

        for message in messages {
            for topic in extract_topics(&message.content) {
                if !topics.contains(&topic) {
                    topics.push(topic.clone());
                }
                *agent_interaction_counts.entry(topic).or_insert(0) += 1;
            }
            for entity in extract_entities(&message.content) {
                if !entities.contains(&entity) {
                    entities.push(entity);
                }
            }
        }

        Ok(Context {
            messages: window.to_vec(),
            topics,
            entities,
            agent_interaction_counts,
        })
    }

    /// Compacts `session_id` immediately and returns the resulting summary,
    /// without waiting for the message count to cross `maxMessages`.
    ///
    /// # Errors
    /// Returns [`MemoryError::SessionNotFound`] if the session doesn't exist.
    pub fn summarise(&self, session_id: SessionId) -> Result<Summary, MemoryError> {
        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(MemoryError::SessionNotFound(session_id))?;
        let covers = session.messages.len();
        let text = build_summary_text(&session.messages);
        session.messages = vec![Message {
            sender: Sender::Summary,
            content: text.clone(),
            timestamp: self.clock.now(),
        }];
        Ok(Summary {
            session_id,
            text,
            covers_messages: covers,
        })
    }

    /// Marks sessions idle past `sessionTimeout` as `Inactive`, and evicts
    /// sessions idle past `retention`.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let timeout_ms = u64::try_from(self.config.session_timeout.as_millis()).unwrap_or(u64::MAX);
        let retention_ms = u64::try_from(self.config.retention.as_millis()).unwrap_or(u64::MAX);

        let mut to_evict = Vec::new();
        for mut entry in self.sessions.iter_mut() {
            let idle_ms = entry.value().last_active_at.elapsed_ms_until(now);
            if idle_ms >= retention_ms {
                to_evict.push(*entry.key());
            } else if idle_ms >= timeout_ms {
                entry.value_mut().lifecycle = SessionLifecycle::Inactive;
            }
        }
        for id in to_evict {
            self.sessions.remove(&id);
        }
    }

    /// Spawns the periodic idle/eviction sweep task.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.sweep();
            }
        })
    }
}

/// Replaces the oldest prefix of `messages` with a single summary,
/// retaining the most recent `retain_tail` messages verbatim (spec.md §4.7:
/// "the oldest prefix is replaced by a single summary message").
fn compact(messages: &mut Vec<Message>, retain_tail: usize) {
    let retain_tail = retain_tail.max(1).min(messages.len().saturating_sub(1));
    let keep_from = messages.len() - retain_tail;
    let (oldest, recent) = messages.split_at(keep_from);

    let summary_text = build_summary_text(oldest);
    let summary = Message {
        sender: Sender::Summary,
        content: format!("[{} earlier messages] {summary_text}", oldest.len()),
        timestamp: oldest.last().map(|m| m.timestamp).unwrap_or_else(Timestamp::now),
    };

    let mut compacted = Vec::with_capacity(1 + recent.len());
    compacted.push(summary);
    compacted.extend_from_slice(recent);
    *messages = compacted;
}

fn build_summary_text(messages: &[Message]) -> String {
    let topics: Vec<String> = messages
        .iter()
        .flat_map(|m| extract_topics(&m.content))
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    if topics.is_empty() {
        format!("{} messages exchanged.", messages.len())
    } else {
        format!("{} messages exchanged, covering: {}.", messages.len(), topics.join(", "))
    }
}

/// Substring match against the curated topic vocabulary.
#[must_use]
pub fn extract_topics(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    TOPIC_VOCABULARY
        .iter()
        .filter(|topic| lower.contains(*topic))
        .map(|topic| (*topic).to_string())
        .collect()
}

/// Capitalised tokens longer than 3 characters (spec.md §4.7 "Entity
/// extraction"). Intentionally simple.
#[must_use]
pub fn extract_entities(content: &str) -> Vec<String> {
    content
        .split_whitespace()
        .map(|tok| tok.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|tok| {
            tok.chars().count() > 3
                && tok.chars().next().is_some_and(char::is_uppercase)
        })
        .map(ToString::to_string)
        .collect()
}
