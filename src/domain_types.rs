//! Shared domain types for the agent-mesh runtime
//!
//! Strongly-typed newtypes over primitives, built with `nutype`, so that
//! agent identifiers, topics, and timing parameters can't be confused with
//! bare `String`/`u64` values at the call site.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Globally-unique, opaque identifier for an agent.
///
/// Equality is by value; an agent's identity is stable across its lifetime
/// (spec.md §3, `AgentID`).
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct AgentId(Uuid);

impl AgentId {
    /// Creates a new random agent ID.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Correlation ID binding a request event to its response events.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a new random correlation ID.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for an event published on the bus.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Conversation session identifier (spec.md §3, `ConversationSession`).
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Opaque identifier for an end user.
#[nutype(
    validate(len_char_min = 1, len_char_max = 256),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct UserId(String);

/// A capability name such as `weather.get` (GLOSSARY).
#[nutype(
    validate(len_char_min = 1, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct CapabilityName(String);

/// A dotted event topic path, e.g. `task.response.weather.get`.
///
/// Validity is syntactic only (non-empty, no empty segments); wildcard
/// semantics are handled by [`crate::event_bus::trie`].
#[nutype(
    validate(predicate = |topic| {
        !topic.is_empty() && topic.split('.').all(|segment| !segment.is_empty())
    }),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct Topic(String);

impl Topic {
    /// Splits the topic into its dotted segments.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        self.as_ref().split('.').collect()
    }
}

/// Wall-clock timestamp, injectable via the [`crate::ports::Clock`] port.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize
))]
pub struct Timestamp(SystemTime);

impl Timestamp {
    /// Creates a timestamp for the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::new(SystemTime::now())
    }

    /// Returns the inner `SystemTime`.
    #[must_use]
    pub fn as_system_time(&self) -> SystemTime {
        self.into_inner()
    }

    /// Milliseconds elapsed between `self` and a later timestamp.
    ///
    /// Returns `0` if `other` is not after `self` (clock skew tolerance).
    #[must_use]
    pub fn elapsed_ms_until(&self, other: Timestamp) -> u64 {
        other
            .as_system_time()
            .duration_since(self.as_system_time())
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// A generic monotonic count, used for statistics (message counts, hits…).
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Default
))]
pub struct Count(u64);

impl Count {
    /// Returns a zero count.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Returns a new count incremented by one.
    #[must_use]
    pub fn increment(&self) -> Self {
        Self::new(self.into_inner().saturating_add(1))
    }

    /// Returns the value as `u64`.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_rejects_empty_segments() {
        assert!(Topic::try_new("a..b").is_err());
        assert!(Topic::try_new("").is_err());
        assert!(Topic::try_new("a.b.c").is_ok());
    }

    #[test]
    fn topic_segments_split_on_dot() {
        let topic = Topic::try_new("task.request.weather.get").unwrap();
        assert_eq!(topic.segments(), vec!["task", "request", "weather", "get"]);
    }

    #[test]
    fn count_increment_is_monotonic() {
        let c = Count::zero();
        let c1 = c.increment();
        assert_eq!(c1.as_u64(), 1);
        assert_eq!(c1.increment().as_u64(), 2);
    }
}
