//! Event Bus domain types (spec.md §3, §4.1)

use nutype::nutype;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain_types::{AgentId, CorrelationId, EventId, Timestamp, Topic};

/// Delivery guarantee requested for a published event (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryGuarantee {
    /// Fire-and-forget; may drop on handler overload.
    BestEffort,
    /// Retried on handler failure with exponential backoff; duplicates possible.
    AtLeastOnce,
    /// Preserves publisher-chosen order per `(sender, topic)`.
    Ordered,
}

/// An immutable record published on the Event Bus.
///
/// Once constructed, contents are frozen: every field is only ever read
/// after publication, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,
    /// Dotted topic path the event was published on.
    pub topic: Topic,
    /// Event payload, opaque to the bus.
    pub payload: Value,
    /// Agent that published the event.
    pub sender: AgentId,
    /// Correlation ID binding this event to a request/response exchange.
    pub correlation_id: Option<CorrelationId>,
    /// Wall-clock time the event was published.
    pub timestamp: Timestamp,
    /// Delivery guarantee requested for this event.
    pub delivery: DeliveryGuarantee,
}

impl Event {
    /// Builds a new event with a fresh ID and the current timestamp.
    #[must_use]
    pub fn new(
        topic: Topic,
        payload: Value,
        sender: AgentId,
        correlation_id: Option<CorrelationId>,
        now: Timestamp,
        delivery: DeliveryGuarantee,
    ) -> Self {
        Self {
            id: EventId::generate(),
            topic,
            payload,
            sender,
            correlation_id,
            timestamp: now,
            delivery,
        }
    }

    /// Builds the dead-letter topic for this event's original topic.
    #[must_use]
    pub fn dead_letter_topic(&self) -> Topic {
        Topic::try_new(format!("dlq.{}", self.topic))
            .expect("dlq.<topic> is always a valid topic when topic is valid")
    }
}

/// Opaque handle returned by `subscribe`, used to `unsubscribe` later.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display))]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    /// Creates a new random subscription handle.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Metadata about a live subscription, owned by the Event Bus.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    /// Agent that owns this subscription.
    pub subscriber_agent_id: AgentId,
    /// Topic pattern this subscription matches (may contain `*`/`**`).
    pub pattern: String,
    /// When the subscription was created.
    pub created_at: Timestamp,
}
