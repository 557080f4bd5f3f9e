//! Correlation Tracker domain types (spec.md §4.4)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain_types::{CorrelationId, Timestamp};

/// Lifecycle state of a tracked correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationState {
    /// Awaiting a response or timeout.
    Pending,
    /// A response was recorded and the promise was completed with it.
    Completed,
    /// No response arrived before the deadline.
    TimedOut,
    /// `cancel` was called before completion.
    Cancelled,
}

/// A single recorded response for a correlation (fan-in capable: multiple
/// responses may be recorded against one ID).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedResponse {
    /// The response payload as returned by the responding agent.
    pub payload: Value,
    /// When this response was recorded.
    pub recorded_at: Timestamp,
}

/// Bookkeeping the tracker keeps for one in-flight (or recently resolved)
/// correlation.
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    /// This correlation's ID.
    pub id: CorrelationId,
    /// Caller-supplied label for observability (e.g. `"weather.get"`).
    pub request_type: String,
    /// Current lifecycle state.
    pub state: CorrelationState,
    /// Every response recorded so far, in arrival order.
    pub responses: Vec<RecordedResponse>,
    /// Child correlations chained from this one via `addChild`.
    pub children: Vec<CorrelationId>,
    /// When `create` was called.
    pub created_at: Timestamp,
    /// Deadline after which the tracker transitions this context to `TimedOut`.
    pub timeout_at: Timestamp,
}
