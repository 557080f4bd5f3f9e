//! Agent Registry domain types (spec.md §4.2)

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain_types::{AgentId, CapabilityName, Timestamp};

/// Lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    /// Accepting and able to process dispatched tasks.
    Active,
    /// Registered but not currently eligible for dispatch.
    Inactive,
    /// Permanently removed; kept only transiently for eviction notices.
    Deregistered,
}

/// Free-form classification of an agent, used by `findByType`.
pub type AgentType = String;

/// Everything the Registry knows about one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    /// The agent's identity.
    pub agent_id: AgentId,
    /// Capabilities this agent declares it can serve.
    pub capabilities: BTreeSet<CapabilityName>,
    /// Free-form agent classification (e.g. `"weather"`, `"booking"`).
    pub agent_type: AgentType,
    /// Current lifecycle status.
    pub status: AgentStatus,
    /// When this agent first registered; used to break selection ties.
    pub registered_at: Timestamp,
    /// Timestamp of the most recent `heartbeat` call.
    pub last_heartbeat: Timestamp,
}

/// Result of matching a plan's required capabilities against the registry.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Capability name to the agent selected to serve it.
    pub matches: BTreeMap<CapabilityName, Registration>,
    /// Capabilities nobody active and eligible could serve.
    pub missing: BTreeSet<CapabilityName>,
}
