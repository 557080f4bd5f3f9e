//! Agent Registry implementation (spec.md §4.2, component C2)
//!
//! Three DashMap indices — by agent ID, by capability, by agent type — kept
//! mutually consistent under every mutation. Grounded on the teacher's
//! `AgentRegistryImpl` (O(1) lookup via `DashMap`, capability index as
//! `DashMap<Capability, HashSet<AgentId>>`), generalised with status,
//! heartbeat staleness, and circuit-breaker-aware selection.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{instrument, warn};

use crate::domain_types::{AgentId, CapabilityName, Timestamp};
use crate::event_bus::{DeliveryGuarantee, Event, EventBusImpl};
use crate::ports::Clock;
use crate::registry::domain_types::{AgentStatus, AgentType, MatchResult, Registration};

/// Errors raised by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No agent is registered under this ID.
    #[error("agent {0} not found")]
    AgentNotFound(AgentId),

    /// `register` was called twice for the same agent ID without a
    /// deregister in between.
    #[error("agent {0} already registered")]
    AlreadyRegistered(AgentId),
}

/// Tunables for the Agent Registry (spec.md §4.2 defaults).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Interval between stale-entry eviction sweeps.
    pub sweep_interval: Duration,
    /// Age of `lastHeartbeat` past which an agent is considered stale.
    pub stale_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            stale_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Capability-indexed directory of live agents.
pub struct AgentRegistryImpl {
    by_id: DashMap<AgentId, Registration>,
    by_capability: DashMap<CapabilityName, BTreeSet<AgentId>>,
    by_type: DashMap<AgentType, BTreeSet<AgentId>>,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBusImpl>,
    sweep_lock: RwLock<()>,
}

impl AgentRegistryImpl {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: RegistryConfig, clock: Arc<dyn Clock>, bus: Arc<EventBusImpl>) -> Arc<Self> {
        Arc::new(Self {
            by_id: DashMap::new(),
            by_capability: DashMap::new(),
            by_type: DashMap::new(),
            config,
            clock,
            bus,
            sweep_lock: RwLock::new(()),
        })
    }

    /// Registers a new agent. Updates all three indices atomically with
    /// respect to readers of any single index (each index converges
    /// independently but `register` never leaves `by_id` pointing at an
    /// agent absent from its declared capability/type indices).
    ///
    /// # Errors
    /// Returns [`RegistryError::AlreadyRegistered`] if `agent_id` is live.
    #[instrument(skip(self, capabilities))]
    pub fn register(
        &self,
        agent_id: AgentId,
        capabilities: BTreeSet<CapabilityName>,
        agent_type: AgentType,
    ) -> Result<(), RegistryError> {
        if self.by_id.contains_key(&agent_id) {
            return Err(RegistryError::AlreadyRegistered(agent_id));
        }
        let now = self.clock.now();
        let registration = Registration {
            agent_id,
            capabilities: capabilities.clone(),
            agent_type: agent_type.clone(),
            status: AgentStatus::Active,
            registered_at: now,
            last_heartbeat: now,
        };
        self.by_id.insert(agent_id, registration);
        for cap in capabilities {
            self.by_capability.entry(cap).or_default().insert(agent_id);
        }
        self.by_type.entry(agent_type).or_default().insert(agent_id);
        Ok(())
    }

    /// Removes an agent from all three indices.
    ///
    /// # Errors
    /// Returns [`RegistryError::AgentNotFound`] if `agent_id` isn't registered.
    pub fn deregister(&self, agent_id: AgentId) -> Result<(), RegistryError> {
        let (_, registration) = self
            .by_id
            .remove(&agent_id)
            .ok_or(RegistryError::AgentNotFound(agent_id))?;
        for cap in &registration.capabilities {
            if let Some(mut set) = self.by_capability.get_mut(cap) {
                set.remove(&agent_id);
                if set.is_empty() {
                    drop(set);
                    self.by_capability.remove(cap);
                }
            }
        }
        if let Some(mut set) = self.by_type.get_mut(&registration.agent_type) {
            set.remove(&agent_id);
            if set.is_empty() {
                drop(set);
                self.by_type.remove(&registration.agent_type);
            }
        }
        Ok(())
    }

    /// Records a liveness signal for `agent_id`.
    ///
    /// # Errors
    /// Returns [`RegistryError::AgentNotFound`] if `agent_id` isn't registered.
    pub fn heartbeat(&self, agent_id: AgentId) -> Result<(), RegistryError> {
        let mut reg = self
            .by_id
            .get_mut(&agent_id)
            .ok_or(RegistryError::AgentNotFound(agent_id))?;
        reg.last_heartbeat = self.clock.now();
        Ok(())
    }

    /// Sets an agent's lifecycle status.
    ///
    /// # Errors
    /// Returns [`RegistryError::AgentNotFound`] if `agent_id` isn't registered.
    pub fn update_status(
        &self,
        agent_id: AgentId,
        status: AgentStatus,
    ) -> Result<(), RegistryError> {
        let mut reg = self
            .by_id
            .get_mut(&agent_id)
            .ok_or(RegistryError::AgentNotFound(agent_id))?;
        reg.status = status;
        Ok(())
    }

    /// Returns every `ACTIVE` registration offering `capability` (spec.md §8:
    /// "capability c lists agent a ⇔ … a.status = ACTIVE" — a non-`ACTIVE`
    /// agent is still present in the index for bookkeeping but never
    /// surfaced by a capability query).
    #[must_use]
    pub fn find_by_capability(&self, capability: &CapabilityName) -> Vec<Registration> {
        self.by_capability
            .get(capability)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_id.get(id).map(|r| r.clone()))
                    .filter(|r| r.status == AgentStatus::Active)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns every `ACTIVE` registration of `agent_type`.
    #[must_use]
    pub fn find_by_type(&self, agent_type: &str) -> Vec<Registration> {
        self.by_type
            .get(agent_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_id.get(id).map(|r| r.clone()))
                    .filter(|r| r.status == AgentStatus::Active)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns every live registration.
    #[must_use]
    pub fn get_all(&self) -> Vec<Registration> {
        self.by_id.iter().map(|e| e.value().clone()).collect()
    }

    /// Matches each of `required_capabilities` to a selected agent.
    ///
    /// `is_breaker_open` is consulted per candidate so selection can skip
    /// agents whose circuit is `OPEN` without the registry depending on the
    /// resilience layer's types.
    #[must_use]
    pub fn match_plan(
        &self,
        required_capabilities: &BTreeSet<CapabilityName>,
        is_breaker_open: impl Fn(&AgentId) -> bool,
    ) -> MatchResult {
        let mut result = MatchResult::default();
        for cap in required_capabilities {
            match self.select_for_capability(cap, &is_breaker_open) {
                Some(registration) => {
                    result.matches.insert(cap.clone(), registration);
                }
                None => {
                    result.missing.insert(cap.clone());
                }
            }
        }
        result
    }

    /// Selects the best agent for a single capability (spec.md §4.2
    /// "Selection"): earliest `registered_at` among `ACTIVE`, non-`OPEN`
    /// candidates, ties broken by lexicographic agent-ID order.
    #[must_use]
    pub fn select_for_capability(
        &self,
        capability: &CapabilityName,
        is_breaker_open: &impl Fn(&AgentId) -> bool,
    ) -> Option<Registration> {
        self.find_by_capability(capability)
            .into_iter()
            .filter(|r| r.status == AgentStatus::Active && !is_breaker_open(&r.agent_id))
            .min_by(|a, b| {
                a.registered_at
                    .cmp(&b.registered_at)
                    .then_with(|| a.agent_id.to_string().cmp(&b.agent_id.to_string()))
            })
    }

    /// Evicts every agent whose last heartbeat is older than `stale_timeout`,
    /// publishing `registry.agent.evicted` for each.
    pub async fn sweep_stale(self: &Arc<Self>) {
        let _guard = self.sweep_lock.write().await;
        let now = self.clock.now();
        let stale_after_ms =
            u64::try_from(self.config.stale_timeout.as_millis()).unwrap_or(u64::MAX);
        let stale: Vec<AgentId> = self
            .by_id
            .iter()
            .filter(|e| e.value().last_heartbeat.elapsed_ms_until(now) >= stale_after_ms)
            .map(|e| *e.key())
            .collect();

        for agent_id in stale {
            if self.deregister(agent_id).is_ok() {
                warn!(%agent_id, "evicting stale agent");
                let event = Event::new(
                    crate::domain_types::Topic::try_new("registry.agent.evicted")
                        .expect("static topic is valid"),
                    serde_json::json!({ "agentId": agent_id.to_string() }),
                    agent_id,
                    None,
                    self.clock.now(),
                    DeliveryGuarantee::BestEffort,
                );
                if let Err(e) = self.bus.publish(event).await {
                    warn!(error = %e, "failed to publish eviction event");
                }
            }
        }
    }

    /// Spawns the periodic stale-eviction sweep task. The returned
    /// `JoinHandle` should be aborted during shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let interval = this.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.sweep_stale().await;
            }
        })
    }
}
