//! Top-level configuration (spec.md §6 "Configuration defaults")
//!
//! Each component owns its own tunables struct; this module composes them
//! into one [`AppConfig`] plus a handful of profile constructors, the way a
//! deployment would load one config file and hand each component its
//! section. There is no file-format parsing here — the embedding binary is
//! expected to deserialize `AppConfig` itself (e.g. from TOML via `serde`)
//! or construct a profile and override fields.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::correlation::CorrelationConfig;
use crate::domain_types::{AgentId, CapabilityName};
use crate::event_bus::EventBusConfig;
use crate::memory::MemoryConfig;
use crate::orchestrator::{OrchestratorConfig, PlannerConfig};
use crate::registry::RegistryConfig;
use crate::resilience::{CircuitBreakerConfig, RepromptConfig, RetryConfig};

/// Address the bundled REST observability server binds to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind the HTTP listener to.
    pub host: String,
    /// Port to bind the HTTP listener to.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8080 }
    }
}

/// Aggregate configuration for every component in the runtime.
///
/// Component configs (`event_bus`, `registry`, …) aren't `Serialize` end to
/// end where they embed a `Duration` without a human-friendly encoding;
/// callers constructing `AppConfig` from a file are expected to deserialize
/// into a mirrored shape and convert, the way the component configs
/// themselves do for their own `nutype` fields.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Model identifier used for planning and synthesis calls.
    pub model: String,
    /// Identity the orchestrator publishes task-request events under.
    pub own_agent_id: AgentId,
    /// HTTP observability server bind address.
    pub server: ServerConfig,
    /// Event Bus tunables.
    pub event_bus: EventBusConfig,
    /// Agent Registry tunables.
    pub registry: RegistryConfig,
    /// Correlation Tracker tunables.
    pub correlation: CorrelationConfig,
    /// Circuit breaker tunables.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-task retry and alternate-routing tunables.
    pub retry: RetryConfig,
    /// Reprompt-loop tunables.
    pub reprompt: RepromptConfig,
    /// Response Cache tunables.
    pub cache: CacheConfig,
    /// Conversation Memory tunables.
    pub memory: MemoryConfig,
    /// Plan-production tunables.
    pub planner: PlannerConfig,
    /// Per-turn orchestrator tunables.
    pub orchestrator: OrchestratorConfig,
    /// Interval the registry's stale-entry sweeper runs at.
    pub registry_sweep_interval: Duration,
    /// Interval the correlation tracker's cleanup sweeper runs at.
    pub correlation_cleanup_interval: Duration,
    /// Interval the conversation-memory sweeper runs at.
    pub memory_sweep_interval: Duration,
}

impl AppConfig {
    /// A development profile: short sweep intervals, generous timeouts, and
    /// an empty notice map so failures surface with their bare capability
    /// name — convenient while iterating locally.
    #[must_use]
    pub fn development(model: impl Into<String>) -> Self {
        Self::with_model(model)
    }

    /// A production profile. Identical defaults to `development` today;
    /// kept as a distinct constructor so an embedding binary has a single
    /// place to diverge (longer sweep intervals, a curated notice map,
    /// stricter timeouts) without touching call sites.
    #[must_use]
    pub fn production(model: impl Into<String>) -> Self {
        Self::with_model(model)
    }

    /// A testing profile: aggressive sweep intervals and short timeouts so
    /// integration tests don't stall waiting on production-sized windows.
    #[must_use]
    pub fn testing(model: impl Into<String>) -> Self {
        let mut config = Self::with_model(model);
        config.orchestrator.turn_timeout = Duration::from_secs(5);
        config.orchestrator.task_timeout = Duration::from_secs(2);
        config.planner.planning_timeout = Duration::from_secs(2);
        config.registry.sweep_interval = Duration::from_millis(100);
        config.registry.stale_timeout = Duration::from_secs(1);
        config.correlation.cleanup_interval = Duration::from_millis(100);
        config.correlation.grace_window = Duration::from_millis(50);
        config.registry_sweep_interval = Duration::from_millis(100);
        config.correlation_cleanup_interval = Duration::from_millis(100);
        config.memory_sweep_interval = Duration::from_millis(100);
        config
    }

    fn with_model(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            own_agent_id: AgentId::generate(),
            server: ServerConfig::default(),
            event_bus: EventBusConfig::default(),
            registry: RegistryConfig::default(),
            correlation: CorrelationConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            reprompt: RepromptConfig::default(),
            cache: CacheConfig::default(),
            memory: MemoryConfig::default(),
            planner: PlannerConfig::default(),
            orchestrator: OrchestratorConfig::new(model.clone()),
            model,
            registry_sweep_interval: Duration::from_secs(30),
            correlation_cleanup_interval: Duration::from_secs(5 * 60),
            memory_sweep_interval: Duration::from_secs(60 * 60),
        }
    }

    /// Per-capability user-facing failure notices (spec.md §4.5
    /// "Partial-result composition"). Empty by default; callers curate
    /// their own mesh-specific wording and assign it to
    /// `orchestrator.notice_map`.
    #[must_use]
    pub fn with_notice_map(mut self, notices: BTreeMap<CapabilityName, String>) -> Self {
        self.orchestrator.notice_map = notices;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testing_profile_shortens_timeouts_below_development() {
        let dev = AppConfig::development("gpt-test");
        let testing = AppConfig::testing("gpt-test");
        assert!(testing.orchestrator.turn_timeout < dev.orchestrator.turn_timeout);
        assert!(testing.registry.sweep_interval < dev.registry.sweep_interval);
    }

    #[test]
    fn production_and_development_share_defaults_today() {
        let dev = AppConfig::development("gpt-test");
        let prod = AppConfig::production("gpt-test");
        assert_eq!(dev.cache.memory_capacity, prod.cache.memory_capacity);
    }
}
