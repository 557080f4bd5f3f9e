//! Runtime lifecycle: wires the seven components into one handle
//! (spec.md §5 "Startup ordering", §5 "Shutdown ordering")
//!
//! Construction order matters: the Event Bus has no dependencies and comes
//! first; the Registry and Correlation Tracker depend on it (or, for the
//! tracker, only on the clock) and come next; the Orchestrator is built last
//! since it borrows `Arc`s of everything else.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::correlation::CorrelationTracker;
use crate::event_bus::EventBusImpl;
use crate::memory::ConversationMemory;
use crate::orchestrator::{KeywordRouter, Orchestrator, OrchestrationResult};
use crate::domain_types::{SessionId, UserId};
use crate::ports::{BlobStore, Clock, InMemoryBlobStore, LlmProvider, SystemClock};
use crate::registry::AgentRegistryImpl;
use crate::resilience::CircuitBreaker;

/// Background sweepers started by [`AgentMeshRuntime::start`], kept so
/// `shutdown` can abort them instead of leaving them running past the
/// event bus they depend on.
struct Sweepers {
    registry: JoinHandle<()>,
    correlation: JoinHandle<()>,
    memory: JoinHandle<()>,
}

/// Owns every component and exposes the single `handle_turn` entry point an
/// embedding binary (CLI, REST handler, test) needs.
pub struct AgentMeshRuntime {
    bus: Arc<EventBusImpl>,
    registry: Arc<AgentRegistryImpl>,
    correlation: Arc<CorrelationTracker>,
    cache: Arc<ResponseCache>,
    memory: Arc<ConversationMemory>,
    breaker: Arc<CircuitBreaker>,
    orchestrator: Arc<Orchestrator>,
    sweepers: std::sync::Mutex<Option<Sweepers>>,
}

impl AgentMeshRuntime {
    /// Builds the full component graph from `config`, a concrete
    /// `LlmProvider`, and optional port overrides. `disk` defaults to an
    /// in-memory blob store and `clock` to the system clock when `None`.
    #[must_use]
    pub fn new(
        config: AppConfig,
        llm: Arc<dyn LlmProvider>,
        disk: Option<Arc<dyn BlobStore>>,
        clock: Option<Arc<dyn Clock>>,
    ) -> Arc<Self> {
        let clock: Arc<dyn Clock> = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let disk: Arc<dyn BlobStore> = disk.unwrap_or_else(|| Arc::new(InMemoryBlobStore::new()));

        let bus = EventBusImpl::new(config.event_bus.clone(), Arc::clone(&clock));
        let registry =
            AgentRegistryImpl::new(config.registry.clone(), Arc::clone(&clock), Arc::clone(&bus));
        let correlation = CorrelationTracker::new(config.correlation.clone(), Arc::clone(&clock));
        let cache = ResponseCache::new(config.cache, Arc::clone(&disk), Arc::clone(&clock));
        let memory = ConversationMemory::new(config.memory, Arc::clone(&clock));
        let breaker = CircuitBreaker::new(config.circuit_breaker, Arc::clone(&clock));
        let breaker = Arc::new(breaker);

        let orchestrator = Orchestrator::new(
            Arc::clone(&bus),
            Arc::clone(&registry),
            Arc::clone(&correlation),
            Arc::clone(&cache),
            Arc::clone(&memory),
            Arc::clone(&breaker),
            llm,
            clock,
            KeywordRouter::default_vocabulary(),
            config.planner,
            config.orchestrator,
        );

        Arc::new(Self {
            bus,
            registry,
            correlation,
            cache,
            memory,
            breaker,
            orchestrator,
            sweepers: std::sync::Mutex::new(None),
        })
    }

    /// Starts the background sweepers: stale-agent eviction, correlation
    /// cleanup, and conversation-memory retention (spec.md §5 "Startup
    /// ordering", step 4). Idempotent: a second call replaces and aborts
    /// the previous sweepers.
    pub fn start(self: &Arc<Self>) {
        info!("starting agent-mesh background sweepers");
        let registry = self.registry.spawn_sweeper();
        let correlation = self.correlation.spawn_cleanup();
        let memory = self.memory.spawn_sweeper(std::time::Duration::from_secs(60 * 60));

        let mut guard = self.sweepers.lock().expect("poisoned lock");
        if let Some(previous) = guard.replace(Sweepers { registry, correlation, memory }) {
            previous.registry.abort();
            previous.correlation.abort();
            previous.memory.abort();
        }
    }

    /// Handles one conversational turn end-to-end.
    pub async fn handle_turn(
        &self,
        session_id: Option<SessionId>,
        user_id: UserId,
        query: String,
    ) -> OrchestrationResult {
        self.orchestrator.handle_turn(session_id, user_id, query).await
    }

    /// Read-only access to the Event Bus, for REST observability endpoints.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBusImpl> {
        &self.bus
    }

    /// Read-only access to the Agent Registry, for REST observability
    /// endpoints and for registering concrete agents before serving traffic.
    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistryImpl> {
        &self.registry
    }

    /// Read-only access to the Response Cache, for REST observability
    /// endpoints.
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Gracefully shuts the runtime down: aborts the background sweepers,
    /// then drains the Event Bus (spec.md §5 "Shutdown ordering" — stop
    /// accepting new turns, let in-flight publishes finish, then stop
    /// accepting publishes entirely).
    pub async fn shutdown(&self) {
        info!("shutting down agent-mesh runtime");
        if let Some(sweepers) = self.sweepers.lock().expect("poisoned lock").take() {
            sweepers.registry.abort();
            sweepers.correlation.abort();
            sweepers.memory.abort();
        }
        self.bus.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::llm::{LlmError, LlmParams};
    use async_trait::async_trait;
    use std::time::Duration;

    struct EchoLlm;

    #[async_trait]
    impl LlmProvider for EchoLlm {
        async fn generate(
            &self,
            _prompt: &str,
            _model: &str,
            _params: &LlmParams,
            _timeout: Duration,
        ) -> Result<String, LlmError> {
            Ok("[]".to_string())
        }
    }

    #[tokio::test]
    async fn handle_turn_round_trips_through_the_full_component_graph() {
        let config = AppConfig::testing("gpt-test");
        let runtime = AgentMeshRuntime::new(config, Arc::new(EchoLlm), None, None);
        runtime.start();

        let result = runtime
            .handle_turn(None, UserId::try_new("u1".to_string()).unwrap(), "tell me a joke".to_string())
            .await;
        assert!(!result.partial);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn start_is_idempotent_and_replaces_previous_sweepers() {
        let config = AppConfig::testing("gpt-test");
        let runtime = AgentMeshRuntime::new(config, Arc::new(EchoLlm), None, None);
        runtime.start();
        runtime.start();
        runtime.shutdown().await;
    }
}
