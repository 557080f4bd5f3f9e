//! Top-level error taxonomy (spec.md §7)
//!
//! Each component defines its own `thiserror` enum (`event_bus::BusError`,
//! `registry::RegistryError`, `correlation::CorrelationError`,
//! `resilience::ResilienceError`, `cache::CacheError`, `memory::MemoryError`,
//! `orchestrator::OrchestratorError`, `ports::llm::LlmError`). [`CaxtonError`]
//! aggregates them at the process boundary (CLI, REST handlers, `main.rs`)
//! via `#[from]` so call sites deeper in the stack keep precise, narrow
//! error types and only the edge deals with the union.

use thiserror::Error;

use crate::cache::CacheError;
use crate::correlation::CorrelationError;
use crate::event_bus::BusError;
use crate::memory::MemoryError;
use crate::orchestrator::OrchestratorError;
use crate::ports::llm::LlmError;
use crate::registry::RegistryError;
use crate::resilience::ResilienceError;

/// Aggregated error type for the agent-mesh runtime.
///
/// Distinguishes, per spec.md §7, between errors that are local and
/// recoverable (handled inside the Resilience Layer before reaching a
/// caller), those that are terminal for a single orchestration turn, and
/// system-level errors that require the process to shut down.
#[derive(Debug, Error)]
pub enum CaxtonError {
    /// Event Bus is unavailable or rejected a publish (e.g. after `stop()`).
    #[error("transport error: {0}")]
    Transport(#[from] BusError),

    /// A correlation, LLM call, or orchestration turn exceeded its timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The registry has no agent for a requested capability.
    #[error("capability missing: {0}")]
    CapabilityMissing(String),

    /// A non-timeout task failure reported by an agent; feeds the breaker.
    #[error("agent failure: {0}")]
    AgentFailure(String),

    /// The circuit for an agent is open; caller should route to an alternate.
    #[error("circuit open for agent {0}")]
    CircuitOpen(String),

    /// Caller-supplied input failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Non-recoverable configuration problem; the process should not start.
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),

    /// Error surfaced by the registry.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Error surfaced by the correlation tracker.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// Error surfaced by the resilience layer.
    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    /// Error surfaced by the response cache.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Error surfaced by conversation memory.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Error surfaced by the orchestrator pipeline.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Error surfaced by the `LLMProvider` port.
    #[error(transparent)]
    Llm(#[from] LlmError),
}
