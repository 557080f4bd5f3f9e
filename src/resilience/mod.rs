//! Resilience Layer (spec.md §4.5, component C5)

pub mod circuit_breaker;
pub mod composition;
pub mod reprompt;
pub mod retry;

use thiserror::Error;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use composition::{compose, ComposedResult, TaskOutcome};
pub use reprompt::{emergency_response, repair_output, FailureCategory, RepromptConfig};
pub use retry::{dispatch_with_retry, select_with_alternate, RetryConfig};

/// Errors raised by the Resilience Layer.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// No agent is available for a capability, including after alternate
    /// routing was exhausted.
    #[error("no agent available for capability {0}")]
    NoAgentAvailable(String),

    /// The reprompt loop exhausted `maxRepromptAttempts` without producing
    /// valid output.
    #[error("reprompt loop exhausted for {0}: {1}")]
    RepromptExhausted(String, String),
}
