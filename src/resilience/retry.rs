//! Per-task retry and alternate routing (spec.md §4.5)
//!
//! A task may retry on its originally-selected agent up to `maxAgentRetries`
//! times before the resilience layer asks the registry for a different
//! agent providing the same capability.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{instrument, warn};

use crate::domain_types::{AgentId, CapabilityName};
use crate::registry::{AgentRegistryImpl, Registration};
use crate::resilience::circuit_breaker::{BreakerState, CircuitBreaker};

/// Tunables for per-task retry and alternate routing.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Retries allowed on the same agent before trying an alternate.
    pub max_agent_retries: u32,
    /// Delay between same-agent retries.
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_agent_retries: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Selects an agent to dispatch a capability to, honouring the circuit
/// breaker: returns the primary candidate unless its circuit is `OPEN`, in
/// which case the registry is re-queried excluding it (spec.md §4.5
/// "Alternate routing"). A `HALF_OPEN` candidate is only ever returned once
/// its single probe slot has been claimed (spec.md §4.5 "exactly one probe
/// per cooldown window"); if the claim is lost to a concurrent caller, that
/// agent is excluded and selection retries against the remaining pool.
#[must_use]
pub fn select_with_alternate(
    registry: &AgentRegistryImpl,
    breaker: &CircuitBreaker,
    capability: &CapabilityName,
    exclude: &BTreeSet<AgentId>,
) -> Option<Registration> {
    let mut excluded = exclude.clone();
    loop {
        let candidate = registry
            .find_by_capability(capability)
            .into_iter()
            .filter(|r| {
                r.status == crate::registry::AgentStatus::Active
                    && !excluded.contains(&r.agent_id)
                    && !breaker.is_open(&r.agent_id)
            })
            .min_by(|a, b| {
                a.registered_at
                    .cmp(&b.registered_at)
                    .then_with(|| a.agent_id.to_string().cmp(&b.agent_id.to_string()))
            })?;

        if breaker.state(&candidate.agent_id) == BreakerState::HalfOpen
            && !breaker.try_claim_probe(&candidate.agent_id)
        {
            excluded.insert(candidate.agent_id);
            continue;
        }

        return Some(candidate);
    }
}

/// Runs `attempt` against agents selected for `capability`, retrying on the
/// same agent up to `config.max_agent_retries` times before asking the
/// registry for an alternate. Returns the first success, or the last
/// failure if every avenue is exhausted.
///
/// # Errors
/// Returns `E` from the last failed attempt, or a capability-missing error
/// via `no_agent` if the registry has no eligible candidate at all.
#[instrument(skip(registry, breaker, attempt, no_agent))]
pub async fn dispatch_with_retry<F, Fut, E>(
    registry: &AgentRegistryImpl,
    breaker: &CircuitBreaker,
    config: RetryConfig,
    capability: &CapabilityName,
    mut attempt: F,
    no_agent: impl FnOnce() -> E,
) -> Result<serde_json::Value, E>
where
    F: FnMut(AgentId) -> Fut,
    Fut: std::future::Future<Output = Result<serde_json::Value, E>>,
{
    let mut excluded = BTreeSet::new();
    let mut last_err: Option<E> = None;

    loop {
        let Some(registration) = select_with_alternate(registry, breaker, capability, &excluded)
        else {
            return Err(last_err.unwrap_or_else(no_agent));
        };
        let agent_id = registration.agent_id;

        for retry_num in 0..=config.max_agent_retries {
            match attempt(agent_id).await {
                Ok(value) => {
                    breaker.record_success(agent_id);
                    return Ok(value);
                }
                Err(e) => {
                    breaker.record_failure(agent_id);
                    warn!(%agent_id, retry_num, "task attempt failed");
                    last_err = Some(e);
                    if retry_num < config.max_agent_retries {
                        sleep(config.retry_delay).await;
                    }
                }
            }
        }
        excluded.insert(agent_id);
    }
}
