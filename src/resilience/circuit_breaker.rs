//! Per-agent circuit breaker (spec.md §4.5 "Circuit breaker")

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::domain_types::AgentId;
use crate::ports::Clock;

/// The three states of a single agent's circuit (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Requests flow normally.
    Closed,
    /// Requests are short-circuited to an alternate agent.
    Open,
    /// One probe request is allowed through to test recovery.
    HalfOpen,
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<std::time::SystemTime>,
    half_open_probe_in_flight: bool,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            opened_at: None,
            half_open_probe_in_flight: false,
        }
    }
}

/// Tunables for the circuit breaker (spec.md §4.5 defaults).
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before a circuit opens.
    pub failure_threshold: u32,
    /// How long a circuit stays `OPEN` before allowing a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Per-agent circuit breaker registry.
pub struct CircuitBreaker {
    entries: DashMap<AgentId, BreakerEntry>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Creates a breaker registry; every agent starts `CLOSED`.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock,
        }
    }

    /// Transitions `OPEN` breakers whose cooldown elapsed into `HALF_OPEN`,
    /// then reports whether `agent_id` is currently open for dispatch
    /// purposes (an in-progress `HALF_OPEN` probe still counts as open to
    /// every caller except the probe itself, enforced by `try_probe`).
    #[must_use]
    pub fn is_open(&self, agent_id: &AgentId) -> bool {
        self.maybe_half_open(agent_id);
        self.entries
            .get(agent_id)
            .map(|e| matches!(e.state, BreakerState::Open))
            .unwrap_or(false)
    }

    fn maybe_half_open(&self, agent_id: &AgentId) {
        if let Some(mut entry) = self.entries.get_mut(agent_id) {
            if entry.state == BreakerState::Open {
                if let Some(opened_at) = entry.opened_at {
                    if self
                        .clock
                        .now()
                        .as_system_time()
                        .duration_since(opened_at)
                        .map(|d| d >= self.config.cooldown)
                        .unwrap_or(false)
                    {
                        entry.state = BreakerState::HalfOpen;
                        entry.half_open_probe_in_flight = false;
                    }
                }
            }
        }
    }

    /// Attempts to claim the single `HALF_OPEN` probe slot for `agent_id`.
    /// Returns `true` if the caller may dispatch the probe.
    pub fn try_claim_probe(&self, agent_id: &AgentId) -> bool {
        self.maybe_half_open(agent_id);
        if let Some(mut entry) = self.entries.get_mut(agent_id) {
            if entry.state == BreakerState::HalfOpen && !entry.half_open_probe_in_flight {
                entry.half_open_probe_in_flight = true;
                return true;
            }
        }
        false
    }

    /// Records a successful task response: resets the failure count and, if
    /// the breaker was `HALF_OPEN`, closes it.
    pub fn record_success(&self, agent_id: AgentId) {
        let mut entry = self.entries.entry(agent_id).or_default();
        entry.failure_count = 0;
        entry.half_open_probe_in_flight = false;
        entry.state = BreakerState::Closed;
        entry.opened_at = None;
    }

    /// Records a failed task response: increments the failure count, opening
    /// the circuit once `failure_threshold` is reached. A failed `HALF_OPEN`
    /// probe reopens immediately regardless of count.
    pub fn record_failure(&self, agent_id: AgentId) {
        let mut entry = self.entries.entry(agent_id).or_default();
        if entry.state == BreakerState::HalfOpen {
            entry.state = BreakerState::Open;
            entry.opened_at = Some(self.clock.now().as_system_time());
            entry.half_open_probe_in_flight = false;
            return;
        }
        entry.failure_count += 1;
        if entry.failure_count >= self.config.failure_threshold {
            entry.state = BreakerState::Open;
            entry.opened_at = Some(self.clock.now().as_system_time());
        }
    }

    /// Returns the current state of `agent_id`'s breaker (`CLOSED` if never
    /// seen a failure).
    #[must_use]
    pub fn state(&self, agent_id: &AgentId) -> BreakerState {
        self.maybe_half_open(agent_id);
        self.entries
            .get(agent_id)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Snapshot of every agent with a non-default breaker state, for
    /// observability endpoints.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<AgentId, BreakerState> {
        self.entries.iter().map(|e| (*e.key(), e.value().state)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::clock::TestClock;

    #[test]
    fn opens_after_failure_threshold() {
        let clock = Arc::new(TestClock::new());
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig { failure_threshold: 3, ..Default::default() },
            clock,
        );
        let agent = AgentId::generate();
        for _ in 0..2 {
            breaker.record_failure(agent);
        }
        assert_eq!(breaker.state(&agent), BreakerState::Closed);
        breaker.record_failure(agent);
        assert_eq!(breaker.state(&agent), BreakerState::Open);
        assert!(breaker.is_open(&agent));
    }

    #[test]
    fn transitions_to_half_open_after_cooldown_and_closes_on_probe_success() {
        let clock = Arc::new(TestClock::new());
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(50),
            },
            Arc::clone(&clock),
        );
        let agent = AgentId::generate();
        breaker.record_failure(agent);
        assert_eq!(breaker.state(&agent), BreakerState::Open);

        clock.advance(Duration::from_millis(100));
        assert_eq!(breaker.state(&agent), BreakerState::HalfOpen);
        assert!(breaker.try_claim_probe(&agent));
        assert!(!breaker.try_claim_probe(&agent));

        breaker.record_success(agent);
        assert_eq!(breaker.state(&agent), BreakerState::Closed);
    }

    #[test]
    fn failed_probe_reopens_circuit() {
        let clock = Arc::new(TestClock::new());
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(10),
            },
            Arc::clone(&clock),
        );
        let agent = AgentId::generate();
        breaker.record_failure(agent);
        clock.advance(Duration::from_millis(20));
        assert!(breaker.try_claim_probe(&agent));
        breaker.record_failure(agent);
        assert_eq!(breaker.state(&agent), BreakerState::Open);
    }
}
