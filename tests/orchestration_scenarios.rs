//! End-to-end orchestration scenarios (spec.md §8 boundary cases)
//!
//! Each test drives [`AgentMeshRuntime::handle_turn`] (or, where a scenario
//! is about internals the orchestrator never exposes, the relevant
//! component directly) the way an embedding binary would.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use agentmesh_core::config::AppConfig;
use agentmesh_core::domain_types::{AgentId, CapabilityName, SessionId, UserId};
use agentmesh_core::event_bus::{DeliveryGuarantee, Event, EventBusImpl, FnHandler, HandlerError};
use agentmesh_core::ports::clock::TestClock;
use agentmesh_core::ports::llm::{LlmError, LlmParams, LlmProvider};
use agentmesh_core::registry::AgentRegistryImpl;
use agentmesh_core::resilience::circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
use agentmesh_core::resilience::retry::select_with_alternate;
use agentmesh_core::runtime::AgentMeshRuntime;

/// Registers an in-process "agent" that answers every `task.request.<cap>`
/// it sees on `capability` with a canned success payload on
/// `task.response.<cap>`, carrying the original correlation ID.
fn register_echo_agent(runtime: &AgentMeshRuntime, capability: &str, payload: serde_json::Value) {
    let agent_id = AgentId::generate();
    runtime
        .registry()
        .register(
            agent_id,
            [CapabilityName::try_new(capability.to_string()).unwrap()].into_iter().collect(),
            "test-agent".to_string(),
        )
        .unwrap();

    let bus = Arc::clone(runtime.bus());
    let response_topic = format!("task.response.{capability}");
    let request_pattern = format!("task.request.{capability}");
    let handler = FnHandler(move |event: Event| {
        let bus = Arc::clone(&bus);
        let response_topic = response_topic.clone();
        let payload = payload.clone();
        async move {
            let Some(correlation_id) = event.correlation_id else {
                return Ok::<(), HandlerError>(());
            };
            let topic = agentmesh_core::domain_types::Topic::try_new(response_topic).unwrap();
            let response = Event::new(
                topic,
                payload,
                event.sender,
                Some(correlation_id),
                event.timestamp,
                DeliveryGuarantee::BestEffort,
            );
            bus.publish(response).await.map_err(|e| Box::new(e) as HandlerError)
        }
    });
    runtime.bus().subscribe(agent_id, &request_pattern, Arc::new(handler)).unwrap();
}

/// An `LLMProvider` double whose planning response is driven entirely by
/// keyword matching against the prompt, so tests don't depend on real
/// model output.
struct ScriptedLlm {
    calls: AtomicU32,
    plans_by_keyword: Vec<(&'static str, &'static str)>,
}

impl ScriptedLlm {
    fn new(plans_by_keyword: Vec<(&'static str, &'static str)>) -> Self {
        Self { calls: AtomicU32::new(0), plans_by_keyword }
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(
        &self,
        prompt: &str,
        _model: &str,
        _params: &LlmParams,
        _timeout: Duration,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = prompt.to_lowercase();
        for (keyword, plan) in &self.plans_by_keyword {
            if lower.contains(keyword) {
                return Ok((*plan).to_string());
            }
        }
        if lower.contains("respond naturally") || lower.contains("synthesis") || lower.contains("synthesising")
        {
            return Ok("Here's what I found.".to_string());
        }
        Ok("[]".to_string())
    }
}

/// An `LLMProvider` double that returns malformed JSON on its first call,
/// then a valid plan on every subsequent call — simulating a model that
/// needs one reprompt to produce structurally valid output.
struct FlakyPlannerLlm {
    calls: AtomicU32,
}

impl FlakyPlannerLlm {
    fn new() -> Self {
        Self { calls: AtomicU32::new(0) }
    }
}

#[async_trait]
impl LlmProvider for FlakyPlannerLlm {
    async fn generate(
        &self,
        prompt: &str,
        _model: &str,
        _params: &LlmParams,
        _timeout: Duration,
    ) -> Result<String, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.to_lowercase().contains("respond naturally")
            || prompt.to_lowercase().contains("synthesising")
        {
            return Ok("Here's the weather.".to_string());
        }
        if n == 0 {
            return Ok("sure, here's a plan: weather please".to_string());
        }
        Ok(r#"[{"capability":"weather.get","params":{"location":"Tokyo"}}]"#.to_string())
    }
}

fn user(name: &str) -> UserId {
    UserId::try_new(name.to_string()).unwrap()
}

/// Scenario: a query whose plan needs two independent capabilities, both
/// served by registered agents, composes into a single non-partial reply.
#[tokio::test]
async fn happy_path_dual_task_plan_composes_into_a_single_reply() {
    let llm = Arc::new(ScriptedLlm::new(vec![(
        "tokyo",
        r#"[{"capability":"weather.get","params":{"location":"Tokyo"}},
            {"capability":"travel.plan","params":{"destination":"Tokyo"}}]"#,
    )]));
    let runtime = AgentMeshRuntime::new(AppConfig::testing("gpt-test"), llm, None, None);
    register_echo_agent(&runtime, "weather.get", serde_json::json!({"tempC": 24}));
    register_echo_agent(&runtime, "travel.plan", serde_json::json!({"itinerary": "3-day trip"}));

    let result = runtime
        .handle_turn(None, user("alice"), "Plan my Tokyo trip".to_string())
        .await;

    assert!(!result.partial, "errors: {:?}", result.errors);
    assert!(result.errors.is_empty());
}

/// Scenario: the planner's first response is malformed; the reprompt loop
/// retries and succeeds on the second attempt without surfacing an error.
#[tokio::test]
async fn malformed_plan_output_is_repaired_by_the_reprompt_loop() {
    let llm = Arc::new(FlakyPlannerLlm::new());
    let runtime = AgentMeshRuntime::new(AppConfig::testing("gpt-test"), llm, None, None);
    register_echo_agent(&runtime, "weather.get", serde_json::json!({"tempC": 18}));

    let result = runtime
        .handle_turn(None, user("bob"), "What's the weather in Tokyo?".to_string())
        .await;

    assert!(!result.partial, "errors: {:?}", result.errors);
}

/// Scenario: a capability with no registered agent fails immediately
/// (no alternate exists to try), while a sibling capability in the same
/// plan succeeds — the turn is marked partial but still returns an answer.
#[tokio::test]
async fn missing_capability_marks_the_turn_partial_without_failing_the_whole_plan() {
    let llm = Arc::new(ScriptedLlm::new(vec![(
        "tokyo",
        r#"[{"capability":"weather.get","params":{"location":"Tokyo"}},
            {"capability":"stock.price","params":{"ticker":"ACME"}}]"#,
    )]));
    let runtime = AgentMeshRuntime::new(AppConfig::testing("gpt-test"), llm, None, None);
    register_echo_agent(&runtime, "weather.get", serde_json::json!({"tempC": 24}));
    // No agent registered for stock.price.

    let result = runtime
        .handle_turn(None, user("carol"), "Weather in Tokyo and ACME stock price".to_string())
        .await;

    assert!(result.partial);
    assert_eq!(result.errors.len(), 1);
}

/// Scenario: an empty plan (no capability matched) falls back to direct
/// LLM synthesis rather than failing the turn.
#[tokio::test]
async fn empty_plan_falls_back_to_direct_synthesis() {
    let llm = Arc::new(ScriptedLlm::new(Vec::new()));
    let runtime = AgentMeshRuntime::new(AppConfig::testing("gpt-test"), llm, None, None);

    let result = runtime
        .handle_turn(None, user("dave"), "Tell me a joke about ducks".to_string())
        .await;

    assert!(!result.partial);
    assert!(result.errors.is_empty());
}

/// Scenario: five consecutive failures against one agent open its circuit;
/// selection then routes to an alternate serving the same capability; after
/// the cooldown elapses the original agent is eligible for a single
/// half-open probe (spec.md §4.5 "Circuit breaker").
#[test]
fn circuit_opens_after_threshold_then_recovers_through_half_open() {
    let clock = Arc::new(TestClock::new());
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig { failure_threshold: 5, cooldown: Duration::from_secs(30) },
        Arc::clone(&clock) as Arc<dyn agentmesh_core::ports::Clock>,
    );
    let event_bus = EventBusImpl::new(Default::default(), Arc::clone(&clock) as Arc<dyn agentmesh_core::ports::Clock>);
    let registry = AgentRegistryImpl::new(Default::default(), Arc::clone(&clock) as Arc<dyn agentmesh_core::ports::Clock>, event_bus);

    let agent_a = AgentId::generate();
    let agent_b = AgentId::generate();
    let cap = CapabilityName::try_new("stock.price".to_string()).unwrap();
    registry.register(agent_a, [cap.clone()].into_iter().collect(), "stock".to_string()).unwrap();
    registry.register(agent_b, [cap.clone()].into_iter().collect(), "stock".to_string()).unwrap();

    for _ in 0..5 {
        breaker.record_failure(agent_a);
    }
    assert_eq!(breaker.state(&agent_a), BreakerState::Open);

    let excluded = Default::default();
    let selected = select_with_alternate(&registry, &breaker, &cap, &excluded)
        .expect("an alternate agent should still be selectable");
    assert_eq!(selected.agent_id, agent_b, "should route around the open circuit to the alternate");

    clock.advance(Duration::from_secs(31));
    assert_eq!(breaker.state(&agent_a), BreakerState::HalfOpen);
    assert!(breaker.try_claim_probe(&agent_a), "half-open agent should accept exactly one probe");
    assert!(!breaker.try_claim_probe(&agent_a), "a second concurrent probe must be refused");
}

/// Scenario: a turn whose dispatched task never responds is cut off by the
/// turn-level timeout; every correlation started during the turn is
/// cancelled rather than left pending forever (spec.md §4.3 "Cancellation
/// cascade").
#[tokio::test]
async fn turn_timeout_cancels_outstanding_correlations() {
    let llm = Arc::new(ScriptedLlm::new(vec![(
        "tokyo",
        r#"[{"capability":"weather.get","params":{"location":"Tokyo"}}]"#,
    )]));
    let mut config = AppConfig::testing("gpt-test");
    config.orchestrator.turn_timeout = Duration::from_millis(150);
    let runtime = AgentMeshRuntime::new(config, llm, None, None);

    // Register the capability but never answer it — the agent is live
    // (so dispatch doesn't fail for lack of a candidate) but silent.
    let agent_id = AgentId::generate();
    runtime
        .registry()
        .register(
            agent_id,
            [CapabilityName::try_new("weather.get".to_string()).unwrap()].into_iter().collect(),
            "silent".to_string(),
        )
        .unwrap();

    let started = std::time::Instant::now();
    let result = runtime
        .handle_turn(None, user("erin"), "What's the weather in Tokyo?".to_string())
        .await;
    let elapsed = started.elapsed();

    assert!(result.partial);
    assert_eq!(result.errors, vec!["turn timed out".to_string()]);
    assert!(elapsed < Duration::from_secs(5), "should cut off at turn_timeout, not the task's own 30s timeout");
}

/// Scenario: an identical opening query issued as the first turn of two
/// distinct sessions fingerprints identically (empty conversation context in
/// both), so the second session's planning and synthesis calls are served
/// from the Response Cache without a second LLM invocation (spec.md §4.6
/// "Key derivation").
#[tokio::test]
async fn repeated_identical_opening_queries_are_served_from_cache() {
    let llm = Arc::new(ScriptedLlm::new(vec![(
        "tokyo",
        r#"[{"capability":"weather.get","params":{"location":"Tokyo"}}]"#,
    )]));
    let runtime = AgentMeshRuntime::new(AppConfig::testing("gpt-test"), Arc::clone(&llm), None, None);
    register_echo_agent(&runtime, "weather.get", serde_json::json!({"tempC": 24}));

    let q = "What's the weather in Tokyo?".to_string();
    let first = runtime
        .handle_turn(Some(SessionId::generate()), user("frank"), q.clone())
        .await;
    let calls_after_first = llm.call_count();
    assert!(calls_after_first > 0);

    let second = runtime
        .handle_turn(Some(SessionId::generate()), user("george"), q)
        .await;

    assert!(!first.partial);
    assert!(!second.partial);
    assert_eq!(
        llm.call_count(),
        calls_after_first,
        "second session's opening turn should be served entirely from cache"
    );
}
