//! Turn-handling pipeline (spec.md §4.3 steps 1-10)
//!
//! Wires Conversation Memory, the Agent Registry, Response Cache, the
//! planner, the Correlation Tracker and Resilience Layer, and the Event Bus
//! into a single [`Orchestrator::handle_turn`] call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tracing::{instrument, warn};

use crate::cache::{fingerprint, ResponseCache};
use crate::correlation::CorrelationTracker;
use crate::domain_types::{AgentId, CapabilityName, CorrelationId, SessionId, Topic, UserId};
use crate::event_bus::{DeliveryGuarantee, Event, EventBusImpl, FnHandler};
use crate::memory::{Context, ConversationMemory, Sender};
use crate::orchestrator::keyword_router::KeywordRouter;
use crate::orchestrator::planner::{produce_plan, PlannerConfig};
use crate::orchestrator::types::{OrchestrationResult, TaskPlan, TaskSpec};
use crate::ports::llm::{LlmParams, LlmProvider};
use crate::ports::Clock;
use crate::registry::AgentRegistryImpl;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::composition::{compose, TaskOutcome};
use crate::resilience::reprompt::{emergency_response, FailureCategory};
use crate::resilience::retry::{dispatch_with_retry, RetryConfig};

/// Tunables for the orchestrator pipeline (spec.md §4.3, §6 defaults).
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// End-to-end timeout for a single turn, after which all outstanding
    /// correlations are cancelled (spec.md §4.3 "Cancellation cascade").
    pub turn_timeout: Duration,
    /// Per-task dispatch timeout.
    pub task_timeout: Duration,
    /// Model identifier passed to every `LLMProvider` call this turn makes.
    pub model: String,
    /// Synthetic agent identity the orchestrator publishes task events as.
    pub own_agent_id: AgentId,
    /// Per-capability user-facing notices shown when a task fails
    /// (spec.md §4.5 "Partial-result composition").
    pub notice_map: BTreeMap<CapabilityName, String>,
    /// Per-task retry and alternate-routing tunables.
    pub retry: RetryConfig,
}

impl OrchestratorConfig {
    /// A reasonable default configuration; callers should at least override
    /// `model` and `notice_map`.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            turn_timeout: Duration::from_secs(60),
            task_timeout: Duration::from_secs(30),
            model: model.into(),
            own_agent_id: AgentId::generate(),
            notice_map: BTreeMap::new(),
            retry: RetryConfig::default(),
        }
    }
}

/// Ties together the seven components for one conversational turn.
pub struct Orchestrator {
    bus: Arc<EventBusImpl>,
    registry: Arc<AgentRegistryImpl>,
    correlation: Arc<CorrelationTracker>,
    cache: Arc<ResponseCache>,
    memory: Arc<ConversationMemory>,
    breaker: Arc<CircuitBreaker>,
    llm: Arc<dyn LlmProvider>,
    clock: Arc<dyn Clock>,
    router: KeywordRouter,
    planner_config: PlannerConfig,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Builds an orchestrator and subscribes its `task.response.**` relay,
    /// which feeds agent replies back into the Correlation Tracker.
    #[must_use]
    pub fn new(
        bus: Arc<EventBusImpl>,
        registry: Arc<AgentRegistryImpl>,
        correlation: Arc<CorrelationTracker>,
        cache: Arc<ResponseCache>,
        memory: Arc<ConversationMemory>,
        breaker: Arc<CircuitBreaker>,
        llm: Arc<dyn LlmProvider>,
        clock: Arc<dyn Clock>,
        router: KeywordRouter,
        planner_config: PlannerConfig,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            bus: Arc::clone(&bus),
            registry,
            correlation: Arc::clone(&correlation),
            cache,
            memory,
            breaker,
            llm,
            clock,
            router,
            planner_config,
            config,
        });

        let tracker = Arc::clone(&correlation);
        let handler = FnHandler(move |event: Event| {
            let tracker = Arc::clone(&tracker);
            async move {
                if let Some(correlation_id) = event.correlation_id {
                    if let Err(e) = tracker.record_response(correlation_id, event.payload).await {
                        warn!(error = %e, "failed to record task response");
                    }
                }
                Ok(())
            }
        });
        let _ = bus.subscribe(this.config.own_agent_id, "task.response.**", Arc::new(handler));

        this
    }

    /// Handles one conversational turn end-to-end, never returning an error:
    /// unrecoverable failures are absorbed into an emergency-response
    /// `OrchestrationResult` with `partial = true` (spec.md §4.5).
    #[instrument(skip(self, query), fields(%user_id))]
    pub async fn handle_turn(
        self: &Arc<Self>,
        session_id: Option<SessionId>,
        user_id: UserId,
        query: String,
    ) -> OrchestrationResult {
        let session_id = session_id.unwrap_or_else(SessionId::generate);
        let dispatched: Arc<StdMutex<Vec<CorrelationId>>> = Arc::new(StdMutex::new(Vec::new()));

        let this = Arc::clone(self);
        let dispatched_for_run = Arc::clone(&dispatched);
        let turn = this.run_turn(session_id, user_id, query, dispatched_for_run);

        match tokio::time::timeout(self.config.turn_timeout, turn).await {
            Ok(result) => result,
            Err(_) => {
                let ids: Vec<CorrelationId> = dispatched.lock().expect("mutex poisoned").clone();
                for id in ids {
                    let _ = self.correlation.cancel(id).await;
                }
                warn!(%session_id, "turn exceeded timeout, cancelled outstanding correlations");
                OrchestrationResult {
                    session_id,
                    answer: emergency_response(FailureCategory::OrchestrationFailure).to_string(),
                    partial: true,
                    errors: vec!["turn timed out".to_string()],
                }
            }
        }
    }

    async fn run_turn(
        self: Arc<Self>,
        session_id: SessionId,
        user_id: UserId,
        query: String,
        dispatched: Arc<StdMutex<Vec<CorrelationId>>>,
    ) -> OrchestrationResult {
        self.memory
            .append_message(session_id, user_id.clone(), Sender::User, query.clone());
        let context = self.memory.context_for(session_id).unwrap_or(Context {
            messages: Vec::new(),
            topics: Vec::new(),
            entities: Vec::new(),
            agent_interaction_counts: BTreeMap::new(),
        });

        let capabilities: BTreeSet<CapabilityName> = self
            .registry
            .get_all()
            .into_iter()
            .flat_map(|r| r.capabilities.into_iter())
            .collect();
        let capabilities: Vec<CapabilityName> = capabilities.into_iter().collect();

        let outcome = produce_plan(
            &self.cache,
            self.llm.as_ref(),
            &self.config.model,
            &self.registry,
            &self.router,
            self.planner_config,
            &query,
            &context,
            &capabilities,
        )
        .await;

        let plan = self.reconcile_with_keyword_router(outcome, &query);

        let answer = if plan.tasks.is_empty() {
            self.synthesise_direct(&query, &context).await
        } else {
            let outcomes = self.dispatch_plan(&plan, &dispatched).await;
            let composed = compose(outcomes, &self.config.notice_map);
            let answer = self.synthesise_answer(&query, &context, &composed).await;
            self.memory
                .append_message(session_id, user_id, Sender::Assistant, answer.clone());
            return OrchestrationResult {
                session_id,
                answer,
                partial: composed.partial,
                errors: composed.failure_notices.into_values().collect(),
            };
        };

        self.memory
            .append_message(session_id, user_id, Sender::Assistant, answer.clone());
        OrchestrationResult {
            session_id,
            answer,
            partial: false,
            errors: Vec::new(),
        }
    }

    /// Reconciles the LLM planner's opinion with the keyword router when the
    /// reported confidence falls below threshold (spec.md §4.3 "Intent
    /// confidence"): on disagreement, the keyword router's plan wins.
    fn reconcile_with_keyword_router(
        &self,
        outcome: crate::orchestrator::planner::PlanOutcome,
        query: &str,
    ) -> TaskPlan {
        let Some(confidence) = outcome.confidence else {
            return outcome.plan;
        };
        if confidence >= self.planner_config.confidence_threshold {
            return outcome.plan;
        }
        let keyword_plan = self.router.route(query);
        let llm_caps: BTreeSet<String> =
            outcome.plan.tasks.iter().map(|t| t.capability.to_string()).collect();
        let keyword_caps: BTreeSet<String> =
            keyword_plan.tasks.iter().map(|t| t.capability.to_string()).collect();
        if !keyword_caps.is_empty() && keyword_caps != llm_caps {
            warn!(confidence, "low-confidence plan disagrees with keyword router, using router");
            keyword_plan
        } else {
            outcome.plan
        }
    }

    /// Dispatches every task in `plan`, honouring the dependency graph: a
    /// task starts as soon as its declared dependencies have all completed
    /// *successfully* (spec.md §4.3 step 7). A task whose dependency failed
    /// is never dispatched; it's marked failed itself so the plan can still
    /// terminate, and the failure cascades to its own dependents in turn.
    async fn dispatch_plan(
        &self,
        plan: &TaskPlan,
        dispatched: &Arc<StdMutex<Vec<CorrelationId>>>,
    ) -> Vec<TaskOutcome> {
        let mut resolved: BTreeSet<String> = BTreeSet::new();
        let mut succeeded: BTreeSet<String> = BTreeSet::new();
        let mut started: BTreeSet<String> = BTreeSet::new();
        let mut outcomes = Vec::with_capacity(plan.tasks.len());
        let mut join_set = tokio::task::JoinSet::new();

        loop {
            for task in plan.ready_tasks(&succeeded) {
                if started.contains(&task.task_id) {
                    continue;
                }
                started.insert(task.task_id.clone());
                let task = task.clone();
                let dispatched = Arc::clone(dispatched);
                let registry = Arc::clone(&self.registry);
                let breaker = Arc::clone(&self.breaker);
                let bus = Arc::clone(&self.bus);
                let correlation = Arc::clone(&self.correlation);
                let clock = Arc::clone(&self.clock);
                let retry = self.config.retry;
                let own_agent_id = self.config.own_agent_id;
                join_set.spawn(async move {
                    let outcome = dispatch_task(
                        &task,
                        &registry,
                        &breaker,
                        &bus,
                        &correlation,
                        clock.as_ref(),
                        retry,
                        own_agent_id,
                        &dispatched,
                    )
                    .await;
                    (task.task_id, outcome)
                });
            }

            // Cascade failure to tasks that can never become ready because
            // one of their dependencies resolved without succeeding, until
            // no more such tasks remain.
            loop {
                let blocked: Vec<TaskSpec> = plan
                    .tasks
                    .iter()
                    .filter(|t| {
                        !started.contains(&t.task_id)
                            && !resolved.contains(&t.task_id)
                            && t.dependencies.iter().all(|d| resolved.contains(d))
                            && t.dependencies.iter().any(|d| !succeeded.contains(d))
                    })
                    .cloned()
                    .collect();
                if blocked.is_empty() {
                    break;
                }
                for task in blocked {
                    resolved.insert(task.task_id.clone());
                    outcomes.push(TaskOutcome {
                        capability: task.capability.clone(),
                        result: Err(format!(
                            "task {} skipped: a dependency failed",
                            task.task_id
                        )),
                        optional: task.optional,
                    });
                }
            }

            if resolved.len() == plan.tasks.len() {
                break;
            }

            let Some(joined) = join_set.join_next().await else {
                // Every ready task has been started but none has finished,
                // and there's nothing left in the queue: the DAG validated
                // acyclic at parse time, so this shouldn't happen.
                break;
            };
            match joined {
                Ok((task_id, outcome)) => {
                    resolved.insert(task_id.clone());
                    if outcome.result.is_ok() {
                        succeeded.insert(task_id);
                    }
                    outcomes.push(outcome);
                }
                Err(e) => warn!(error = %e, "dispatch task panicked"),
            }
        }

        outcomes
    }

    async fn synthesise_direct(&self, query: &str, context: &Context) -> String {
        let prompt = direct_reply_prompt(query, context);
        match self
            .llm
            .generate(&prompt, &self.config.model, &LlmParams::new(), self.config.task_timeout)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "direct synthesis call failed");
                emergency_response(FailureCategory::LlmFailure).to_string()
            }
        }
    }

    async fn synthesise_answer(
        &self,
        query: &str,
        context: &Context,
        composed: &crate::resilience::composition::ComposedResult,
    ) -> String {
        let prompt = synthesis_prompt(query, context, composed);
        let params = LlmParams::new();
        let fp = fingerprint::fingerprint(&prompt, &self.config.model, &params);

        if let Ok(Some(cached)) = self.cache.get(&fp).await {
            return cached;
        }

        match self
            .llm
            .generate(&prompt, &self.config.model, &params, self.config.task_timeout)
            .await
        {
            Ok(text) => {
                self.cache.put(fp, text.clone()).await;
                text
            }
            Err(e) => {
                warn!(error = %e, "answer synthesis call failed");
                emergency_response(FailureCategory::AgentFailure).to_string()
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_task(
    task: &TaskSpec,
    registry: &AgentRegistryImpl,
    breaker: &CircuitBreaker,
    bus: &Arc<EventBusImpl>,
    correlation: &Arc<CorrelationTracker>,
    clock: &dyn Clock,
    retry: RetryConfig,
    own_agent_id: AgentId,
    dispatched: &Arc<StdMutex<Vec<CorrelationId>>>,
) -> TaskOutcome {
    let result = dispatch_with_retry(
        registry,
        breaker,
        retry,
        &task.capability,
        |agent_id| async move {
            let correlation_id = CorrelationId::generate();
            correlation.create(correlation_id, task.capability.to_string(), task.timeout);
            dispatched.lock().expect("mutex poisoned").push(correlation_id);

            let topic = Topic::try_new(format!("task.request.{}", task.capability))
                .expect("capability name yields a valid topic segment");
            let event = Event::new(
                topic,
                task.params.clone(),
                own_agent_id,
                Some(correlation_id),
                clock.now(),
                DeliveryGuarantee::BestEffort,
            );

            match bus.publish(event).await {
                Err(e) => Err(e.to_string()),
                Ok(()) => match correlation.await_response(correlation_id).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(e) => Err(e.to_string()),
                },
            }
        },
        || format!("no agent available for capability {}", task.capability),
    )
    .await;

    TaskOutcome { capability: task.capability.clone(), result, optional: task.optional }
}

fn render_messages(context: &Context) -> String {
    context
        .messages
        .iter()
        .map(|m| format!("{}: {}", m.sender.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn direct_reply_prompt(query: &str, context: &Context) -> String {
    format!(
        "Recent conversation:\n{}\nUser query: {}\n\
         Respond naturally and helpfully. No agent capability matched this \
         request, so answer directly from your own knowledge.",
        render_messages(context),
        query
    )
}

fn synthesis_prompt(
    query: &str,
    context: &Context,
    composed: &crate::resilience::composition::ComposedResult,
) -> String {
    let successes = serde_json::to_string(&composed.successes).unwrap_or_default();
    let notices = composed
        .failure_notices
        .values()
        .cloned()
        .collect::<Vec<_>>()
        .join("; ");
    format!(
        "Recent conversation:\n{}\nUser query: {}\n\
         Task results: {successes}\n\
         Failure notices (mention these plainly, don't invent results for them): {notices}\n\
         Write a single natural-language reply to the user synthesising the task results.",
        render_messages(context),
        query
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::correlation::CorrelationConfig;
    use crate::event_bus::EventBusConfig;
    use crate::ports::blob::InMemoryBlobStore;
    use crate::ports::clock::TestClock;
    use crate::registry::RegistryConfig;
    use crate::resilience::circuit_breaker::CircuitBreakerConfig;
    use async_trait::async_trait;
    use std::collections::BTreeSet as StdBTreeSet;

    /// A minimal fake that plans a single `weather.get` task whenever the
    /// prompt mentions weather, and an empty plan (or direct echo) otherwise.
    struct FakeLlm;

    #[async_trait]
    impl LlmProvider for FakeLlm {
        async fn generate(
            &self,
            prompt: &str,
            _model: &str,
            _params: &LlmParams,
            _timeout: Duration,
        ) -> Result<String, crate::ports::llm::LlmError> {
            if prompt.to_lowercase().contains("weather") {
                Ok(r#"[{"capability":"weather.get","params":{"location":"Tokyo"}}]"#.to_string())
            } else {
                Ok("[]".to_string())
            }
        }
    }

    fn harness() -> Arc<Orchestrator> {
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        let bus = EventBusImpl::new(EventBusConfig::default(), Arc::clone(&clock));
        let registry = AgentRegistryImpl::new(RegistryConfig::default(), Arc::clone(&clock), Arc::clone(&bus));
        let correlation = CorrelationTracker::new(CorrelationConfig::default(), Arc::clone(&clock));
        let disk = Arc::new(InMemoryBlobStore::new());
        let cache = ResponseCache::new(CacheConfig::default(), disk, Arc::clone(&clock));
        let memory = ConversationMemory::new(Default::default(), Arc::clone(&clock));
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default(), Arc::clone(&clock)));
        let llm: Arc<dyn LlmProvider> = Arc::new(FakeLlm);
        let router = KeywordRouter::default_vocabulary();

        Orchestrator::new(
            bus,
            registry,
            correlation,
            cache,
            memory,
            breaker,
            llm,
            clock,
            router,
            PlannerConfig::default(),
            OrchestratorConfig::new("test-model"),
        )
    }

    #[tokio::test]
    async fn empty_plan_falls_back_to_direct_synthesis() {
        let orchestrator = harness();
        let user = UserId::try_new("u1".to_string()).unwrap();
        let result = orchestrator
            .handle_turn(None, user, "tell me a joke about ducks".to_string())
            .await;
        assert!(!result.partial);
        assert_eq!(result.answer, "[]");
    }

    #[tokio::test]
    async fn no_agent_available_marks_plan_partial() {
        let orchestrator = harness();
        let user = UserId::try_new("u2".to_string()).unwrap();
        let result = orchestrator
            .handle_turn(None, user, "what's the weather in Tokyo?".to_string())
            .await;
        assert!(result.partial);
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn reconcile_uses_keyword_router_on_low_confidence_disagreement() {
        let orchestrator_arc = harness();
        let outcome = crate::orchestrator::planner::PlanOutcome {
            plan: TaskPlan {
                tasks: vec![TaskSpec {
                    task_id: "t0".into(),
                    capability: CapabilityName::try_new("booking.reserve".to_string()).unwrap(),
                    params: serde_json::Value::Null,
                    dependencies: StdBTreeSet::new(),
                    priority: 0,
                    timeout: Duration::from_secs(30),
                    optional: false,
                }],
            },
            from_cache: false,
            confidence: Some(0.1),
        };
        let plan = orchestrator_arc.reconcile_with_keyword_router(outcome, "what's the weather in Tokyo?");
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].capability.to_string(), "weather.get");
    }
}
