//! Plan production: prompt construction, cache-or-LLM, parse, repair,
//! validate (spec.md §4.3 steps 3-6).

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use crate::cache::{fingerprint, ResponseCache};
use crate::domain_types::CapabilityName;
use crate::memory::Context;
use crate::orchestrator::keyword_router::KeywordRouter;
use crate::orchestrator::types::{PlanError, TaskPlan};
use crate::ports::llm::{LlmParams, LlmProvider};
use crate::registry::AgentRegistryImpl;
use crate::resilience::reprompt::{repair_output, RepromptConfig};

/// Tunables for plan production (spec.md §6 Orchestrator defaults).
#[derive(Debug, Clone, Copy)]
pub struct PlannerConfig {
    /// Timeout for each LLM planning call.
    pub planning_timeout: Duration,
    /// Confidence below which the keyword router's opinion wins.
    pub confidence_threshold: f64,
    /// Reprompt-loop settings used to repair malformed plan output.
    pub reprompt: RepromptConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            planning_timeout: Duration::from_secs(15),
            confidence_threshold: 0.6,
            reprompt: RepromptConfig::default(),
        }
    }
}

const STRUCTURAL_RULES: &str = "Respond with ONLY a JSON array. Each element must be an object \
with a \"capability\" string field, a \"params\" object field, and optionally \"dependencies\" \
(array of earlier element indices as \"t<N>\") and \"optional\" (bool). Do not include any prose \
before or after the array.";

/// Builds the planning prompt embedding the user's query, recent
/// conversation context, and the capability catalogue (spec.md §4.3 step 3).
#[must_use]
pub fn build_planning_prompt(query: &str, context: &Context, capabilities: &[CapabilityName]) -> String {
    let catalogue = capabilities
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let recent = context
        .messages
        .iter()
        .map(|m| format!("{}: {}", m.sender.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are planning tasks for an agent mesh.\n\
         Available capabilities: {catalogue}\n\
         Recent conversation:\n{recent}\n\
         User query: {query}\n\
         {STRUCTURAL_RULES}\n\
         Also include a top-level \"confidence\" field in [0,1] is not required per task; \
         report your confidence as the first line prefixed with \"CONFIDENCE=\"."
    )
}

/// A produced plan plus the LLM's self-reported confidence, if any.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// The produced plan (possibly empty, if the keyword router found no match).
    pub plan: TaskPlan,
    /// `true` if this plan came from the cache rather than a fresh LLM call.
    pub from_cache: bool,
    /// The LLM's self-reported `CONFIDENCE=` value, if the output carried one
    /// and the plan wasn't served from cache.
    pub confidence: Option<f64>,
}

/// Produces a plan for `query`: consults the cache, falls through to the
/// LLM with repair-on-malformed-output, validates against the registry, and
/// reconciles with the keyword router on low confidence (spec.md §4.3
/// steps 4-6).
#[instrument(skip(cache, llm, registry, context, capabilities, router))]
#[allow(clippy::too_many_arguments)]
pub async fn produce_plan(
    cache: &Arc<ResponseCache>,
    llm: &dyn LlmProvider,
    model: &str,
    registry: &AgentRegistryImpl,
    router: &KeywordRouter,
    config: PlannerConfig,
    query: &str,
    context: &Context,
    capabilities: &[CapabilityName],
) -> PlanOutcome {
    let prompt = build_planning_prompt(query, context, capabilities);
    let params = LlmParams::new();
    let fp = fingerprint::fingerprint(&prompt, model, &params);

    if let Ok(Some(cached)) = cache.get(&fp).await {
        if let Ok(plan) = TaskPlan::parse(strip_confidence_line(&cached)) {
            return PlanOutcome { plan, from_cache: true, confidence: None };
        }
    }

    let confidence_cell: RefCell<Option<f64>> = RefCell::new(None);
    let repaired = repair_output(
        llm,
        &prompt,
        model,
        &params,
        config.planning_timeout,
        config.reprompt,
        STRUCTURAL_RULES,
        |text| {
            *confidence_cell.borrow_mut() = parse_confidence(text);
            TaskPlan::parse(strip_confidence_line(text))
        },
        |snippet, err, rules| {
            format!(
                "Your previous response was invalid: {err}\nYou wrote: {snippet}\n{rules}\n\
                 Reply again, correcting the structural problem above."
            )
        },
    )
    .await;

    let plan = match repaired {
        Ok(plan) => plan,
        Err(e) => {
            warn!(error = %e, "reprompt loop exhausted, falling back to keyword router");
            return PlanOutcome {
                plan: router.route(query),
                from_cache: false,
                confidence: None,
            };
        }
    };

    cache
        .put(fp, serde_json::to_string(&plan).unwrap_or_default())
        .await;

    let validated = validate_against_registry(plan, registry);
    PlanOutcome {
        plan: validated,
        from_cache: false,
        confidence: confidence_cell.into_inner(),
    }
}

/// Drops `optional` tasks whose capability the registry doesn't have, and
/// keeps non-optional tasks even if missing (the orchestrator's dispatch
/// step surfaces the gap via the Resilience Layer's partial-result path).
#[must_use]
pub fn validate_against_registry(mut plan: TaskPlan, registry: &AgentRegistryImpl) -> TaskPlan {
    let known: BTreeSet<String> = registry
        .get_all()
        .iter()
        .flat_map(|r| r.capabilities.iter().map(ToString::to_string))
        .collect();
    plan.tasks
        .retain(|t| !t.optional || known.contains(&t.capability.to_string()));
    plan
}

fn strip_confidence_line(text: &str) -> &str {
    if let Some(stripped) = text.strip_prefix("CONFIDENCE=") {
        if let Some(newline) = stripped.find('\n') {
            return &stripped[newline + 1..];
        }
    }
    text
}

/// Parses a leading `CONFIDENCE=<float>` line, if present (spec.md §4.3
/// "Intent confidence").
#[must_use]
pub fn parse_confidence(text: &str) -> Option<f64> {
    text.strip_prefix("CONFIDENCE=")?
        .lines()
        .next()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_confidence_line_removes_prefix() {
        let text = "CONFIDENCE=0.9\n[{\"capability\":\"a\",\"params\":{}}]";
        assert_eq!(strip_confidence_line(text), "[{\"capability\":\"a\",\"params\":{}}]");
    }

    #[test]
    fn parse_confidence_reads_leading_line() {
        let text = "CONFIDENCE=0.42\nrest";
        assert_eq!(parse_confidence(text), Some(0.42));
        assert_eq!(parse_confidence("no confidence here"), None);
    }

    #[test]
    fn validate_against_registry_drops_missing_optional_tasks_only() {
        use crate::ports::clock::TestClock;
        use std::sync::Arc;

        let clock = Arc::new(TestClock::new());
        let bus = crate::event_bus::EventBusImpl::new(Default::default(), clock.clone());
        let registry = AgentRegistryImpl::new(Default::default(), clock, bus);

        let plan = TaskPlan::parse(
            r#"[{"capability":"unknown.optional","params":{},"optional":true},
                {"capability":"unknown.required","params":{},"optional":false}]"#,
        )
        .unwrap();
        let validated = validate_against_registry(plan, &registry);
        assert_eq!(validated.tasks.len(), 1);
        assert_eq!(validated.tasks[0].capability.to_string(), "unknown.required");
    }
}
