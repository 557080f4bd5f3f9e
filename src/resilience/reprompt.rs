//! Reprompt loop: LLM output repair (spec.md §4.5 "Reprompt loop")

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::ports::llm::{LlmParams, LlmProvider};

/// Category used to select an emergency-response template once the
/// reprompt loop is exhausted (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCategory {
    /// The LLM itself failed or returned unusable output after every retry.
    LlmFailure,
    /// The orchestrator could not build or validate a plan.
    OrchestrationFailure,
    /// An agent failed to complete a dispatched task.
    AgentFailure,
    /// Uncategorised failure.
    General,
}

/// Returns the canned emergency response for `category` (spec.md §4.5).
#[must_use]
pub fn emergency_response(category: FailureCategory) -> &'static str {
    match category {
        FailureCategory::LlmFailure => {
            "I'm having trouble understanding that request right now. Could you rephrase it?"
        }
        FailureCategory::OrchestrationFailure => {
            "I wasn't able to plan a response to that request. Please try again in a moment."
        }
        FailureCategory::AgentFailure => {
            "One of the services I rely on isn't responding right now. Please try again shortly."
        }
        FailureCategory::General => {
            "Something went wrong while handling your request. Please try again."
        }
    }
}

/// Tunables for the reprompt loop.
#[derive(Debug, Clone, Copy)]
pub struct RepromptConfig {
    /// Maximum repair attempts before falling back to an emergency response.
    pub max_attempts: u32,
}

impl Default for RepromptConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Repeatedly invokes `llm` and `validate` until `validate` accepts the
/// output or `max_attempts` is exhausted. Each retry's prompt embeds a
/// truncated snippet of the previous malformed output plus the structural
/// rules so the model can see exactly what it got wrong.
///
/// # Errors
/// Returns the last validation error once `max_attempts` is exhausted.
#[instrument(skip(llm, params, validate, build_repair_prompt))]
pub async fn repair_output<T, E>(
    llm: &dyn LlmProvider,
    base_prompt: &str,
    model: &str,
    params: &LlmParams,
    timeout: Duration,
    config: RepromptConfig,
    structural_rules: &str,
    validate: impl Fn(&str) -> Result<T, E>,
    build_repair_prompt: impl Fn(&str, &str, &str) -> String,
) -> Result<T, E>
where
    E: std::fmt::Display + From<String>,
{
    let mut prompt = base_prompt.to_string();
    let mut last_output = String::new();
    let mut last_err: Option<E> = None;

    for attempt in 0..=config.max_attempts {
        let output = match llm.generate(&prompt, model, params, timeout).await {
            Ok(text) => text,
            Err(e) => {
                warn!(attempt, error = %e, "llm call failed during reprompt loop");
                last_output.clear();
                prompt = build_repair_prompt(&last_output, &e.to_string(), structural_rules);
                last_err = Some(E::from(format!("LLM unavailable: {e}")));
                continue;
            }
        };

        match validate(&output) {
            Ok(parsed) => return Ok(parsed),
            Err(e) => {
                warn!(attempt, error = %e, "llm output failed validation");
                last_output = truncate(&output, 400);
                prompt = build_repair_prompt(&last_output, &e.to_string(), structural_rules);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| E::from("reprompt loop exhausted with no attempts".to_string())))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect::<String>() + "…"
    }
}
