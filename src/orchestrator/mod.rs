//! Orchestrator (spec.md §4.3, component C3)
//!
//! Ties the other six components together into one conversational turn:
//! fetch context, produce a plan (cache, LLM, reprompt, keyword-router
//! fallback), dispatch tasks honouring their dependency graph through the
//! Correlation Tracker and Resilience Layer, compose the result, and
//! synthesise a reply.

pub mod keyword_router;
pub mod pipeline;
pub mod planner;
pub mod types;

use thiserror::Error;

pub use keyword_router::KeywordRouter;
pub use pipeline::{Orchestrator, OrchestratorConfig};
pub use planner::{build_planning_prompt, produce_plan, PlanOutcome, PlannerConfig};
pub use types::{OrchestrationResult, PlanError, TaskPlan, TaskSpec};

/// Errors surfaced by the orchestrator pipeline itself, distinct from the
/// per-task failures the Resilience Layer already absorbs into
/// [`OrchestrationResult::partial`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The requested session does not exist in Conversation Memory.
    #[error("session error: {0}")]
    Memory(#[from] crate::memory::MemoryError),
}
