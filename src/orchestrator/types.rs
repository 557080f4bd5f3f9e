//! Orchestrator data model (spec.md §3 "TaskPlan", §4.3)
//!
//! This is the single canonical result/plan shape for the orchestrator;
//! nothing else in this crate defines a parallel `TaskResult` or
//! `OrchestrationResult` variant (spec.md §9, Open Questions).

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain_types::{CapabilityName, SessionId};

/// One task within a plan (spec.md §3 `TaskSpec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Plan-local identifier, referenced by other tasks' `dependencies`.
    pub task_id: String,
    /// Capability this task should be dispatched to.
    pub capability: CapabilityName,
    /// Parameters passed to the serving agent.
    pub params: Value,
    /// Other `task_id`s in the same plan that must complete first.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Relative scheduling priority; higher runs first among unblocked tasks.
    #[serde(default)]
    pub priority: u8,
    /// Per-task timeout before the dispatch is considered failed.
    #[serde(skip, default = "default_task_timeout")]
    pub timeout: Duration,
    /// If `true`, this task's failure or missing capability doesn't mark
    /// the overall plan `partial`.
    #[serde(default)]
    pub optional: bool,
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(30)
}

/// An ordered sequence of tasks forming a DAG (spec.md §3 `TaskPlan`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPlan {
    /// The plan's tasks, in the order the planner produced them.
    pub tasks: Vec<TaskSpec>,
}

/// Raised when a plan fails structural validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanError {
    /// The planner's raw output could not be parsed as the expected schema.
    #[error("plan output is not valid JSON matching the planning contract: {0}")]
    Malformed(String),

    /// A task's `dependencies` refers to a `task_id` not present in the plan.
    #[error("task {0} depends on unknown task {1}")]
    UnknownDependency(String, String),

    /// The dependency graph contains a cycle.
    #[error("plan dependency graph contains a cycle")]
    CyclicDependencies,

    /// The LLM itself failed (unavailable, timed out) on every repair
    /// attempt, as opposed to replying with structurally invalid output.
    #[error("LLM call failed: {0}")]
    LlmUnavailable(String),
}

impl From<String> for PlanError {
    fn from(message: String) -> Self {
        PlanError::LlmUnavailable(message)
    }
}

impl TaskPlan {
    /// Parses a planner's raw text output against the planning-prompt
    /// contract (spec.md §6): a JSON array of
    /// `{"capability", "params", "dependencies"?, "optional"?}`.
    ///
    /// # Errors
    /// Returns [`PlanError::Malformed`] if `text` isn't valid JSON matching
    /// the contract, or [`PlanError::UnknownDependency`] /
    /// [`PlanError::CyclicDependencies`] if the structure is invalid.
    pub fn parse(text: &str) -> Result<Self, PlanError> {
        #[derive(Deserialize)]
        struct RawTask {
            capability: String,
            #[serde(default)]
            params: Value,
            #[serde(default)]
            dependencies: Vec<String>,
            #[serde(default)]
            optional: bool,
        }

        let raw: Vec<RawTask> =
            serde_json::from_str(text).map_err(|e| PlanError::Malformed(e.to_string()))?;

        let tasks: Vec<TaskSpec> = raw
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                let capability = CapabilityName::try_new(r.capability)
                    .map_err(|e| PlanError::Malformed(e.to_string()))?;
                Ok(TaskSpec {
                    task_id: format!("t{i}"),
                    capability,
                    params: r.params,
                    dependencies: r.dependencies.into_iter().collect(),
                    priority: 0,
                    timeout: default_task_timeout(),
                    optional: r.optional,
                })
            })
            .collect::<Result<_, PlanError>>()?;

        let plan = Self { tasks };
        plan.validate_dag()?;
        Ok(plan)
    }

    /// Checks every dependency refers to an earlier task and that the
    /// dependency graph is acyclic (spec.md §3 invariant, §8 boundary case).
    ///
    /// # Errors
    /// Returns [`PlanError::UnknownDependency`] or
    /// [`PlanError::CyclicDependencies`].
    pub fn validate_dag(&self) -> Result<(), PlanError> {
        let ids: BTreeSet<&str> = self.tasks.iter().map(|t| t.task_id.as_str()).collect();
        for task in &self.tasks {
            for dep in &task.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(PlanError::UnknownDependency(task.task_id.clone(), dep.clone()));
                }
            }
        }

        // Kahn's algorithm: a topological sort exists iff the graph is acyclic.
        let mut in_degree: std::collections::BTreeMap<&str, usize> = self
            .tasks
            .iter()
            .map(|t| (t.task_id.as_str(), t.dependencies.len()))
            .collect();
        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;

        while let Some(id) = queue.pop() {
            visited += 1;
            for task in &self.tasks {
                if task.dependencies.iter().any(|d| d == id) {
                    let entry = in_degree.get_mut(task.task_id.as_str()).unwrap();
                    *entry -= 1;
                    if *entry == 0 {
                        queue.push(task.task_id.as_str());
                    }
                }
            }
        }

        if visited != self.tasks.len() {
            return Err(PlanError::CyclicDependencies);
        }
        Ok(())
    }

    /// Returns the tasks whose dependencies are all present in `completed`.
    #[must_use]
    pub fn ready_tasks<'a>(&'a self, completed: &BTreeSet<String>) -> Vec<&'a TaskSpec> {
        self.tasks
            .iter()
            .filter(|t| !completed.contains(&t.task_id))
            .filter(|t| t.dependencies.iter().all(|d| completed.contains(d)))
            .collect()
    }
}

/// The final, user-facing outcome of one orchestration turn (spec.md §3,
/// the canonical result shape referenced by the Open Questions in §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    /// The session this turn belongs to.
    pub session_id: SessionId,
    /// The synthesised natural-language reply.
    pub answer: String,
    /// `true` if any non-optional task failed or the plan was incomplete.
    pub partial: bool,
    /// Human-readable failure notices accumulated during this turn.
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_the_planning_contract_shape() {
        let plan = TaskPlan::parse(
            r#"[{"capability":"weather.get","params":{"location":"Tokyo"}}]"#,
        )
        .unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].capability.to_string(), "weather.get");
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(TaskPlan::parse("sure, here: {intent: weather}").is_err());
    }

    #[test]
    fn validate_dag_rejects_unknown_dependency() {
        let plan = TaskPlan {
            tasks: vec![TaskSpec {
                task_id: "t0".into(),
                capability: CapabilityName::try_new("a".to_string()).unwrap(),
                params: Value::Null,
                dependencies: ["missing".to_string()].into_iter().collect(),
                priority: 0,
                timeout: default_task_timeout(),
                optional: false,
            }],
        };
        assert!(matches!(plan.validate_dag(), Err(PlanError::UnknownDependency(_, _))));
    }

    #[test]
    fn validate_dag_rejects_cycles() {
        let plan = TaskPlan {
            tasks: vec![
                TaskSpec {
                    task_id: "t0".into(),
                    capability: CapabilityName::try_new("a".to_string()).unwrap(),
                    params: Value::Null,
                    dependencies: ["t1".to_string()].into_iter().collect(),
                    priority: 0,
                    timeout: default_task_timeout(),
                    optional: false,
                },
                TaskSpec {
                    task_id: "t1".into(),
                    capability: CapabilityName::try_new("b".to_string()).unwrap(),
                    params: Value::Null,
                    dependencies: ["t0".to_string()].into_iter().collect(),
                    priority: 0,
                    timeout: default_task_timeout(),
                    optional: false,
                },
            ],
        };
        assert!(matches!(plan.validate_dag(), Err(PlanError::CyclicDependencies)));
    }

    #[test]
    fn ready_tasks_respects_dependencies() {
        let plan = TaskPlan::parse(
            r#"[{"capability":"travel.plan","params":{}},{"capability":"weather.get","params":{},"dependencies":["t0"]}]"#,
        )
        .unwrap();
        let none_done = plan.ready_tasks(&BTreeSet::new());
        assert_eq!(none_done.len(), 1);
        assert_eq!(none_done[0].task_id, "t0");

        let first_done: BTreeSet<String> = ["t0".to_string()].into_iter().collect();
        let next = plan.ready_tasks(&first_done);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].task_id, "t1");
    }
}
