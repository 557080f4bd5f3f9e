//! Keyword router: deterministic fallback planner (spec.md §4.3)
//!
//! Used when the LLM planner is unavailable, returns malformed output after
//! the reprompt loop is exhausted, or reports confidence below threshold.
//! On no match, returns an empty plan — the orchestrator then falls back to
//! direct LLM synthesis rather than guessing a default capability
//! (spec.md §9, Open Questions).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain_types::CapabilityName;
use crate::orchestrator::types::{TaskPlan, TaskSpec};

/// A curated `keyword → capability` vocabulary.
pub struct KeywordRouter {
    vocabulary: BTreeMap<String, CapabilityName>,
}

impl KeywordRouter {
    /// Builds a router from `(keyword, capability)` pairs.
    #[must_use]
    pub fn new(vocabulary: Vec<(&str, &str)>) -> Self {
        Self {
            vocabulary: vocabulary
                .into_iter()
                .map(|(k, c)| {
                    (
                        k.to_lowercase(),
                        CapabilityName::try_new(c.to_string()).expect("static capability name"),
                    )
                })
                .collect(),
        }
    }

    /// The default vocabulary used by the development and production
    /// profiles; production deployments are expected to override this with
    /// their own curated map.
    #[must_use]
    pub fn default_vocabulary() -> Self {
        Self::new(vec![
            ("weather", "weather.get"),
            ("forecast", "weather.get"),
            ("stock", "stock.price"),
            ("share price", "stock.price"),
            ("trip", "travel.plan"),
            ("travel", "travel.plan"),
            ("itinerary", "travel.plan"),
            ("booking", "booking.reserve"),
            ("reserve", "booking.reserve"),
        ])
    }

    /// Scans `query` for the first matching keyword (in vocabulary
    /// insertion order, which is lexicographic since the map is a
    /// `BTreeMap`) and returns a single-task plan, or an empty plan if
    /// nothing matches.
    #[must_use]
    pub fn route(&self, query: &str) -> TaskPlan {
        let lower = query.to_lowercase();
        for (keyword, capability) in &self.vocabulary {
            if lower.contains(keyword.as_str()) {
                return TaskPlan {
                    tasks: vec![TaskSpec {
                        task_id: "t0".to_string(),
                        capability: capability.clone(),
                        params: Value::Object(
                            [("query".to_string(), Value::String(query.to_string()))]
                                .into_iter()
                                .collect(),
                        ),
                        dependencies: Default::default(),
                        priority: 0,
                        timeout: std::time::Duration::from_secs(30),
                        optional: false,
                    }],
                };
            }
        }
        TaskPlan::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_first_vocabulary_keyword_found() {
        let router = KeywordRouter::default_vocabulary();
        let plan = router.route("What's the weather in Tokyo?");
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].capability.to_string(), "weather.get");
    }

    #[test]
    fn no_match_returns_empty_plan() {
        let router = KeywordRouter::default_vocabulary();
        let plan = router.route("Tell me a joke about ducks");
        assert!(plan.tasks.is_empty());
    }
}
