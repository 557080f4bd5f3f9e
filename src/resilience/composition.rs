//! Partial-result composition (spec.md §4.5 "Partial-result composition")

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain_types::CapabilityName;

/// One task's outcome within a plan, keyed by the capability it served.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// The capability this task dispatched to.
    pub capability: CapabilityName,
    /// `Ok` with the agent's result payload, or `Err` if the task failed
    /// (including after retries and alternate routing were exhausted).
    pub result: Result<Value, String>,
    /// Whether a missing/failed result for this capability should be
    /// dropped silently rather than marking the overall plan partial.
    pub optional: bool,
}

/// The composed result of a dispatched plan (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedResult {
    /// Successful task results, keyed by capability.
    pub successes: BTreeMap<String, Value>,
    /// Per-failure user-facing notices, keyed by capability.
    pub failure_notices: BTreeMap<String, String>,
    /// `true` if at least one non-optional task failed.
    pub partial: bool,
}

/// Default notice shown when a capability has no specific entry in the
/// notice map (spec.md §4.5 example: `weather.get → "..."`).
const DEFAULT_NOTICE: &str = "This part of your request could not be completed.";

/// Composes `outcomes` into a single result, looking up per-capability
/// failure notices in `notice_map` and falling back to a generic notice.
#[must_use]
pub fn compose(
    outcomes: Vec<TaskOutcome>,
    notice_map: &BTreeMap<CapabilityName, String>,
) -> ComposedResult {
    let mut successes = BTreeMap::new();
    let mut failure_notices = BTreeMap::new();
    let mut partial = false;

    for outcome in outcomes {
        match outcome.result {
            Ok(value) => {
                successes.insert(outcome.capability.to_string(), value);
            }
            Err(_) => {
                if !outcome.optional {
                    partial = true;
                }
                let notice = notice_map
                    .get(&outcome.capability)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_NOTICE.to_string());
                failure_notices.insert(outcome.capability.to_string(), notice);
            }
        }
    }

    ComposedResult {
        successes,
        failure_notices,
        partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(s: &str) -> CapabilityName {
        CapabilityName::try_new(s.to_string()).unwrap()
    }

    #[test]
    fn all_success_is_not_partial() {
        let outcomes = vec![TaskOutcome {
            capability: cap("weather.get"),
            result: Ok(serde_json::json!({"temp": 72})),
            optional: false,
        }];
        let composed = compose(outcomes, &BTreeMap::new());
        assert!(!composed.partial);
        assert_eq!(composed.successes.len(), 1);
    }

    #[test]
    fn non_optional_failure_marks_partial_and_uses_notice_map() {
        let mut notices = BTreeMap::new();
        notices.insert(
            cap("weather.get"),
            "Weather information is temporarily unavailable".to_string(),
        );
        let outcomes = vec![
            TaskOutcome {
                capability: cap("booking.reserve"),
                result: Ok(serde_json::json!({"confirmed": true})),
                optional: false,
            },
            TaskOutcome {
                capability: cap("weather.get"),
                result: Err("timeout".to_string()),
                optional: false,
            },
        ];
        let composed = compose(outcomes, &notices);
        assert!(composed.partial);
        assert_eq!(
            composed.failure_notices.get("weather.get").unwrap(),
            "Weather information is temporarily unavailable"
        );
        assert_eq!(composed.successes.len(), 1);
    }

    #[test]
    fn optional_failure_does_not_mark_partial() {
        let outcomes = vec![TaskOutcome {
            capability: cap("nice.to.have"),
            result: Err("unreachable".to_string()),
            optional: true,
        }];
        let composed = compose(outcomes, &BTreeMap::new());
        assert!(!composed.partial);
        assert_eq!(composed.failure_notices.len(), 1);
    }
}
