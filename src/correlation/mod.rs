//! Correlation Tracker (spec.md §4.4, component C4)

pub mod domain_types;
pub mod tracker;

pub use domain_types::{CorrelationContext, CorrelationState, RecordedResponse};
pub use tracker::{CorrelationConfig, CorrelationError, CorrelationTracker};
