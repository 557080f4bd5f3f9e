//! Agent Registry (spec.md §4.2, component C2)

pub mod domain_types;
pub mod registry;

pub use domain_types::{AgentStatus, AgentType, MatchResult, Registration};
pub use registry::{AgentRegistryImpl, RegistryConfig, RegistryError};
