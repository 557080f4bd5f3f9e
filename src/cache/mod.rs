//! Response Cache (spec.md §4.6, component C6)

pub mod cache;
pub mod fingerprint;

pub use cache::{CacheConfig, CacheError, CacheStats, ResponseCache};
pub use fingerprint::{fingerprint, serialize_params};
