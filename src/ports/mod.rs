//! External collaborator ports (spec.md §6)
//!
//! The core never talks to a concrete LLM vendor, storage backend, or wall
//! clock directly. Every such dependency is expressed as a trait here, with
//! an in-memory test double and, where it makes sense, a minimal real
//! adapter. Production bindings (a specific vendor SDK, an object store) are
//! out of scope for this crate and are supplied by the embedding binary.

pub mod blob;
pub mod clock;
pub mod llm;
pub mod transport;

pub use blob::{BlobStore, InMemoryBlobStore};
pub use clock::{Clock, SystemClock};
pub use llm::{LlmError, LlmParams, LlmProvider};
pub use transport::AgentTransport;
