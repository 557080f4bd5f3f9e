//! Conversation Memory (spec.md §4.7, component C7)

pub mod domain_types;
pub mod session_store;

pub use domain_types::{Context, Message, Sender, Session, SessionLifecycle, Summary};
pub use session_store::{
    extract_entities, extract_topics, ConversationMemory, MemoryConfig, MemoryError,
};
