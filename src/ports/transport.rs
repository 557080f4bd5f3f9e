//! `AgentTransport` port (spec.md §6, optional)
//!
//! For agents residing in remote processes, maps an `endpointTopic` to
//! out-of-process delivery. The Event Bus only needs this when a
//! subscription's handler lives outside the current process; purely local,
//! in-process agents never touch this port.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain_types::Topic;
use crate::event_bus::domain_types::Event;

/// Errors raised while delivering an event to a remote endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote endpoint could not be reached.
    #[error("remote endpoint unreachable: {0}")]
    Unreachable(String),
}

/// Out-of-process delivery for events whose subscriber lives elsewhere.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Delivers `event` to the remote endpoint registered for `topic`.
    async fn deliver_remote(&self, topic: &Topic, event: &Event) -> Result<(), TransportError>;
}
