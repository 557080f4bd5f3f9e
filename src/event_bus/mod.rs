//! Event Bus (spec.md §4.1, component C1)
//!
//! Topic-based publish/subscribe with wildcard matching, three delivery
//! guarantees, and dead-letter routing for exhausted `AT_LEAST_ONCE`
//! deliveries. Every other component talks to the rest of the mesh only
//! through this module's public surface.

pub mod bus;
pub mod domain_types;
pub mod trie;

pub use bus::{
    BusError, BusStats, ChannelCapacity, EventBusConfig, EventBusImpl, EventHandler, FnHandler,
    HandlerError,
};
pub use domain_types::{DeliveryGuarantee, Event, SubscriptionHandle, SubscriptionInfo};
