//! Event Bus implementation (spec.md §4.1)
//!
//! Wildcard pub/sub routing over a segment trie, with three delivery
//! guarantees (`BEST_EFFORT`, `AT_LEAST_ONCE`, `ORDERED`) and a dead-letter
//! topic for permanently failed deliveries. The trie is read-mostly: publish
//! takes a short read lock to collect matching handles and releases it
//! before invoking any handler; only `subscribe`/`unsubscribe` take the
//! write lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use nutype::nutype;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

use crate::domain_types::{AgentId, Topic};
use crate::event_bus::domain_types::{
    DeliveryGuarantee, Event, SubscriptionHandle, SubscriptionInfo,
};
use crate::event_bus::trie::PatternTrie;
use crate::ports::Clock;

/// Boxed, `Send + Sync`-safe error type returned by handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the Event Bus itself (never the handler's business logic).
#[derive(Debug, Error)]
pub enum BusError {
    /// `publish` was called after `stop()` completed its grace period.
    #[error("event bus has been stopped")]
    Stopped,

    /// The subscription pattern is syntactically invalid.
    #[error("invalid topic pattern: {0}")]
    InvalidPattern(String),

    /// `unsubscribe` referenced a handle that doesn't exist (already removed).
    #[error("unknown subscription handle")]
    UnknownSubscription,
}

/// A subscriber's callback, invoked once per matching delivered event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one delivered event.
    async fn handle(&self, event: Event) -> Result<(), HandlerError>;
}

/// Bounded queue capacity for `AT_LEAST_ONCE` delivery's backpressure gate.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default),
    default = 10_000
)]
pub struct ChannelCapacity(usize);

/// Event Bus tunables (spec.md §4.1 delivery guarantees, §5 suspension points).
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Concurrent `AT_LEAST_ONCE` deliveries allowed before publish blocks.
    pub channel_capacity: ChannelCapacity,
    /// Base retry delay for `AT_LEAST_ONCE` redelivery.
    pub retry_base: Duration,
    /// Exponential backoff factor.
    pub retry_factor: f64,
    /// Maximum redelivery attempts before dead-lettering.
    pub max_attempts: u32,
    /// Jitter applied to each retry delay, as a fraction (0.2 = ±20%).
    pub retry_jitter: f64,
    /// Grace period `stop()` waits for in-flight deliveries to drain.
    pub stop_grace: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: ChannelCapacity::default(),
            retry_base: Duration::from_millis(100),
            retry_factor: 2.0,
            max_attempts: 5,
            retry_jitter: 0.2,
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Point-in-time counters for operational visibility.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusStats {
    /// Number of `publish` calls accepted.
    pub published: u64,
    /// Number of handler invocations that returned `Ok`.
    pub delivered: u64,
    /// Number of redelivery attempts made for `AT_LEAST_ONCE` events.
    pub retried: u64,
    /// Number of events moved to a `dlq.*` topic after exhausting retries.
    pub dead_lettered: u64,
}

struct Counters {
    published: AtomicUsize,
    delivered: AtomicUsize,
    retried: AtomicUsize,
    dead_lettered: AtomicUsize,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            published: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
            retried: AtomicUsize::new(0),
            dead_lettered: AtomicUsize::new(0),
        }
    }
}

type SubscriptionEntry = (SubscriptionInfo, Arc<dyn EventHandler>);

/// FIFO worker for a single `(sender, topic)` pair under `ORDERED` delivery.
///
/// Guarantees a subscription's handler is never invoked concurrently with
/// itself for events sharing the same key, and that handlers run in
/// publish order.
#[derive(Default)]
struct OrderedQueue {
    queue: AsyncMutex<VecDeque<(Event, Arc<dyn EventHandler>)>>,
    running: AtomicBool,
}

/// Topic-based pub/sub fabric with wildcard matching and delivery guarantees.
pub struct EventBusImpl {
    trie: StdRwLock<PatternTrie>,
    subscriptions: DashMap<SubscriptionHandle, SubscriptionEntry>,
    ordered_queues: DashMap<(AgentId, String), Arc<OrderedQueue>>,
    at_least_once_gate: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    stopped: AtomicBool,
    clock: Arc<dyn Clock>,
    config: EventBusConfig,
    counters: Counters,
}

impl EventBusImpl {
    /// Creates a new, running Event Bus.
    #[must_use]
    pub fn new(config: EventBusConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let gate = Arc::new(Semaphore::new(config.channel_capacity.into_inner()));
        Arc::new(Self {
            trie: StdRwLock::new(PatternTrie::new()),
            subscriptions: DashMap::new(),
            ordered_queues: DashMap::new(),
            at_least_once_gate: gate,
            in_flight: Arc::new(AtomicUsize::new(0)),
            stopped: AtomicBool::new(false),
            clock,
            config,
            counters: Counters::default(),
        })
    }

    /// Registers `handler` under `pattern` on behalf of `subscriber_agent_id`.
    ///
    /// # Errors
    /// Returns [`BusError::InvalidPattern`] if `pattern` has empty segments.
    pub fn subscribe(
        &self,
        subscriber_agent_id: AgentId,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionHandle, BusError> {
        if pattern.is_empty() || pattern.split('.').any(str::is_empty) {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }
        let handle = SubscriptionHandle::generate();
        self.trie
            .write()
            .expect("trie lock poisoned")
            .insert(pattern, handle);
        self.subscriptions.insert(
            handle,
            (
                SubscriptionInfo {
                    subscriber_agent_id,
                    pattern: pattern.to_string(),
                    created_at: self.clock.now(),
                },
                handler,
            ),
        );
        Ok(handle)
    }

    /// Removes a subscription. No-op (returns `Ok`) if already removed.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), BusError> {
        if let Some((_, (info, _))) = self.subscriptions.remove(&handle) {
            self.trie
                .write()
                .expect("trie lock poisoned")
                .remove(&info.pattern, handle);
        }
        Ok(())
    }

    /// Publishes `event`, routing it to every subscription whose pattern
    /// matches `event.topic`.
    ///
    /// Returns once the event is durably enqueued for delivery, not once
    /// delivery completes (spec.md §4.1).
    ///
    /// # Errors
    /// Returns [`BusError::Stopped`] if called after `stop()`'s grace period.
    #[instrument(skip(self, event), fields(topic = %event.topic))]
    pub async fn publish(self: &Arc<Self>, event: Event) -> Result<(), BusError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BusError::Stopped);
        }
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let segments = event.topic.segments();
        let handles = self
            .trie
            .read()
            .expect("trie lock poisoned")
            .matches(&segments);

        for handle in handles {
            let Some(entry) = self.subscriptions.get(&handle) else {
                continue;
            };
            let handler = Arc::clone(&entry.1);
            let subscriber = entry.0.subscriber_agent_id;
            drop(entry);
            self.dispatch(event.clone(), handler, subscriber).await;
        }
        Ok(())
    }

    async fn dispatch(
        self: &Arc<Self>,
        event: Event,
        handler: Arc<dyn EventHandler>,
        subscriber: AgentId,
    ) {
        match event.delivery {
            DeliveryGuarantee::BestEffort => {
                let this = Arc::clone(self);
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    if let Err(e) = handler.handle(event).await {
                        warn!(error = %e, "best-effort handler failed, dropping");
                    } else {
                        this.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    this.in_flight.fetch_sub(1, Ordering::SeqCst);
                });
            }
            DeliveryGuarantee::AtLeastOnce => {
                let this = Arc::clone(self);
                let gate = Arc::clone(&self.at_least_once_gate);
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                let _ = subscriber;
                tokio::spawn(async move {
                    // Backpressure: a full gate makes this a suspension point (spec.md §5).
                    let permit = gate.acquire_owned().await;
                    this.deliver_at_least_once(event, handler).await;
                    drop(permit);
                    this.in_flight.fetch_sub(1, Ordering::SeqCst);
                });
            }
            DeliveryGuarantee::Ordered => {
                let key = (subscriber, event.topic.to_string());
                let ordered = self
                    .ordered_queues
                    .entry(key)
                    .or_insert_with(|| Arc::new(OrderedQueue::default()))
                    .clone();
                ordered.queue.lock().await.push_back((event, handler));
                self.drain_ordered(ordered);
            }
        }
    }

    async fn deliver_at_least_once(
        self: &Arc<Self>,
        event: Event,
        handler: Arc<dyn EventHandler>,
    ) {
        let mut delay = self.config.retry_base;
        for attempt in 0..self.config.max_attempts {
            match handler.handle(event.clone()).await {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    debug!(attempt, error = %e, "at-least-once delivery attempt failed");
                }
            }
            if attempt + 1 == self.config.max_attempts {
                break;
            }
            self.counters.retried.fetch_add(1, Ordering::Relaxed);
            sleep(jittered(delay, self.config.retry_jitter)).await;
            delay = delay.mul_f64(self.config.retry_factor);
        }

        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.publish_dead_letter(event).await;
    }

    fn drain_ordered(self: &Arc<Self>, queue: Arc<OrderedQueue>) {
        if queue
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return; // a drain task is already running for this key
        }
        let this = Arc::clone(self);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            loop {
                let next = queue.queue.lock().await.pop_front();
                let Some((event, handler)) = next else {
                    queue.running.store(false, Ordering::SeqCst);
                    break;
                };
                if let Err(e) = handler.handle(event).await {
                    error!(error = %e, "ordered handler failed");
                } else {
                    this.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
            }
            this.in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    async fn publish_dead_letter(self: &Arc<Self>, event: Event) {
        let dlq_topic = event.dead_letter_topic();
        let payload = serde_json::json!({
            "original_event": event,
            "reason": "at-least-once retries exhausted",
        });
        let dlq_event = Event::new(
            dlq_topic,
            payload,
            event.sender,
            event.correlation_id,
            self.clock.now(),
            DeliveryGuarantee::BestEffort,
        );
        // Best-effort so a failing DLQ subscriber can't loop back into itself.
        if let Err(e) = self.publish(dlq_event).await {
            error!(error = %e, "failed to publish to dead-letter topic");
        }
    }

    /// Drains pending deliveries up to the configured grace period, then
    /// rejects any further `publish` calls.
    pub async fn stop(&self) {
        let deadline = self.clock.monotonic_now() + self.config.stop_grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 && self.clock.monotonic_now() < deadline {
            sleep(Duration::from_millis(20)).await;
        }
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Returns a snapshot of bus counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed) as u64,
            delivered: self.counters.delivered.load(Ordering::Relaxed) as u64,
            retried: self.counters.retried.load(Ordering::Relaxed) as u64,
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed) as u64,
        }
    }
}

fn jittered(base: Duration, jitter: f64) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
    base.mul_f64(factor.max(0.0))
}

/// Helper to build an [`EventHandler`] from a plain async closure, for tests
/// and simple in-process subscribers.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        (self.0)(event).await
    }
}
