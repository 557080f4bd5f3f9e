//! Correlation Tracker implementation (spec.md §4.4, component C4)
//!
//! Each correlation owns a one-shot promise, completed exactly once by
//! whichever of `recordResponse` (first call only) or the timeout fires
//! first. `DashMap`-indexed, following the same O(1)-lookup convention as
//! the registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{instrument, warn};

use crate::correlation::domain_types::{CorrelationContext, CorrelationState, RecordedResponse};
use crate::domain_types::CorrelationId;
use crate::ports::Clock;

/// Errors surfaced through a correlation's promise or API calls.
#[derive(Debug, Error, Clone)]
pub enum CorrelationError {
    /// No response arrived before the configured timeout.
    #[error("correlation {0} timed out")]
    Timeout(CorrelationId),

    /// `cancel` was called before the correlation completed.
    #[error("correlation {0} was cancelled")]
    Cancelled(CorrelationId),

    /// The referenced correlation doesn't exist (expired or never created).
    #[error("correlation {0} not found")]
    NotFound(CorrelationId),

    /// `await` was already called for this correlation.
    #[error("correlation {0} is already being awaited")]
    AlreadyAwaited(CorrelationId),
}

/// Tunables for the Correlation Tracker (spec.md §4.4 defaults).
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// How long a timed-out context is kept so late responses can be logged.
    pub grace_window: Duration,
    /// Interval between sweeps that drop contexts older than `max_age`.
    pub cleanup_interval: Duration,
    /// Maximum context age, regardless of state, before forced removal.
    pub max_age: Duration,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(5 * 60),
            max_age: Duration::from_secs(60 * 60),
        }
    }
}

type Promise = Result<Value, CorrelationError>;

struct Entry {
    context: AsyncMutex<CorrelationContext>,
    completion_tx: AsyncMutex<Option<oneshot::Sender<Promise>>>,
    completion_rx: AsyncMutex<Option<oneshot::Receiver<Promise>>>,
    completed_once: AtomicBool,
}

/// Tracks in-flight request/response correlations across the mesh.
pub struct CorrelationTracker {
    entries: DashMap<CorrelationId, Arc<Entry>>,
    config: CorrelationConfig,
    clock: Arc<dyn Clock>,
}

impl CorrelationTracker {
    /// Creates a new tracker.
    #[must_use]
    pub fn new(config: CorrelationConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            config,
            clock,
        })
    }

    /// Registers a new correlation, scheduling its timeout timer.
    #[instrument(skip(self))]
    pub fn create(self: &Arc<Self>, id: CorrelationId, request_type: String, timeout: Duration) {
        let now = self.clock.now();
        let timeout_at = self
            .clock
            .now()
            .as_system_time()
            .checked_add(timeout)
            .map(crate::domain_types::Timestamp::new)
            .unwrap_or(now);
        let context = CorrelationContext {
            id,
            request_type,
            state: CorrelationState::Pending,
            responses: Vec::new(),
            children: Vec::new(),
            created_at: now,
            timeout_at,
        };
        let (tx, rx) = oneshot::channel();
        let entry = Arc::new(Entry {
            context: AsyncMutex::new(context),
            completion_tx: AsyncMutex::new(Some(tx)),
            completion_rx: AsyncMutex::new(Some(rx)),
            completed_once: AtomicBool::new(false),
        });
        self.entries.insert(id, Arc::clone(&entry));

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            this.fire_timeout(id).await;
        });
    }

    async fn fire_timeout(self: &Arc<Self>, id: CorrelationId) {
        let Some(entry) = self.entries.get(&id).map(|e| Arc::clone(&e)) else {
            return;
        };
        let mut ctx = entry.context.lock().await;
        if ctx.state != CorrelationState::Pending {
            return;
        }
        ctx.state = CorrelationState::TimedOut;
        drop(ctx);
        Self::complete_promise(&entry, Err(CorrelationError::Timeout(id))).await;
    }

    /// Takes the receiving half of this correlation's promise.
    ///
    /// # Errors
    /// Returns [`CorrelationError::NotFound`] if `id` is unknown, or
    /// [`CorrelationError::AlreadyAwaited`] if `await_response` was already
    /// called for this correlation.
    pub async fn await_response(
        &self,
        id: CorrelationId,
    ) -> Result<Promise, CorrelationError> {
        let entry = self
            .entries
            .get(&id)
            .map(|e| Arc::clone(&e))
            .ok_or(CorrelationError::NotFound(id))?;
        let rx = entry
            .completion_rx
            .lock()
            .await
            .take()
            .ok_or(CorrelationError::AlreadyAwaited(id))?;
        Ok(rx.await.unwrap_or(Err(CorrelationError::NotFound(id))))
    }

    /// Records a response. Idempotent: the promise is completed by the
    /// first call only; later calls append to the response log (fan-in).
    ///
    /// # Errors
    /// Returns [`CorrelationError::NotFound`] if `id` is unknown.
    pub async fn record_response(
        &self,
        id: CorrelationId,
        payload: Value,
    ) -> Result<(), CorrelationError> {
        let entry = self
            .entries
            .get(&id)
            .map(|e| Arc::clone(&e))
            .ok_or(CorrelationError::NotFound(id))?;

        let mut ctx = entry.context.lock().await;
        let is_late = ctx.state != CorrelationState::Pending;
        ctx.responses.push(RecordedResponse {
            payload: payload.clone(),
            recorded_at: self.clock.now(),
        });
        if is_late {
            warn!(%id, state = ?ctx.state, "late response recorded for resolved correlation");
            return Ok(());
        }
        ctx.state = CorrelationState::Completed;
        drop(ctx);
        Self::complete_promise(&entry, Ok(payload)).await;
        Ok(())
    }

    /// Explicitly finalizes a correlation. Idempotent; safe to call after
    /// `recordResponse` already completed the promise.
    ///
    /// # Errors
    /// Returns [`CorrelationError::NotFound`] if `id` is unknown.
    pub async fn complete(&self, id: CorrelationId) -> Result<(), CorrelationError> {
        let entry = self
            .entries
            .get(&id)
            .map(|e| Arc::clone(&e))
            .ok_or(CorrelationError::NotFound(id))?;
        let mut ctx = entry.context.lock().await;
        if ctx.state == CorrelationState::Pending {
            ctx.state = CorrelationState::Completed;
            let last = ctx.responses.last().map(|r| r.payload.clone());
            drop(ctx);
            Self::complete_promise(&entry, Ok(last.unwrap_or(Value::Null))).await;
        }
        Ok(())
    }

    /// Cancels a pending correlation.
    ///
    /// # Errors
    /// Returns [`CorrelationError::NotFound`] if `id` is unknown.
    pub async fn cancel(&self, id: CorrelationId) -> Result<(), CorrelationError> {
        let entry = self
            .entries
            .get(&id)
            .map(|e| Arc::clone(&e))
            .ok_or(CorrelationError::NotFound(id))?;
        let mut ctx = entry.context.lock().await;
        if ctx.state != CorrelationState::Pending {
            return Ok(());
        }
        ctx.state = CorrelationState::Cancelled;
        drop(ctx);
        Self::complete_promise(&entry, Err(CorrelationError::Cancelled(id))).await;
        Ok(())
    }

    /// Records causal lineage between correlations for observability only.
    ///
    /// # Errors
    /// Returns [`CorrelationError::NotFound`] if `parent` is unknown.
    pub async fn add_child(
        &self,
        parent: CorrelationId,
        child: CorrelationId,
    ) -> Result<(), CorrelationError> {
        let entry = self
            .entries
            .get(&parent)
            .map(|e| Arc::clone(&e))
            .ok_or(CorrelationError::NotFound(parent))?;
        entry.context.lock().await.children.push(child);
        Ok(())
    }

    async fn complete_promise(entry: &Arc<Entry>, result: Promise) {
        if entry
            .completed_once
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        if let Some(tx) = entry.completion_tx.lock().await.take() {
            let _ = tx.send(result);
        }
    }

    /// Removes every context older than `max_age`, regardless of state.
    pub async fn sweep_expired(&self) {
        let now = self.clock.now();
        let max_age_ms = u64::try_from(self.config.max_age.as_millis()).unwrap_or(u64::MAX);
        let mut expired = Vec::new();
        for entry in self.entries.iter() {
            let ctx = entry.value().context.lock().await;
            if ctx.created_at.elapsed_ms_until(now) >= max_age_ms {
                expired.push(*entry.key());
            }
        }
        for id in expired {
            self.entries.remove(&id);
        }
    }

    /// Spawns the periodic cleanup sweep task.
    pub fn spawn_cleanup(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let interval = this.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.sweep_expired().await;
            }
        })
    }

    /// Returns a snapshot of a correlation's bookkeeping, if still present.
    pub async fn context(&self, id: CorrelationId) -> Option<CorrelationContext> {
        if let Some(entry) = self.entries.get(&id) {
            Some(entry.context.lock().await.clone())
        } else {
            None
        }
    }
}
