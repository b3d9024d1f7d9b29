//! EventDispatcher - routes remote events to handlers and confirms them.
//!
//! ## Delivery contract
//!
//! | Handler result | Action                                            |
//! |----------------|---------------------------------------------------|
//! | `Ok(())`       | `confirm(uuid)`; unknown uuid is logged, ignored  |
//! | `Err(_)`       | logged, NOT confirmed; the source redelivers      |
//! | panic          | same as `Err`, the receive loop keeps running     |
//!
//! There is no local retry or backoff. Redelivery belongs to the source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use super::types::{EventType, RemoteEvent};
use crate::error::AgentError;
use crate::remote::EventSource;

/// Pause after a failed `receive` before trying again.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Handles one event. Must be safe to run re-entrantly: the same event may be
/// delivered more than once, and separate dispatchers may run concurrently.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &RemoteEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no handler registered for event type '{0}'")]
    NoHandler(EventType),

    #[error("dispatcher already subscribed")]
    AlreadySubscribed,

    #[error("subscribe request failed: {0}")]
    Subscribe(#[source] AgentError),
}

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Confirmed,
    /// Handled, but the confirm call failed. The source will redeliver.
    ConfirmFailed,
    /// Handler returned an error or panicked. Left unconfirmed.
    HandlerFailed,
    /// No handler for this type. Left unconfirmed.
    Unhandled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub confirmed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    confirmed: AtomicU64,
    failed: AtomicU64,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects the handler table at startup.
#[derive(Default)]
pub struct EventDispatcherBuilder {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl EventDispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `event_type`. A later registration for the
    /// same type replaces the earlier one.
    pub fn register(mut self, event_type: EventType, handler: Arc<dyn EventHandler>) -> Self {
        if self.handlers.insert(event_type, handler).is_some() {
            tracing::warn!(event_type = %event_type, "Replacing existing event handler");
        }
        self
    }

    /// Register one handler for several types.
    pub fn register_all(
        mut self,
        event_types: &[EventType],
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        for event_type in event_types {
            self = self.register(*event_type, Arc::clone(&handler));
        }
        self
    }

    pub fn build(self, source: Arc<dyn EventSource>) -> EventDispatcher {
        EventDispatcher {
            source,
            handlers: self.handlers,
            subscribed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventDispatcher
// ---------------------------------------------------------------------------

pub struct EventDispatcher {
    source: Arc<dyn EventSource>,
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
    subscribed: AtomicBool,
    counters: Counters,
}

impl EventDispatcher {
    pub fn builder() -> EventDispatcherBuilder {
        EventDispatcherBuilder::new()
    }

    pub fn handles(&self, event_type: EventType) -> bool {
        self.handlers.contains_key(&event_type)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            received: self.counters.received.load(Ordering::Relaxed),
            confirmed: self.counters.confirmed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Register interest in `types` with the source.
    ///
    /// Call once at startup. Every type must have a handler; a missing one is
    /// a configuration error and nothing is subscribed.
    pub async fn subscribe(&self, types: &[EventType]) -> Result<(), DispatchError> {
        if let Some(missing) = types.iter().find(|t| !self.handlers.contains_key(*t)) {
            tracing::error!(
                event_type = %missing,
                "Subscribed event type has no handler"
            );
            return Err(DispatchError::NoHandler(*missing));
        }

        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::AlreadySubscribed);
        }

        if let Err(e) = self.source.subscribe(types).await {
            self.subscribed.store(false, Ordering::SeqCst);
            tracing::error!(error = %e, "Event subscription failed");
            return Err(DispatchError::Subscribe(e));
        }

        tracing::info!(count = types.len(), "Subscribed to remote events");
        Ok(())
    }

    /// Handle a single event and confirm it on success.
    pub async fn dispatch(&self, event: &RemoteEvent) -> DispatchOutcome {
        let event_type = event.event_type();
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let Some(handler) = self.handlers.get(&event_type) else {
            tracing::error!(
                event_uuid = %event.uuid,
                event_type = %event_type,
                "Received event with no handler, leaving unconfirmed"
            );
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::Unhandled;
        };

        if let Err(e) = handler.handle(event).await {
            tracing::error!(
                event_uuid = %event.uuid,
                event_type = %event_type,
                error = %e,
                "Event handler failed, leaving unconfirmed for redelivery"
            );
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::HandlerFailed;
        }

        self.confirm(event).await
    }

    async fn confirm(&self, event: &RemoteEvent) -> DispatchOutcome {
        match self.source.confirm(event.uuid).await {
            Ok(()) => {
                self.counters.confirmed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    event_uuid = %event.uuid,
                    event_type = %event.event_type(),
                    "Event confirmed"
                );
                DispatchOutcome::Confirmed
            }
            Err(AgentError::UnknownEvent(uuid)) => {
                tracing::warn!(
                    event_uuid = %uuid,
                    "Confirm rejected: event unknown to the source"
                );
                DispatchOutcome::ConfirmFailed
            }
            Err(e) => {
                tracing::error!(
                    event_uuid = %event.uuid,
                    error = %e,
                    "Confirm failed"
                );
                DispatchOutcome::ConfirmFailed
            }
        }
    }

    /// Receive loop. Runs until the shutdown signal is received.
    ///
    /// Each event is dispatched on its own task and awaited, so a panicking
    /// handler is contained without introducing concurrency between events.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(handlers = self.handlers.len(), "EventDispatcher started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let received = tokio::select! {
                r = self.source.receive() => r,
                _ = shutdown_rx.changed() => break,
            };

            let event = match received {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Receiving event failed, retrying");
                    tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                    continue;
                }
            };

            let uuid = event.uuid;
            let this = Arc::clone(&self);
            let result = tokio::spawn(async move { this.dispatch(&event).await }).await;
            if let Err(e) = result {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    event_uuid = %uuid,
                    error = ?e,
                    "Event handler panicked, leaving unconfirmed"
                );
            }
        }

        tracing::info!(stats = ?self.stats(), "EventDispatcher stopped");
    }
}
