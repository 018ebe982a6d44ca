//! Local Event Bus
//!
//! Single-process publish/subscribe for named events that are not replies.
//! Handlers for one name run sequentially in subscription order. A failing
//! or panicking handler is logged and counted, and delivery moves on to the
//! next handler.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::HandlerError;

/// Result type returned by event handlers
pub type HandlerResult = Result<(), HandlerError>;

/// Receiver of published events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one published payload
    async fn handle(&self, payload: Value) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, payload: Value) -> HandlerResult {
        (self)(payload).await
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Outcome of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handlers that completed successfully
    pub delivered: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

impl PublishReport {
    /// Number of handlers invoked
    pub fn invoked(&self) -> usize {
        self.delivered + self.failed
    }
}

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

/// Registry of event subscribers, keyed by event name
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<Subscription>>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`
    ///
    /// Multiple handlers per name are allowed and run in registration order.
    pub fn subscribe<H>(&self, name: impl Into<String>, handler: H) -> SubscriptionId
    where
        H: EventHandler + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        tracing::debug!(event = %name, "subscribed");
        self.subscribers
            .lock()
            .entry(name)
            .or_default()
            .push(Subscription {
                id,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove one subscription; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let mut removed = false;
        subscribers.retain(|_, subs| {
            if !removed {
                let before = subs.len();
                subs.retain(|s| s.id != id);
                removed = subs.len() != before;
            }
            !subs.is_empty()
        });
        removed
    }

    /// Number of handlers registered for `name`
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.subscribers.lock().get(name).map_or(0, Vec::len)
    }

    /// Deliver `payload` to every handler of `name`, one at a time
    ///
    /// Handlers subscribed while a publish is running are not invoked by it.
    pub async fn publish(&self, name: &str, payload: Value) -> PublishReport {
        let handlers: Vec<Arc<dyn EventHandler>> = match self.subscribers.lock().get(name) {
            Some(subs) => subs.iter().map(|s| Arc::clone(&s.handler)).collect(),
            None => return PublishReport::default(),
        };

        let mut report = PublishReport::default();
        for (index, handler) in handlers.into_iter().enumerate() {
            let outcome = AssertUnwindSafe(handler.handle(payload.clone()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    tracing::warn!(event = %name, handler = index, error = %err, "event handler failed");
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::warn!(event = %name, handler = index, "event handler panicked");
                }
            }
        }

        tracing::debug!(
            event = %name,
            delivered = report.delivered,
            failed = report.failed,
            "event published"
        );
        report
    }
}
