//! Inbound Envelope Dispatcher
//!
//! Classifies each inbound envelope on its own and routes it to exactly one
//! destination, checked in this order:
//!
//! 1. `agent:plugins`  → plugin registry
//! 2. `cluster:ready`  → host `ready` hook
//! 3. decimal integer  → correlation table (unknown ids are dropped)
//! 4. anything else    → event bus, under the action as event name
//!
//! Classification is total: a malformed action is just an event name.

use std::sync::Arc;

use courier_core::{
    CallId, Envelope, PluginAnnouncement, ReplyOutcome, CLUSTER_READY_ACTION, PLUGINS_ACTION,
};

use crate::correlation::CorrelationTable;
use crate::event_bus::{EventBus, PublishReport};
use crate::lifecycle::{LifecycleHook, WorkerHost};
use crate::plugins::PluginRegistry;

/// Where an envelope goes, decided from its action alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Plugin capability announcement
    PluginAnnouncement,
    /// Cluster-ready control signal
    ClusterReady,
    /// Reply to call `CallId`
    Reply(CallId),
    /// Event for the local bus
    Event,
}

impl Route {
    /// Classify an action string
    pub fn classify(action: &str) -> Self {
        if action == PLUGINS_ACTION {
            Route::PluginAnnouncement
        } else if action == CLUSTER_READY_ACTION {
            Route::ClusterReady
        } else if let Some(id) = CallId::from_action(action) {
            Route::Reply(id)
        } else {
            Route::Event
        }
    }
}

/// What dispatching one envelope did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Registry updated; count of newly recorded (capability, provider) pairs
    Plugins {
        /// Newly recorded pairs
        added: usize,
    },
    /// Plugin announcement body could not be read
    MalformedAnnouncement,
    /// Ready hook invoked; `false` if the host reported a failure
    Ready {
        /// Whether the hook succeeded
        ok: bool,
    },
    /// Reply handled; `matched` is false for late or unknown ids
    Reply {
        /// Reply id
        id: CallId,
        /// Whether a pending call was completed
        matched: bool,
    },
    /// Event published
    Event(PublishReport),
}

/// Routes inbound envelopes to the runtime's components
#[derive(Clone)]
pub struct Dispatcher {
    correlation: Arc<CorrelationTable>,
    events: Arc<EventBus>,
    plugins: Arc<PluginRegistry>,
    host: Arc<dyn WorkerHost>,
}

impl Dispatcher {
    /// Create a dispatcher over the runtime's components
    pub fn new(
        correlation: Arc<CorrelationTable>,
        events: Arc<EventBus>,
        plugins: Arc<PluginRegistry>,
        host: Arc<dyn WorkerHost>,
    ) -> Self {
        Self {
            correlation,
            events,
            plugins,
            host,
        }
    }

    /// Route one envelope
    pub async fn dispatch(&self, envelope: Envelope) -> Dispatched {
        let Envelope { action, body, .. } = envelope;

        match Route::classify(&action) {
            Route::PluginAnnouncement => {
                match serde_json::from_value::<PluginAnnouncement>(body) {
                    Ok(announcement) => Dispatched::Plugins {
                        added: self
                            .plugins
                            .register(&announcement.name, announcement.plugins),
                    },
                    Err(err) => {
                        tracing::warn!(error = %err, "ignoring malformed plugin announcement");
                        Dispatched::MalformedAnnouncement
                    }
                }
            }
            Route::ClusterReady => {
                tracing::debug!("cluster ready");
                match self.host.invoke(LifecycleHook::Ready, None).await {
                    Ok(()) => Dispatched::Ready { ok: true },
                    Err(err) => {
                        tracing::warn!(hook = %LifecycleHook::Ready, error = %err, "ready hook failed");
                        Dispatched::Ready { ok: false }
                    }
                }
            }
            Route::Reply(id) => Dispatched::Reply {
                id,
                matched: self.correlation.resolve(id, ReplyOutcome::from_body(&body)),
            },
            Route::Event => Dispatched::Event(self.events.publish(&action, body).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use crate::lifecycle::{ListenerHandle, ShutdownSignal};
    use async_trait::async_trait;
    use courier_core::WorkerConfig;
    use courier_transport::MemoryChannel;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingHost {
        ready: AtomicUsize,
    }

    #[async_trait]
    impl WorkerHost for CountingHost {
        async fn listen(&self, _: &WorkerConfig) -> Result<Box<dyn ListenerHandle>, HostError> {
            Err(HostError::new("not used"))
        }

        async fn invoke(
            &self,
            hook: LifecycleHook,
            _signal: Option<&ShutdownSignal>,
        ) -> Result<(), HostError> {
            if hook == LifecycleHook::Ready {
                self.ready.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        correlation: Arc<CorrelationTable>,
        events: Arc<EventBus>,
        plugins: Arc<PluginRegistry>,
        host: Arc<CountingHost>,
    }

    fn fixture() -> Fixture {
        let correlation = Arc::new(CorrelationTable::default());
        let events = Arc::new(EventBus::new());
        let plugins = Arc::new(PluginRegistry::new());
        let host = Arc::new(CountingHost::default());
        let dispatcher = Dispatcher::new(
            Arc::clone(&correlation),
            Arc::clone(&events),
            Arc::clone(&plugins),
            host.clone(),
        );
        Fixture {
            dispatcher,
            correlation,
            events,
            plugins,
            host,
        }
    }

    #[test]
    fn classification_order() {
        assert_eq!(Route::classify("agent:plugins"), Route::PluginAnnouncement);
        assert_eq!(Route::classify("cluster:ready"), Route::ClusterReady);
        assert_eq!(Route::classify("12"), Route::Reply(CallId::new(12)));
        assert_eq!(Route::classify("user:login"), Route::Event);
        assert_eq!(Route::classify("1e3"), Route::Event);
        assert_eq!(Route::classify(""), Route::Event);
    }

    #[tokio::test]
    async fn announcements_register_without_duplicates() {
        let fx = fixture();
        let first = Envelope::new(
            "w",
            PLUGINS_ACTION,
            json!({ "name": "workerA", "plugins": ["cache", "auth"] }),
        );
        let second = Envelope::new(
            "w",
            PLUGINS_ACTION,
            json!({ "name": "workerA", "plugins": ["cache"] }),
        );

        assert_eq!(fx.dispatcher.dispatch(first).await, Dispatched::Plugins { added: 2 });
        assert_eq!(fx.dispatcher.dispatch(second).await, Dispatched::Plugins { added: 0 });
        assert_eq!(fx.plugins.providers("cache"), vec!["workerA"]);
        assert_eq!(fx.plugins.providers("auth"), vec!["workerA"]);
    }

    #[tokio::test]
    async fn malformed_announcement_is_ignored() {
        let fx = fixture();
        let env = Envelope::new("w", PLUGINS_ACTION, json!({ "plugins": ["cache"] }));
        assert_eq!(fx.dispatcher.dispatch(env).await, Dispatched::MalformedAnnouncement);
        assert!(fx.plugins.capabilities().is_empty());
    }

    #[tokio::test]
    async fn cluster_ready_invokes_host() {
        let fx = fixture();
        let env = Envelope::new("w", CLUSTER_READY_ACTION, Value::Null);
        assert_eq!(fx.dispatcher.dispatch(env).await, Dispatched::Ready { ok: true });
        assert_eq!(fx.host.ready.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reply_resolves_pending_call_once() {
        let fx = fixture();
        let (worker, _supervisor) = MemoryChannel::pair();
        let mut pending = Vec::new();
        for _ in 0..3 {
            pending.push(
                fx.correlation
                    .begin(&worker, "sup", "work", json!(null), Duration::from_secs(1))
                    .await
                    .unwrap(),
            );
        }
        let third = pending.pop().unwrap();
        assert_eq!(third.id(), CallId::new(3));

        let reply = Envelope::new("w", "3", json!({ "data": "ok" }));
        assert_eq!(
            fx.dispatcher.dispatch(reply.clone()).await,
            Dispatched::Reply { id: CallId::new(3), matched: true }
        );
        assert_eq!(
            fx.dispatcher.dispatch(reply).await,
            Dispatched::Reply { id: CallId::new(3), matched: false }
        );
        assert_eq!(third.wait().await.unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn unknown_reply_is_dropped_not_published() {
        let fx = fixture();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        fx.events.subscribe("99", move |_payload: Value| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), crate::error::HandlerError>(()) }
        });

        let env = Envelope::new("w", "99", json!({ "data": 1 }));
        assert_eq!(
            fx.dispatcher.dispatch(env).await,
            Dispatched::Reply { id: CallId::new(99), matched: false }
        );
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn other_actions_are_published() {
        let fx = fixture();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        fx.events.subscribe("user:login", move |payload: Value| {
            sink.lock().push(payload);
            async { Ok::<(), crate::error::HandlerError>(()) }
        });

        let env = Envelope::new("w", "user:login", json!({ "id": 4 }));
        let outcome = fx.dispatcher.dispatch(env).await;
        assert_eq!(
            outcome,
            Dispatched::Event(PublishReport { delivered: 1, failed: 0 })
        );
        assert_eq!(*seen.lock(), vec![json!({ "id": 4 })]);
    }
}
