//! Worker Runtime
//!
//! Owns one instance of every kernel component and the channel to the
//! supervisor. Nothing here is global: two runtimes in one process are fully
//! independent.
//!
//! The serve loop reads envelopes in order. Replies are resolved inline by
//! the reader. Everything else is handed to a single delivery task that
//! dispatches strictly in arrival order, so an event handler awaiting a call
//! never blocks the reply it is waiting for.

use std::sync::Arc;
use std::time::Duration;

use courier_core::{CallId, Envelope, StartArgs, WorkerConfig};
use courier_transport::{Channel, TransportError, TransportResult};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::correlation::{CorrelationTable, PendingReply};
use crate::dispatcher::{Dispatched, Dispatcher, Route};
use crate::error::{CallError, LifecycleResult};
use crate::event_bus::{EventBus, EventHandler, SubscriptionId};
use crate::lifecycle::{LifecycleController, ShutdownSignal, WorkerHost};
use crate::plugins::PluginRegistry;

/// Outbound half of the runtime
///
/// Cheap to clone. Event handlers should capture an `Outbox` rather than the
/// runtime itself so the runtime does not keep itself alive.
#[derive(Clone)]
pub struct Outbox {
    channel: Arc<dyn Channel>,
    correlation: Arc<CorrelationTable>,
    config: Arc<RwLock<WorkerConfig>>,
}

impl Outbox {
    /// Fire-and-forget notification
    pub async fn send(
        &self,
        to: impl Into<String>,
        action: impl Into<String>,
        body: Value,
    ) -> TransportResult<()> {
        self.channel.send_raw(Envelope::new(to, action, body)).await
    }

    /// Issue a call and wait for its reply
    ///
    /// `timeout` falls back to `agent_timeout`, then to 3000 ms.
    pub async fn call(
        &self,
        to: impl Into<String>,
        event: impl Into<String>,
        data: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, CallError> {
        self.begin_call(to, event, data, timeout).await?.wait().await
    }

    /// Issue a call and return its outstanding result
    pub async fn begin_call(
        &self,
        to: impl Into<String>,
        event: impl Into<String>,
        data: Value,
        timeout: Option<Duration>,
    ) -> Result<PendingReply, CallError> {
        let timeout = self.config.read().call_timeout(timeout);
        self.correlation
            .begin(self.channel.as_ref(), to, event, data, timeout)
            .await
    }

    /// Answer an inbound call with a value or an error message
    pub async fn reply(
        &self,
        to: impl Into<String>,
        id: CallId,
        result: Result<Value, String>,
    ) -> TransportResult<()> {
        self.channel.send_raw(Envelope::reply(to, id, result)).await
    }
}

/// One worker's correlation kernel
#[derive(Clone)]
pub struct WorkerRuntime {
    outbox: Outbox,
    events: Arc<EventBus>,
    plugins: Arc<PluginRegistry>,
    dispatcher: Dispatcher,
    lifecycle: Arc<LifecycleController>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl WorkerRuntime {
    /// Build a runtime over `channel`, hosted by `host`
    pub fn new(channel: Arc<dyn Channel>, host: Arc<dyn WorkerHost>, config: WorkerConfig) -> Self {
        let correlation = Arc::new(CorrelationTable::new(config.max_pending_calls));
        let config = Arc::new(RwLock::new(config));
        let events = Arc::new(EventBus::new());
        let plugins = Arc::new(PluginRegistry::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&correlation),
            Arc::clone(&events),
            Arc::clone(&plugins),
            Arc::clone(&host),
        );
        let lifecycle = Arc::new(LifecycleController::new(host, Arc::clone(&config)));
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        Self {
            outbox: Outbox {
                channel,
                correlation,
                config,
            },
            events,
            plugins,
            dispatcher,
            lifecycle,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Clone of the outbound half
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Fire-and-forget notification
    pub async fn send(
        &self,
        to: impl Into<String>,
        action: impl Into<String>,
        body: Value,
    ) -> TransportResult<()> {
        self.outbox.send(to, action, body).await
    }

    /// Issue a call and wait for its reply
    pub async fn call(
        &self,
        to: impl Into<String>,
        event: impl Into<String>,
        data: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, CallError> {
        self.outbox.call(to, event, data, timeout).await
    }

    /// Issue a call and return its outstanding result
    pub async fn begin_call(
        &self,
        to: impl Into<String>,
        event: impl Into<String>,
        data: Value,
        timeout: Option<Duration>,
    ) -> Result<PendingReply, CallError> {
        self.outbox.begin_call(to, event, data, timeout).await
    }

    /// Answer an inbound call
    pub async fn reply(
        &self,
        to: impl Into<String>,
        id: CallId,
        result: Result<Value, String>,
    ) -> TransportResult<()> {
        self.outbox.reply(to, id, result).await
    }

    /// Subscribe to events named `name`
    pub fn subscribe<H>(&self, name: impl Into<String>, handler: H) -> SubscriptionId
    where
        H: EventHandler + 'static,
    {
        self.events.subscribe(name, handler)
    }

    /// Remove a subscription
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// The plugin capability registry
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// The local event bus
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The correlation table
    pub fn correlation(&self) -> &CorrelationTable {
        &self.outbox.correlation
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> WorkerConfig {
        self.outbox.config.read().clone()
    }

    /// Dispatch one inbound envelope directly, bypassing the serve loop
    pub async fn dispatch(&self, envelope: Envelope) -> Dispatched {
        self.dispatcher.dispatch(envelope).await
    }

    /// Merge start arguments, initialize the host and start listening
    pub async fn create(&self, args: &StartArgs) -> LifecycleResult<()> {
        self.lifecycle.create(args).await
    }

    /// Run the destroy sequence, then stop serving
    pub async fn destroy(&self, signal: ShutdownSignal) -> LifecycleResult<()> {
        let result = self.lifecycle.destroy(signal).await;
        self.shutdown();
        result
    }

    /// Ask the serve loop to stop
    ///
    /// Sticky: a request made before `serve` starts still stops it.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Read and dispatch envelopes until the channel closes or shutdown
    ///
    /// Malformed frames are logged and skipped. When the loop ends, queued
    /// events are still delivered and every outstanding call fails with
    /// [`CallError::Closed`].
    pub async fn serve(&self) -> TransportResult<()> {
        let channel = Arc::clone(&self.outbox.channel);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<Envelope>();

        let dispatcher = self.dispatcher.clone();
        let delivery = tokio::spawn(async move {
            while let Some(envelope) = delivery_rx.recv().await {
                dispatcher.dispatch(envelope).await;
            }
        });

        tracing::info!(channel = channel.channel_type(), "worker serving");

        let result = loop {
            if *shutdown_rx.borrow_and_update() {
                break Ok(());
            }
            let next = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    continue;
                }
                next = channel.recv() => next,
            };

            match next {
                Ok(Some(envelope)) => {
                    tracing::trace!(action = %envelope.action, "envelope received");
                    if let Route::Reply(_) = Route::classify(&envelope.action) {
                        self.dispatcher.dispatch(envelope).await;
                    } else if delivery_tx.send(envelope).is_err() {
                        tracing::warn!("delivery task stopped; ending serve loop");
                        break Ok(());
                    }
                }
                Ok(None) => {
                    tracing::info!("supervisor channel closed");
                    break Ok(());
                }
                Err(TransportError::Codec(err)) => {
                    tracing::warn!(error = %err, "skipping malformed envelope");
                }
                Err(err) => {
                    tracing::error!(error = %err, "channel receive failed");
                    break Err(err);
                }
            }
        };

        drop(delivery_tx);
        // No reply can arrive any more; fail waiters before draining events
        self.outbox.correlation.close_all();
        if let Err(err) = delivery.await {
            tracing::warn!(error = %err, "delivery task ended abnormally");
        }

        tracing::info!("worker stopped serving");
        result
    }
}
