//! # Courier Worker
//!
//! Message-correlation kernel of a worker process that talks to a single
//! supervisor over one duplex, order-preserving channel.
//!
//! ## Components
//!
//! - [`CorrelationTable`]: call ids, pending resolvers, reply matching, timeouts
//! - [`EventBus`]: local publish/subscribe for named events
//! - [`PluginRegistry`]: capability name to provider identities
//! - [`Dispatcher`]: routes each inbound envelope to exactly one of the above
//! - [`LifecycleController`]: create/destroy sequencing against a [`WorkerHost`]
//! - [`WorkerRuntime`]: owns all of the above plus the channel
//!
//! ## Traffic patterns
//!
//! - Fire-and-forget: [`WorkerRuntime::send`]
//! - Events: [`WorkerRuntime::subscribe`], fed by the serve loop
//! - Request/reply: [`WorkerRuntime::call`] and [`WorkerRuntime::reply`]

pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod lifecycle;
pub mod plugins;
pub mod runtime;

pub use correlation::{CorrelationTable, PendingReply};
pub use dispatcher::{Dispatched, Dispatcher, Route};
pub use error::{CallError, HandlerError, HostError, LifecycleError, LifecycleResult};
pub use event_bus::{EventBus, EventHandler, HandlerResult, PublishReport, SubscriptionId};
pub use lifecycle::{
    LifecycleController, LifecycleHook, ListenerHandle, ShutdownSignal, WorkerHost,
};
pub use plugins::PluginRegistry;
pub use runtime::{Outbox, WorkerRuntime};

pub use courier_core::{
    CallId, CallRequest, Envelope, ReplyOutcome, StartArgs, WorkerConfig, DEFAULT_CALL_TIMEOUT,
};
