//! Lifecycle Controller
//!
//! Sequences the two externally visible phases of a worker:
//!
//! - **create**: merge start arguments into the config, initialize the host,
//!   start the listener. Any failure is fatal and returned.
//! - **destroy**: `beforeDestroy` hook, listener close, `destroyed` hook.
//!   Every step runs even if an earlier one failed; the first failure is
//!   returned afterwards.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{StartArgs, WorkerConfig};
use parking_lot::RwLock;

use crate::error::{HostError, LifecycleError, LifecycleResult};

/// Host hooks invoked by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleHook {
    /// The supervisor reported the cluster ready
    Ready,
    /// Shutdown is starting; the listener is still open
    BeforeDestroy,
    /// Shutdown finished; the listener is closed
    Destroyed,
}

impl LifecycleHook {
    /// Hook name as hosts know it
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleHook::Ready => "ready",
            LifecycleHook::BeforeDestroy => "beforeDestroy",
            LifecycleHook::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason the worker is being destroyed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// The supervisor channel reached end-of-stream
    ChannelClosed,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::ChannelClosed => write!(f, "channel-closed"),
        }
    }
}

/// Handle to a running listener
#[async_trait]
pub trait ListenerHandle: Send {
    /// Stop accepting and release the listener
    async fn close(&mut self) -> Result<(), HostError>;
}

/// The application hosting this worker
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Prepare the application before it starts listening
    async fn initialize(&self, _config: &WorkerConfig) -> Result<(), HostError> {
        Ok(())
    }

    /// Start the worker's listener
    async fn listen(&self, config: &WorkerConfig) -> Result<Box<dyn ListenerHandle>, HostError>;

    /// Invoke a lifecycle hook; `signal` is set for the destroy hooks
    async fn invoke(
        &self,
        _hook: LifecycleHook,
        _signal: Option<&ShutdownSignal>,
    ) -> Result<(), HostError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Destroyed,
}

/// Drives create/destroy against a [`WorkerHost`]
pub struct LifecycleController {
    host: Arc<dyn WorkerHost>,
    config: Arc<RwLock<WorkerConfig>>,
    listener: tokio::sync::Mutex<Option<Box<dyn ListenerHandle>>>,
    phase: parking_lot::Mutex<Phase>,
}

impl LifecycleController {
    /// Create a controller sharing `config` with the runtime
    pub fn new(host: Arc<dyn WorkerHost>, config: Arc<RwLock<WorkerConfig>>) -> Self {
        Self {
            host,
            config,
            listener: tokio::sync::Mutex::new(None),
            phase: parking_lot::Mutex::new(Phase::Idle),
        }
    }

    /// Whether `create` succeeded and `destroy` has not run
    pub fn is_running(&self) -> bool {
        *self.phase.lock() == Phase::Running
    }

    /// Merge start arguments, initialize the host and start listening
    pub async fn create(&self, args: &StartArgs) -> LifecycleResult<()> {
        {
            let mut phase = self.phase.lock();
            if *phase != Phase::Idle {
                return Err(LifecycleError::AlreadyCreated);
            }
            // Claim the transition so a concurrent create fails fast
            *phase = Phase::Running;
        }

        let result = self.start(args).await;
        if result.is_err() {
            *self.phase.lock() = Phase::Idle;
        }
        result
    }

    async fn start(&self, args: &StartArgs) -> LifecycleResult<()> {
        let config = {
            let mut config = self.config.write();
            config.merge_start_args(args);
            config.clone()
        };

        self.host.initialize(&config).await.map_err(|err| {
            tracing::error!(error = %err, "worker initialization failed");
            LifecycleError::Initialize(err)
        })?;

        let handle = self.host.listen(&config).await.map_err(|err| {
            tracing::error!(error = %err, "worker listen failed");
            LifecycleError::Listen(err)
        })?;
        *self.listener.lock().await = Some(handle);

        tracing::info!(
            service = config.service.as_deref().unwrap_or("-"),
            "worker created"
        );
        Ok(())
    }

    /// Run the destroy sequence for `signal`
    pub async fn destroy(&self, signal: ShutdownSignal) -> LifecycleResult<()> {
        {
            let mut phase = self.phase.lock();
            if *phase != Phase::Running {
                return Err(LifecycleError::NotCreated);
            }
            *phase = Phase::Destroyed;
        }
        tracing::info!(%signal, "destroying worker");

        let mut first_failure = None;

        if let Err(source) = self
            .host
            .invoke(LifecycleHook::BeforeDestroy, Some(&signal))
            .await
        {
            tracing::warn!(hook = %LifecycleHook::BeforeDestroy, error = %source, "destroy hook failed");
            first_failure.get_or_insert(LifecycleError::Hook {
                hook: LifecycleHook::BeforeDestroy,
                source,
            });
        }

        if let Some(mut listener) = self.listener.lock().await.take() {
            if let Err(err) = listener.close().await {
                tracing::warn!(error = %err, "listener close failed");
                first_failure.get_or_insert(LifecycleError::Close(err));
            }
        }

        if let Err(source) = self
            .host
            .invoke(LifecycleHook::Destroyed, Some(&signal))
            .await
        {
            tracing::warn!(hook = %LifecycleHook::Destroyed, error = %source, "destroy hook failed");
            first_failure.get_or_insert(LifecycleError::Hook {
                hook: LifecycleHook::Destroyed,
                source,
            });
        }

        match first_failure {
            Some(err) => Err(err),
            None => {
                tracing::info!(%signal, "worker destroyed");
                Ok(())
            }
        }
    }
}
