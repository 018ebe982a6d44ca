//! TCP-backed worker host
//!
//! The worker's listener is a plain TCP socket. Each accepted connection
//! receives one JSON status line and is closed.

use std::net::SocketAddr;

use async_trait::async_trait;
use courier_core::WorkerConfig;
use courier_worker::{HostError, LifecycleHook, ListenerHandle, ShutdownSignal, WorkerHost};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Listen address used when neither the config nor the CLI sets one
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:0";

/// Host that serves a status socket
#[derive(Debug, Default)]
pub struct TcpHost;

#[async_trait]
impl WorkerHost for TcpHost {
    async fn initialize(&self, config: &WorkerConfig) -> Result<(), HostError> {
        if let Some(cwd) = &config.cwd {
            let metadata = tokio::fs::metadata(cwd).await?;
            if !metadata.is_dir() {
                return Err(HostError::new(format!(
                    "{} is not a directory",
                    cwd.display()
                )));
            }
        }
        Ok(())
    }

    async fn listen(&self, config: &WorkerConfig) -> Result<Box<dyn ListenerHandle>, HostError> {
        let addr = config.listen.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR);
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "listener bound");

        let service = config.service.clone().unwrap_or_default();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, service, stop_rx));

        Ok(Box::new(TcpListenerHandle {
            local_addr,
            stop_tx,
            task: Some(task),
        }))
    }

    async fn invoke(
        &self,
        hook: LifecycleHook,
        signal: Option<&ShutdownSignal>,
    ) -> Result<(), HostError> {
        match signal {
            Some(signal) => tracing::info!(%hook, %signal, "lifecycle hook"),
            None => tracing::info!(%hook, "lifecycle hook"),
        }
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, service: String, mut stop_rx: watch::Receiver<bool>) {
    loop {
        let accepted = tokio::select! {
            _ = stop_rx.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((mut stream, peer)) => {
                tracing::debug!(%peer, "status connection");
                let mut line = json!({ "service": service }).to_string();
                line.push('\n');
                tokio::spawn(async move {
                    if let Err(err) = stream.write_all(line.as_bytes()).await {
                        tracing::debug!(%peer, error = %err, "status write failed");
                    }
                });
            }
            Err(err) => tracing::warn!(error = %err, "accept failed"),
        }
    }
}

/// Running accept loop; closing stops it and releases the socket
pub struct TcpListenerHandle {
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl ListenerHandle for TcpListenerHandle {
    async fn close(&mut self) -> Result<(), HostError> {
        self.stop_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|err| HostError::new(format!("accept loop failed: {err}")))?;
        }
        tracing::info!(local_addr = %self.local_addr, "listener closed");
        Ok(())
    }
}
