//! Supervised worker process
//!
//! Speaks newline-delimited JSON envelopes with its supervisor over
//! stdin/stdout. Logs go to stderr so they never interleave with traffic.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use courier_core::{StartArgs, WorkerConfig};
use courier_transport::{Channel, JsonLinesChannel};
use courier_worker::{ShutdownSignal, WorkerRuntime};
use tracing_subscriber::EnvFilter;

mod handlers;
mod host;

use host::TcpHost;

#[derive(Parser)]
#[command(name = "courier-worker")]
#[command(about = "Worker process correlated with a supervisor over stdio", long_about = None)]
struct Cli {
    /// Working directory of the service
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Service name
    #[arg(long)]
    service: Option<String>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listener bind address, overriding the config file
    #[arg(short, long)]
    listen: Option<String>,

    /// Destination for replies to supervisor calls
    #[arg(long, default_value = "supervisor")]
    reply_to: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!("{err:#}");
            1
        }
    };

    // Tokio's stdin reader sits on a blocking thread that runtime teardown
    // would wait on until the supervisor writes again
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => WorkerConfig::load(path)
            .await
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = Some(listen);
    }

    let channel: Arc<dyn Channel> = Arc::new(JsonLinesChannel::stdio());
    let runtime = WorkerRuntime::new(Arc::clone(&channel), Arc::new(TcpHost), config);
    handlers::install(&runtime, &cli.reply_to);

    runtime
        .create(&StartArgs {
            cwd: cli.cwd,
            service: cli.service,
        })
        .await
        .context("worker failed to start")?;

    let mut serving = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.serve().await }
    });

    let (signal, finished) = tokio::select! {
        stopped = stop_signal() => {
            (stopped.context("failed to install signal handlers")?, None)
        }
        served = &mut serving => (ShutdownSignal::ChannelClosed, Some(served)),
    };

    let destroyed = runtime.destroy(signal).await;

    let served = match finished {
        Some(served) => served,
        None => serving.await,
    };
    match served {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "serve loop failed"),
        Err(err) => tracing::error!(error = %err, "serve task panicked"),
    }

    if let Err(err) = channel.close().await {
        tracing::debug!(error = %err, "closing supervisor channel failed");
    }

    destroyed.context("worker shutdown reported failures")
}

/// Wait for SIGINT or SIGTERM
async fn stop_signal() -> std::io::Result<ShutdownSignal> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => interrupted.map(|()| ShutdownSignal::Interrupt),
            _ = terminate.recv() => Ok(ShutdownSignal::Terminate),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| ShutdownSignal::Interrupt)
    }
}
