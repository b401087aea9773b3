// src/server/mod.rs

//! The master process: accepts control connections and hands their commands
//! to the orchestrator.

use crate::config::Config;
use anyhow::Result;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod connection_loop;
mod context;
mod initialization;
mod stream;

pub use context::ServerContext;
pub use initialization::setup;
pub use stream::AnyStream;

/// The main server startup function. Runs until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let ctx = setup(config).await?;
    spawn_signal_watcher(ctx.shutdown_token())?;
    serve(ctx).await;
    Ok(())
}

/// Runs the accept loop on an already initialized context until its
/// shutdown token is cancelled.
pub async fn serve(ctx: ServerContext) {
    connection_loop::run(ctx).await;
}

fn spawn_signal_watcher(shutdown: CancellationToken) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
            _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
    Ok(())
}
