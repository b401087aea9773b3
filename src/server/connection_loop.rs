// src/server/connection_loop.rs

//! Contains the master's loop for accepting control connections and its
//! graceful shutdown.

use super::context::ServerContext;
use super::stream::AnyStream;
use crate::connection::ControlHandler;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// How long control connections get to finish once shutdown starts.
const CLIENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts control connections until the context's shutdown token fires,
/// then stops every session the master spawned.
pub async fn run(ctx: ServerContext) {
    let mut client_tasks = JoinSet::new();

    match ctx.local_addr() {
        Ok(addr) => info!(
            "Main server started on {}://{}",
            if ctx.acceptor.is_some() { "tls" } else { "tcp" },
            addr
        ),
        Err(e) => warn!("Main server started, but its address is unknown: {}", e),
    }

    loop {
        tokio::select! {
            biased;

            _ = ctx.shutdown.cancelled() => {
                info!("Shutdown requested. No longer accepting control connections.");
                break;
            }

            res = ctx.listener.accept() => {
                let (socket, addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                info!("Accepted control connection from: {}", addr);

                let orchestrator = ctx.orchestrator.clone();
                let shutdown = ctx.shutdown.clone();
                let acceptor = ctx.acceptor.clone();
                client_tasks.spawn(async move {
                    let stream = match acceptor {
                        Some(acceptor) => match acceptor.accept(socket).await {
                            Ok(tls_stream) => AnyStream::Tls(Box::new(tls_stream)),
                            Err(e) => {
                                warn!("TLS handshake error for {addr}: {e}");
                                return;
                            }
                        },
                        None => AnyStream::Tcp(socket),
                    };
                    let mut handler = ControlHandler::new(stream, addr, orchestrator, shutdown);
                    if let Err(e) = handler.run().await {
                        warn!("Control connection from {} terminated unexpectedly: {}", addr, e);
                    }
                });
            }

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A control connection handler panicked: {e:?}");
                }
            }
        }
    }

    if tokio::time::timeout(CLIENT_DRAIN_TIMEOUT, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for control connections to close.");
        client_tasks.shutdown().await;
    }
    info!("All control connections closed.");

    let stopped = ctx.orchestrator.nuke().await;
    info!("Stopped {} session(s). Main server shutdown complete.", stopped);
}
