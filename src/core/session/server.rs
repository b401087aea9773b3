// src/core/session/server.rs

//! The accept loop, tick task and shutdown sequence of one session server.

use super::{SessionBehavior, SessionContext};
use crate::connection::SessionConnectionHandler;
use crate::core::registry::ConnectionRegistry;
use futures::FutureExt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long connection handlers get to finish after a stop request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A bound, not yet running, session server.
pub struct SessionServer {
    listener: TcpListener,
    context: SessionContext,
    behavior: Arc<dyn SessionBehavior>,
}

impl SessionServer {
    /// Binds the listening socket. Nothing is accepted until [`run`](Self::run).
    pub async fn bind(
        id: u64,
        host: &str,
        port: u16,
        behavior: Arc<dyn SessionBehavior>,
        registry: Arc<ConnectionRegistry>,
        shutdown: CancellationToken,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        Ok(Self {
            listener,
            context: SessionContext::new(id, registry, shutdown),
            behavior,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Serves connections until the session's stop signal fires, then waits
    /// briefly for every handler and the tick task to wind down.
    pub async fn run(self) {
        let Self {
            listener,
            context,
            behavior,
        } = self;
        let id = context.id();
        match listener.local_addr() {
            Ok(addr) => info!("Session {} started on tcp://{}", id, addr),
            Err(_) => info!("Session {} started.", id),
        }

        let mut tick_task = tokio::spawn(run_tick_loop(behavior.clone(), context.clone()));
        let mut client_tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = context.stopped() => {
                    info!("Session {} received stop signal.", id);
                    break;
                }

                res = listener.accept() => {
                    match res {
                        Ok((socket, addr)) => {
                            if let Err(e) = socket.set_nodelay(true) {
                                debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                            }
                            let (conn, outbound_rx) = context.registry().register(addr);
                            let handler = SessionConnectionHandler::new(
                                socket,
                                conn,
                                outbound_rx,
                                context.clone(),
                                behavior.clone(),
                            );
                            client_tasks.spawn(handler.run());
                        }
                        Err(e) => error!("Session {}: failed to accept connection: {}", id, e),
                    }
                }

                Some(res) = client_tasks.join_next() => {
                    if let Err(e) = res
                        && e.is_panic()
                    {
                        error!("Session {}: a client handler panicked: {e:?}", id);
                    }
                }
            }
        }

        drop(listener);

        let drained = time::timeout(SHUTDOWN_GRACE, async {
            while client_tasks.join_next().await.is_some() {}
            let _ = (&mut tick_task).await;
        })
        .await;
        if drained.is_err() {
            warn!("Session {}: timed out waiting for tasks to finish. Aborting them.", id);
            client_tasks.shutdown().await;
            tick_task.abort();
        }

        context.registry().clear();
        info!("Session {} shut down.", id);
    }
}

/// Runs the behavior's periodic task until the session stops.
async fn run_tick_loop(behavior: Arc<dyn SessionBehavior>, context: SessionContext) {
    // `interval_at` panics on a zero period.
    let period = behavior.tick_interval().max(Duration::from_millis(1));
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = context.stopped() => break,
            _ = interval.tick() => {
                match AssertUnwindSafe(behavior.on_tick(&context)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Session {}: tick failed: {}", context.id(), e),
                    Err(_) => error!("Session {}: tick panicked.", context.id()),
                }
            }
        }
    }
    debug!("Session {}: tick loop stopped.", context.id());
}
