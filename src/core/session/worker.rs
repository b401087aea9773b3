// src/core/session/worker.rs

//! Spawns session servers onto their own OS thread and single-threaded
//! runtime, and hands back a [`SessionHandle`] for the master to track them.

use super::{SessionBehavior, SessionServer};
use crate::core::PartylineError;
use crate::core::registry::ConnectionRegistry;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where and as what a new session should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    pub id: u64,
    pub host: String,
    /// `0` lets the OS pick a free port.
    pub port: u16,
}

/// The master's handle on a running session.
///
/// It can report liveness and client count, and request a stop. It never
/// touches the session's internals directly; the stop goes through a
/// cancellation token the session observes at every suspension point.
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    host: String,
    local_addr: SocketAddr,
    label: String,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    stopped: watch::Receiver<bool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port actually bound, which differs from the requested one only
    /// when `0` was requested.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn address(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn client_count(&self) -> usize {
        self.registry.count()
    }

    /// True until the session's thread has finished.
    pub fn is_running(&self) -> bool {
        if *self.stopped.borrow() {
            return false;
        }
        match self.thread.lock().as_ref() {
            Some(thread) => !thread.is_finished(),
            None => false,
        }
    }

    /// Signals the session to stop without waiting for it.
    pub fn request_stop(&self) {
        self.shutdown.cancel();
    }

    /// Signals the session to stop and waits up to `timeout` for its thread
    /// to confirm. Returns false if the confirmation did not arrive in time.
    pub async fn stop(&self, timeout: Duration) -> bool {
        self.request_stop();
        let mut stopped = self.stopped.clone();
        // A dropped sender means the thread is gone, which counts as stopped.
        let confirmed = tokio::time::timeout(timeout, stopped.wait_for(|done| *done))
            .await
            .is_ok();
        if confirmed {
            self.reap();
        }
        confirmed
    }

    fn reap(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if thread.is_finished() {
            if thread.join().is_err() {
                error!("Session {} thread panicked.", self.id);
            }
        } else {
            // The confirmation is sent just before the thread returns; leave
            // it detached rather than block the caller's runtime.
            debug!("Session {} confirmed stop; detaching its thread.", self.id);
        }
    }
}

/// Spawns session servers.
pub struct SessionWorker;

impl SessionWorker {
    /// Starts `behavior` on a dedicated thread and runtime, and waits until
    /// the session has bound its socket (or failed to).
    pub async fn spawn(
        spec: SessionSpec,
        behavior: Arc<dyn SessionBehavior>,
    ) -> Result<SessionHandle, PartylineError> {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let label = behavior.label().to_string();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<SocketAddr, PartylineError>>();
        let (stopped_tx, stopped_rx) = watch::channel(false);

        let thread = {
            let spec = spec.clone();
            let registry = registry.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name(format!("session-{}", spec.id))
                .spawn(move || {
                    run_session_thread(spec, behavior, registry, shutdown, ready_tx);
                    let _ = stopped_tx.send(true);
                })
                .map_err(|e| PartylineError::Spawn(e.to_string()))?
        };

        let local_addr = match ready_rx.await {
            Ok(Ok(addr)) => addr,
            Ok(Err(e)) => {
                // The thread is already on its way out.
                drop(thread);
                return Err(e);
            }
            Err(_) => {
                return Err(PartylineError::Spawn(
                    "session thread exited before binding".to_string(),
                ));
            }
        };

        Ok(SessionHandle {
            id: spec.id,
            host: spec.host,
            local_addr,
            label,
            registry,
            shutdown,
            stopped: stopped_rx,
            thread: Mutex::new(Some(thread)),
        })
    }
}

/// Body of a session's thread: build a current-thread runtime, bind, report
/// readiness, serve until stopped.
fn run_session_thread(
    spec: SessionSpec,
    behavior: Arc<dyn SessionBehavior>,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    ready_tx: oneshot::Sender<Result<SocketAddr, PartylineError>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready_tx.send(Err(PartylineError::Spawn(format!(
                "failed to build session runtime: {e}"
            ))));
            return;
        }
    };

    runtime.block_on(async move {
        let bound =
            SessionServer::bind(spec.id, &spec.host, spec.port, behavior, registry, shutdown).await;
        let server = match bound {
            Ok(server) => server,
            Err(e) => {
                warn!("Session {} failed to bind {}:{}: {}", spec.id, spec.host, spec.port, e);
                let _ = ready_tx.send(Err(PartylineError::Spawn(format!(
                    "could not bind {}:{}: {}",
                    spec.host, spec.port, e
                ))));
                return;
            }
        };
        match server.local_addr() {
            Ok(addr) => {
                if ready_tx.send(Ok(addr)).is_err() {
                    info!("Session {}: creator went away before startup finished.", spec.id);
                    return;
                }
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e.into()));
                return;
            }
        }
        server.run().await;
    });
}
