// src/server/context.rs

use crate::core::orchestrator::Orchestrator;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

/// Holds all the initialized state required to run the master's main loop.
pub struct ServerContext {
    pub orchestrator: Arc<Orchestrator>,
    pub listener: TcpListener,
    pub acceptor: Option<TlsAcceptor>,
    pub shutdown: CancellationToken,
}

impl ServerContext {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A token that stops the main loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
