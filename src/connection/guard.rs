// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use crate::core::registry::{ConnectionInfo, ConnectionRegistry};
use std::sync::Arc;
use tracing::debug;

/// An RAII guard that removes a connection from its session's registry when
/// the connection handler's scope is exited, whichever path it exits by.
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    conn: ConnectionInfo,
}

impl ConnectionGuard {
    pub(crate) fn new(registry: Arc<ConnectionRegistry>, conn: ConnectionInfo) -> Self {
        Self { registry, conn }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        // A broadcast may already have dropped the entry.
        if !self.registry.remove(self.conn.id) {
            debug!(
                "Client {} (#{}) was already gone from the registry upon cleanup.",
                self.conn.addr, self.conn.id
            );
        }
    }
}
