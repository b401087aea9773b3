// src/core/session/mod.rs

//! Session servers: independently running endpoints that accept many client
//! connections, broadcast periodic state and hand each inbound message to a
//! pluggable [`SessionBehavior`].

pub mod behavior;
pub mod echo;
pub mod server;
pub mod worker;

pub use behavior::SessionBehavior;
pub use echo::EchoBehavior;
pub use server::SessionServer;
pub use worker::{SessionHandle, SessionSpec, SessionWorker};

use crate::core::registry::{BroadcastReport, ConnectionRegistry};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::error;

/// The view of a running session handed to behaviors and connection handlers.
///
/// Cloning is cheap; all clones share the same registry and stop signal.
#[derive(Debug, Clone)]
pub struct SessionContext {
    id: u64,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
}

impl SessionContext {
    pub fn new(id: u64, registry: Arc<ConnectionRegistry>, shutdown: CancellationToken) -> Self {
        Self {
            id,
            registry,
            shutdown,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn client_count(&self) -> usize {
        self.registry.count()
    }

    /// False once a stop has been requested.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Resolves when a stop is requested.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    /// Sends `message` to every connection of this session.
    pub fn broadcast(&self, message: &Value) -> BroadcastReport {
        match serde_json::to_string(message) {
            Ok(text) => self.registry.broadcast(&text),
            Err(e) => {
                error!("Session {}: failed to serialize broadcast: {}", self.id, e);
                BroadcastReport::default()
            }
        }
    }
}
