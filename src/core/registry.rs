// src/core/registry.rs

//! The set of live connections attached to one session server.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Identifies a connection within one session.
pub type ConnectionId = u64;

/// Number of broadcast payloads that may queue up for a single connection
/// before it is considered stuck and dropped from the registry.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// The receiving end of a connection's outbound queue, drained by its handler.
pub type OutboundReceiver = mpsc::Receiver<Arc<str>>;

/// Identity of a registered peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub addr: SocketAddr,
}

#[derive(Debug)]
struct ConnectionEntry {
    addr: SocketAddr,
    outbound: mpsc::Sender<Arc<str>>,
}

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the payload was queued for.
    pub delivered: usize,
    /// Connections that failed and were removed after the pass.
    pub removed: Vec<ConnectionId>,
}

/// Tracks live connections for one session.
///
/// The map is shared with the master thread, which only ever reads
/// [`ConnectionRegistry::count`]. Every other operation happens on the
/// session's own runtime.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_queue_capacity(OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Adds a freshly accepted connection and returns its identity together
    /// with the queue its handler must drain.
    pub fn register(&self, addr: SocketAddr) -> (ConnectionInfo, OutboundReceiver) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, rx) = mpsc::channel(self.capacity);
        self.connections
            .insert(id, ConnectionEntry { addr, outbound });
        info!(
            "Client {} connected as #{}. Total clients: {}",
            addr,
            id,
            self.count()
        );
        (ConnectionInfo { id, addr }, rx)
    }

    /// Removes a connection. Returns false if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some((_, entry)) => {
                info!(
                    "Client {} (#{}) removed. Total clients: {}",
                    entry.addr,
                    id,
                    self.count()
                );
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// A point-in-time copy of the registered connections, ordered by id.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .connections
            .iter()
            .map(|entry| ConnectionInfo {
                id: *entry.key(),
                addr: entry.value().addr,
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Queues `payload` for every connection registered when the call starts.
    ///
    /// Failures (closed or full queues) are collected during the pass and
    /// removed in a single sweep afterwards, so the iteration never observes
    /// its own removals.
    pub fn broadcast(&self, payload: &str) -> BroadcastReport {
        let targets: Vec<(ConnectionId, mpsc::Sender<Arc<str>>)> = self
            .connections
            .iter()
            .map(|entry| (*entry.key(), entry.value().outbound.clone()))
            .collect();

        let payload: Arc<str> = Arc::from(payload);
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for (id, outbound) in targets {
            match outbound.try_send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Closed(_)) => {
                    debug!("Client #{} disconnected during broadcast.", id);
                    failed.push(id);
                }
                Err(TrySendError::Full(_)) => {
                    warn!("Client #{} is not keeping up with broadcasts. Dropping it.", id);
                    failed.push(id);
                }
            }
        }

        for id in failed {
            if self.remove(id) {
                report.removed.push(id);
            }
        }
        report
    }

    /// Drops every connection, closing their outbound queues.
    pub fn clear(&self) {
        self.connections.clear();
    }
}
