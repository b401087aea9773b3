// src/core/orchestrator/mod.rs

//! The master orchestrator: creates session servers on demand, keeps track
//! of them, routes consumers to them and tears them down.

pub mod commands;
pub mod registry;

pub use registry::SessionRegistry;

use crate::config::SessionConfig;
use crate::core::PartylineError;
use crate::core::session::{EchoBehavior, SessionBehavior, SessionHandle, SessionSpec, SessionWorker};
use futures::future::join_all;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

/// Builds the behavior for a new session, given its id.
pub type BehaviorFactory = Arc<dyn Fn(u64) -> Arc<dyn SessionBehavior> + Send + Sync>;

/// Owns every session spawned by this master.
pub struct Orchestrator {
    host: String,
    settings: SessionConfig,
    sessions: SessionRegistry,
    factory: BehaviorFactory,
}

impl Orchestrator {
    /// An orchestrator that runs [`EchoBehavior`] sessions.
    pub fn new(host: impl Into<String>, settings: SessionConfig) -> Self {
        let tick_interval = settings.tick_interval;
        let factory: BehaviorFactory = Arc::new(move |_id: u64| {
            Arc::new(EchoBehavior::new(tick_interval)) as Arc<dyn SessionBehavior>
        });
        Self::with_factory(host, settings, factory)
    }

    pub fn with_factory(
        host: impl Into<String>,
        settings: SessionConfig,
        factory: BehaviorFactory,
    ) -> Self {
        Self {
            host: host.into(),
            settings,
            sessions: SessionRegistry::new(),
            factory,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn settings(&self) -> &SessionConfig {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// The `list` reply: every session with its address and client count.
    pub fn list(&self) -> Value {
        let servers: Vec<Value> = self
            .sessions
            .snapshot()
            .iter()
            .map(|handle| {
                json!({
                    "id": handle.id(),
                    "address": handle.address(),
                    "clients": handle.client_count(),
                })
            })
            .collect();
        json!({ "servers": servers })
    }

    /// Spawns a new session on its own thread and registers it once it is
    /// listening. The id is consumed even if startup fails.
    pub async fn create(&self) -> Result<Arc<SessionHandle>, PartylineError> {
        let id = self.sessions.allocate_id();
        let port = self.port_for(id)?;
        let behavior = (self.factory)(id);
        let spec = SessionSpec {
            id,
            host: self.host.clone(),
            port,
        };

        let handle = Arc::new(SessionWorker::spawn(spec, behavior).await?);
        self.sessions.insert(handle.clone());
        info!(
            "Created session {} at {} ({} running).",
            id,
            handle.address(),
            self.sessions.len()
        );
        Ok(handle)
    }

    /// Looks up a session. Never creates one.
    pub fn join(&self, server_id: &Value) -> Result<Arc<SessionHandle>, PartylineError> {
        server_id
            .as_u64()
            .and_then(|id| self.sessions.get(id))
            .ok_or(PartylineError::SessionNotFound)
    }

    /// Stops one session, waiting up to the configured bound, and forgets it.
    pub async fn stop(&self, server_id: &Value) -> Result<Arc<SessionHandle>, PartylineError> {
        let handle = self.join(server_id)?;
        self.stop_all(vec![handle.clone()]).await;
        Ok(handle)
    }

    /// Stops every registered session and empties the registry. Returns how
    /// many sessions were torn down.
    pub async fn nuke(&self) -> usize {
        let targets = self.sessions.snapshot();
        let count = targets.len();
        self.stop_all(targets).await;
        count
    }

    async fn stop_all(&self, targets: Vec<Arc<SessionHandle>>) {
        // Signal everyone first so the sessions wind down in parallel.
        for handle in &targets {
            handle.request_stop();
        }
        let timeout = self.settings.stop_timeout;
        let outcomes = join_all(targets.iter().map(|handle| handle.stop(timeout))).await;

        for (handle, confirmed) in targets.iter().zip(outcomes) {
            if confirmed {
                info!("Stopped server {}", handle.id());
            } else {
                warn!(
                    "Server {} did not confirm shutdown within {:?}; forgetting it anyway.",
                    handle.id(),
                    timeout
                );
            }
            self.sessions.remove(handle.id());
        }
    }

    fn port_for(&self, id: u64) -> Result<u16, PartylineError> {
        if self.settings.base_port == 0 {
            return Ok(0);
        }
        u64::from(self.settings.base_port)
            .checked_add(id)
            .and_then(|port| u16::try_from(port).ok())
            .ok_or_else(|| {
                PartylineError::Spawn(format!(
                    "port {} + {} is out of range",
                    self.settings.base_port, id
                ))
            })
    }
}
