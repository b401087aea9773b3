// src/core/session/behavior.rs

use super::SessionContext;
use crate::core::PartylineError;
use crate::core::registry::ConnectionInfo;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// What a session does with its traffic.
///
/// One behavior instance is shared by every connection of a session and by
/// its tick task. All calls happen on the session's own single-threaded
/// runtime, but the instance is moved there from the master, hence the
/// `Send + Sync` bound.
#[async_trait]
pub trait SessionBehavior: Send + Sync + 'static {
    /// Handles one inbound line from `conn`.
    ///
    /// `Ok(Some(reply))` is written back to that connection only. Client
    /// errors (see [`PartylineError::is_client_error`]) are answered with an
    /// `{"error": ...}` reply; any other error is logged. Neither closes the
    /// connection.
    async fn on_message(
        &self,
        session: &SessionContext,
        conn: &ConnectionInfo,
        message: &str,
    ) -> Result<Option<Value>, PartylineError>;

    /// Runs once per [`SessionBehavior::tick_interval`] while the session is
    /// running.
    async fn on_tick(&self, session: &SessionContext) -> Result<(), PartylineError>;

    fn tick_interval(&self) -> Duration {
        DEFAULT_TICK_INTERVAL
    }

    /// Human-readable kind of server, used in the master's replies.
    fn label(&self) -> &str {
        "Server"
    }
}
