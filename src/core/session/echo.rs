// src/core/session/echo.rs

//! The shipped session behavior: echo every message back to its sender and
//! broadcast a heartbeat on every tick.

use super::behavior::{DEFAULT_TICK_INTERVAL, SessionBehavior};
use super::SessionContext;
use crate::core::PartylineError;
use crate::core::registry::ConnectionInfo;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Echoes `{"message": X, ...}` back as `{..., "echo": X}`.
#[derive(Debug, Clone)]
pub struct EchoBehavior {
    tick_interval: Duration,
}

impl EchoBehavior {
    pub fn new(tick_interval: Duration) -> Self {
        Self { tick_interval }
    }

    /// Builds the echo reply for one raw message.
    pub fn echo(message: &str) -> Result<Value, PartylineError> {
        let value: Value = serde_json::from_str(message)?;
        let Value::Object(mut fields) = value else {
            return Err(PartylineError::MissingKey("message".to_string()));
        };
        let echoed = fields
            .shift_remove("message")
            .ok_or_else(|| PartylineError::MissingKey("message".to_string()))?;
        fields.insert("echo".to_string(), echoed);
        Ok(Value::Object(fields))
    }

    /// The payload broadcast on every tick.
    pub fn heartbeat() -> Value {
        json!({ "echo": "Game loop" })
    }
}

impl Default for EchoBehavior {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

#[async_trait]
impl SessionBehavior for EchoBehavior {
    async fn on_message(
        &self,
        _session: &SessionContext,
        conn: &ConnectionInfo,
        message: &str,
    ) -> Result<Option<Value>, PartylineError> {
        debug!("Echoing message from {}: {}", conn.addr, message);
        Self::echo(message).map(Some)
    }

    async fn on_tick(&self, session: &SessionContext) -> Result<(), PartylineError> {
        let report = session.broadcast(&Self::heartbeat());
        if !report.removed.is_empty() {
            debug!(
                "Session {}: heartbeat dropped {} client(s).",
                session.id(),
                report.removed.len()
            );
        }
        Ok(())
    }

    fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    fn label(&self) -> &str {
        "Echo Server"
    }
}
