// src/core/errors.rs

//! Defines the primary error type for the entire application.

use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within partyline.
///
/// Variants that describe malformed client input carry the exact wording that
/// is sent back over the wire, see [`PartylineError::to_reply`].
#[derive(Error, Debug, Clone)]
pub enum PartylineError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Invalid JSON format")]
    InvalidJson,

    #[error("Missing key: '{0}'")]
    MissingKey(String),

    #[error("Invalid command")]
    InvalidCommand,

    #[error("Server not found")]
    SessionNotFound,

    #[error("Line exceeds maximum length of {0} bytes")]
    LineTooLong(usize),

    #[error("Invalid UTF-8 in frame")]
    InvalidUtf8,

    #[error("Not connected")]
    NotConnected,

    #[error("Failed to create server: {0}")]
    Spawn(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl PartylineError {
    /// Renders the error as the `{"error": ...}` object sent to peers.
    pub fn to_reply(&self) -> Value {
        json!({ "error": self.to_string() })
    }

    /// Returns true for errors a peer can cause with a bad message, which are
    /// answered in-band instead of closing the connection.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PartylineError::InvalidJson
                | PartylineError::MissingKey(_)
                | PartylineError::InvalidCommand
                | PartylineError::SessionNotFound
        )
    }

    /// Returns true if the error is an I/O error caused by the peer going away.
    pub fn is_normal_disconnect(&self) -> bool {
        matches!(self, PartylineError::Io(e) if matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionAborted
        ))
    }
}

impl From<std::io::Error> for PartylineError {
    fn from(e: std::io::Error) -> Self {
        PartylineError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for PartylineError {
    fn from(_: serde_json::Error) -> Self {
        PartylineError::InvalidJson
    }
}
