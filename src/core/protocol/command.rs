// src/core/protocol/command.rs

//! Parses the master's control-channel commands out of a raw JSON line.

use crate::core::PartylineError;
use serde_json::{Map, Value};

/// A command sent by a consumer over the control channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    List,
    Create,
    /// `server_id` is kept as sent; ids that are not non-negative integers
    /// simply never match a session.
    Join { server_id: Value },
    Message { message: Value },
    Nuke,
    Stop { server_id: Value },
}

impl ControlCommand {
    /// Parses one inbound line.
    ///
    /// Malformed JSON yields `InvalidJson`; a missing, unknown or non-string
    /// `command` (and any non-object payload) yields `InvalidCommand`; a
    /// command lacking one of its required fields yields `MissingKey`.
    pub fn parse(line: &str) -> Result<Self, PartylineError> {
        let value: Value = serde_json::from_str(line)?;
        let Value::Object(mut fields) = value else {
            return Err(PartylineError::InvalidCommand);
        };
        let Some(Value::String(name)) = fields.remove("command") else {
            return Err(PartylineError::InvalidCommand);
        };

        match name.as_str() {
            "list" => Ok(ControlCommand::List),
            "create" => Ok(ControlCommand::Create),
            "join" => Ok(ControlCommand::Join {
                server_id: require(&mut fields, "server_id")?,
            }),
            "message" => Ok(ControlCommand::Message {
                message: fields.remove("message").unwrap_or(Value::Null),
            }),
            "nuke" => Ok(ControlCommand::Nuke),
            "stop" => Ok(ControlCommand::Stop {
                server_id: require(&mut fields, "server_id")?,
            }),
            _ => Err(PartylineError::InvalidCommand),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::List => "list",
            ControlCommand::Create => "create",
            ControlCommand::Join { .. } => "join",
            ControlCommand::Message { .. } => "message",
            ControlCommand::Nuke => "nuke",
            ControlCommand::Stop { .. } => "stop",
        }
    }
}

fn require(fields: &mut Map<String, Value>, key: &str) -> Result<Value, PartylineError> {
    fields
        .remove(key)
        .ok_or_else(|| PartylineError::MissingKey(key.to_string()))
}
