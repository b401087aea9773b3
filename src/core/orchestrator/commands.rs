// src/core/orchestrator/commands.rs

//! Executes parsed control commands against the orchestrator and writes the
//! replies to the requesting connection.

use super::Orchestrator;
use crate::core::PartylineError;
use crate::core::protocol::ControlCommand;
use futures::{Sink, SinkExt};
use serde_json::{Value, json};
use tracing::{error, info};

/// Runs one command. Unknown sessions and failed creations are answered
/// in-band; only a failure to write a reply is returned.
pub async fn execute<S>(
    orchestrator: &Orchestrator,
    command: ControlCommand,
    replies: &mut S,
) -> Result<(), PartylineError>
where
    S: Sink<Value, Error = PartylineError> + Unpin,
{
    match command {
        ControlCommand::List => replies.send(orchestrator.list()).await,

        ControlCommand::Create => match orchestrator.create().await {
            Ok(handle) => {
                replies
                    .send(json!({
                        "message": format!("Created {}", handle.label()),
                        "address": handle.address(),
                    }))
                    .await
            }
            Err(e) => {
                error!("Could not create server: {}", e);
                replies.send(e.to_reply()).await
            }
        },

        ControlCommand::Join { server_id } => match orchestrator.join(&server_id) {
            Ok(handle) => {
                replies
                    .send(json!({
                        "message": format!("Joined {} {}", handle.label(), handle.id()),
                        "address": handle.address(),
                        "host": handle.host(),
                        "port": handle.port(),
                        "server_id": handle.id(),
                    }))
                    .await
            }
            Err(e) => replies.send(e.to_reply()).await,
        },

        ControlCommand::Message { message } => {
            info!("Received message: {}", message);
            replies.send(json!({ "message": "Message received" })).await
        }

        ControlCommand::Nuke => {
            info!("Nuking server");
            replies.send(json!({ "message": "Nuking server" })).await?;
            let stopped = orchestrator.nuke().await;
            info!("All servers nuked ({} stopped).", stopped);
            replies.send(json!({ "message": "All servers nuked" })).await
        }

        ControlCommand::Stop { server_id } => match orchestrator.stop(&server_id).await {
            Ok(handle) => {
                replies
                    .send(json!({
                        "message": format!("Stopped {} {}", handle.label(), handle.id()),
                        "server_id": handle.id(),
                    }))
                    .await
            }
            Err(e) => replies.send(e.to_reply()).await,
        },
    }
}
