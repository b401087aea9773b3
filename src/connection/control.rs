// src/connection/control.rs

//! Defines the `ControlHandler`, which serves one consumer's control channel
//! to the master orchestrator.

use crate::core::PartylineError;
use crate::core::orchestrator::{Orchestrator, commands};
use crate::core::protocol::{ControlCommand, JsonLineCodec};
use crate::server::AnyStream;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Manages the full lifecycle of a control connection.
pub struct ControlHandler {
    framed: Framed<AnyStream, JsonLineCodec>,
    addr: SocketAddr,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
}

impl ControlHandler {
    pub fn new(
        socket: AnyStream,
        addr: SocketAddr,
        orchestrator: Arc<Orchestrator>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            framed: Framed::new(socket, JsonLineCodec::new()),
            addr,
            orchestrator,
            shutdown,
        }
    }

    /// Reads commands until the peer leaves or the master shuts down.
    ///
    /// Bad input is answered in-band. Any other error ends this connection
    /// and is returned to the accept loop for logging.
    pub async fn run(&mut self) -> Result<(), PartylineError> {
        debug!(
            "Serving control connection {} (tls: {}).",
            self.addr,
            self.framed.get_ref().is_tls()
        );
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Control connection for {} received shutdown signal.", self.addr);
                    return Ok(());
                }
                frame = self.framed.next() => {
                    match frame {
                        Some(Ok(line)) => self.process_line(&line).await?,
                        Some(Err(e)) if e.is_normal_disconnect() => {
                            debug!("Control connection from {} closed by peer: {}", self.addr, e);
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(e),
                        None => {
                            info!("Client {} disconnected from main server.", self.addr);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn process_line(&mut self, line: &str) -> Result<(), PartylineError> {
        debug!("Received message from {}: {}", self.addr, line);
        match ControlCommand::parse(line) {
            Ok(command) => {
                debug!("Executing '{}' for {}", command.name(), self.addr);
                commands::execute(&self.orchestrator, command, &mut self.framed).await
            }
            Err(e) => {
                error!("Rejected command from {}: {}", self.addr, e);
                self.framed.send(e.to_reply()).await
            }
        }
    }
}
