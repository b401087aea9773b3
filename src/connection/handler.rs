// src/connection/handler.rs

//! Defines the `SessionConnectionHandler` which runs the read loop of one
//! client connected to a session server.

use super::guard::ConnectionGuard;
use crate::core::PartylineError;
use crate::core::protocol::JsonLineCodec;
use crate::core::registry::{ConnectionInfo, OutboundReceiver};
use crate::core::session::{SessionBehavior, SessionContext};
use futures::{FutureExt, SinkExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Manages the full lifecycle of a client connection to a session.
pub struct SessionConnectionHandler {
    framed: Framed<TcpStream, JsonLineCodec>,
    conn: ConnectionInfo,
    outbound_rx: OutboundReceiver,
    session: SessionContext,
    behavior: Arc<dyn SessionBehavior>,
}

impl SessionConnectionHandler {
    pub fn new(
        socket: TcpStream,
        conn: ConnectionInfo,
        outbound_rx: OutboundReceiver,
        session: SessionContext,
        behavior: Arc<dyn SessionBehavior>,
    ) -> Self {
        Self {
            framed: Framed::new(socket, JsonLineCodec::new()),
            conn,
            outbound_rx,
            session,
            behavior,
        }
    }

    /// The main event loop for the connection: inbound messages, queued
    /// broadcasts and the session's stop signal.
    pub async fn run(mut self) {
        let _guard = ConnectionGuard::new(self.session.registry().clone(), self.conn);

        loop {
            tokio::select! {
                biased;
                _ = self.session.stopped() => {
                    info!("Session {} stopped. Closing connection to {}.", self.session.id(), self.conn.addr);
                    break;
                }
                outbound = self.outbound_rx.recv() => {
                    let Some(payload) = outbound else {
                        debug!("Client {} was dropped from the registry.", self.conn.addr);
                        break;
                    };
                    if let Err(e) = self.framed.send(payload).await {
                        log_transport_error(&self.conn, &e);
                        break;
                    }
                }
                inbound = self.framed.next() => {
                    match inbound {
                        Some(Ok(line)) => {
                            if let Err(e) = self.dispatch(line).await {
                                log_transport_error(&self.conn, &e);
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            log_transport_error(&self.conn, &e);
                            break;
                        }
                        None => {
                            info!("Client {} disconnected from session {}.", self.conn.addr, self.session.id());
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Hands one message to the behavior. Only a failure to write the reply
    /// is returned; faults inside the behavior stay with this message.
    async fn dispatch(&mut self, line: String) -> Result<(), PartylineError> {
        debug!("Session {}: received from {}: {}", self.session.id(), self.conn.addr, line);

        let outcome = AssertUnwindSafe(self.behavior.on_message(&self.session, &self.conn, &line))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(Some(reply))) => self.framed.send(reply).await?,
            Ok(Ok(None)) => {}
            Ok(Err(e)) if e.is_client_error() => {
                error!("Rejected message from {}: {}", self.conn.addr, e);
                self.framed.send(e.to_reply()).await?;
            }
            Ok(Err(e)) => {
                error!("Unexpected error processing message from {}: {}", self.conn.addr, e);
            }
            Err(_) => {
                error!("Message handler panicked while processing a message from {}.", self.conn.addr);
            }
        }
        Ok(())
    }
}

fn log_transport_error(conn: &ConnectionInfo, e: &PartylineError) {
    if e.is_normal_disconnect() {
        debug!("Connection from {} closed by peer: {}", conn.addr, e);
    } else {
        warn!("Connection error for {}: {}", conn.addr, e);
    }
}
