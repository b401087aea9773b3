// src/connection/mod.rs

//! Manages the lifecycle of single TCP connections: clients attached to a
//! session server and consumers talking to the master over the control channel.

mod control;
mod guard;
mod handler;

pub use control::ControlHandler;
pub use guard::ConnectionGuard;
pub use handler::SessionConnectionHandler;
