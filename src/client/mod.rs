// src/client/mod.rs

//! A resilient client for talking to the master or to a session server.

mod connection;
mod frame_buffer;
mod state;

pub use connection::{ClientConnection, ClientSettings, MessageCallback};
pub use frame_buffer::FrameBuffer;
pub use state::ConnectionState;
