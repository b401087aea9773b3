// src/core/mod.rs

//! The central module: wire protocol, session servers and the orchestrator
//! that manages them.

pub mod errors;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod session;

pub use errors::PartylineError;
