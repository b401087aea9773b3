// src/core/protocol/mod.rs

//! Wire protocol shared by the master, the session servers and the client:
//! one JSON object per line, terminated by a single `\n`.

pub mod codec;
pub mod command;

pub use codec::{DELIMITER, JsonLineCodec, MAX_LINE_LENGTH};
pub use command::ControlCommand;
