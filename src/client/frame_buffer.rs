// src/client/frame_buffer.rs

use crate::core::PartylineError;
use crate::core::protocol::JsonLineCodec;
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Accumulates raw reads and yields each complete message once.
///
/// Bytes after the last delimiter stay buffered until a later chunk completes
/// them.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
    codec: JsonLineCodec,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and drains every message it completed, delimiters
    /// stripped, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, PartylineError> {
        self.buf.extend_from_slice(chunk);
        let mut messages = Vec::new();
        while let Some(line) = self.codec.decode(&mut self.buf)? {
            messages.push(line);
        }
        Ok(messages)
    }

    /// Bytes held back waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.codec = JsonLineCodec::with_max_length(self.codec.max_length());
    }
}
