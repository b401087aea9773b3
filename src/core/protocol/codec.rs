// src/core/protocol/codec.rs

//! Implements newline-delimited JSON framing as a `tokio_util` codec.

use crate::core::PartylineError;
use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

/// The single byte that terminates every payload on the wire.
pub const DELIMITER: u8 = b'\n';

// Protocol-level limit to keep a peer from growing the read buffer forever.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// A `tokio_util::codec` implementation that splits a byte stream into text
/// lines and writes JSON payloads followed by the delimiter.
///
/// Decoding yields the raw line (delimiter and an optional trailing `\r`
/// stripped) rather than a parsed value, so the receiving side can answer
/// malformed JSON in-band instead of dropping the connection.
#[derive(Debug, Clone)]
pub struct JsonLineCodec {
    max_length: usize,
    // Offset up to which the buffer is known not to contain a delimiter.
    next_index: usize,
}

impl JsonLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn take_line(&mut self, src: &mut BytesMut, len: usize) -> Result<String, PartylineError> {
        let mut line = src.split_to(len);
        src.advance(1);
        self.next_index = 0;
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        String::from_utf8(line.to_vec()).map_err(|_| PartylineError::InvalidUtf8)
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLineCodec {
    type Item = String;
    type Error = PartylineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let scan_from = self.next_index.min(src.len());
            let Some(offset) = src[scan_from..].iter().position(|b| *b == DELIMITER) else {
                if src.len() > self.max_length {
                    return Err(PartylineError::LineTooLong(self.max_length));
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let len = scan_from + offset;
            if len > self.max_length {
                return Err(PartylineError::LineTooLong(self.max_length));
            }
            let line = self.take_line(src, len)?;
            // Blank lines carry no payload.
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(line));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // The peer closed mid-line; hand over what it sent.
        let len = src.len();
        src.put_u8(DELIMITER);
        let line = self.take_line(src, len)?;
        if line.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }
}

impl Encoder<&str> for JsonLineCodec {
    type Error = PartylineError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_line(item, dst);
        Ok(())
    }
}

impl Encoder<Arc<str>> for JsonLineCodec {
    type Error = PartylineError;

    fn encode(&mut self, item: Arc<str>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_line(&item, dst);
        Ok(())
    }
}

impl Encoder<Value> for JsonLineCodec {
    type Error = PartylineError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let text = serde_json::to_string(&item)
            .map_err(|e| PartylineError::Internal(format!("failed to serialize reply: {e}")))?;
        write_line(&text, dst);
        Ok(())
    }
}

fn write_line(text: &str, dst: &mut BytesMut) {
    dst.reserve(text.len() + 1);
    dst.extend_from_slice(text.as_bytes());
    dst.put_u8(DELIMITER);
}
