//! NDJSON event framing and chunk-boundary-safe UTF-8 decoding

use bytes::Bytes;
use serde::Serialize;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson; charset=utf-8";

/// Message of the trailing error event when the upstream stream breaks
pub const STREAM_INTERRUPTED_MESSAGE: &str = "Upstream stream interrupted";

/// One line of the caller-facing stream
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent<'a> {
    Meta {
        #[serde(rename = "sessionId")]
        session_id: &'a str,
    },
    Delta {
        delta: &'a str,
    },
    Error {
        error: &'a str,
    },
}

impl StreamEvent<'_> {
    /// Serialize as one newline-terminated line
    pub fn to_line(&self) -> Bytes {
        match serde_json::to_vec(self) {
            Ok(mut line) => {
                line.push(b'\n');
                Bytes::from(line)
            }
            Err(e) => {
                tracing::error!("Failed to serialize stream event: {}", e);
                Bytes::from_static(b"\n")
            }
        }
    }
}

/// Decodes a byte stream into text without splitting multi-byte sequences.
///
/// An incomplete sequence at the end of a chunk is held back until the next
/// chunk. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text completed by this chunk; may be empty
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            let (valid_up_to, error_len) = match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => (e.valid_up_to(), e.error_len()),
            };

            out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
            match error_len {
                // Truncated sequence at the end: keep it for the next chunk
                None => {
                    self.pending.drain(..valid_up_to);
                    return out;
                }
                Some(len) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid_up_to + len);
                }
            }
        }
    }

    /// Flush whatever is still pending at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(rest)
    }
}
