//! Newline-delimited JSON framing for the chat stream.
//!
//! Bytes are split on `\n` before decoding. A newline byte never appears
//! inside a multi-byte UTF-8 sequence, so a character cut by a read boundary
//! simply waits in `pending` until the rest of its line arrives.

use bytes::{Buf, BytesMut};
use wire_core::llm::ChatError;

/// Per-request framing state. Each stream owns a fresh one.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator, or `None` if only a partial
    /// line is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = twoway::find_bytes(&self.pending, b"\n")?;
        let line = self.pending.split_to(pos);
        self.pending.advance(1);
        Some(decode_line(&line))
    }

    /// Whatever followed the last newline. Leaves the buffer empty.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = self.pending.split();
        Some(decode_line(&rest))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// What a single chat record carried.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Content(String),
    /// Final record. Counts are the server's own, when reported.
    Done {
        eval_count: Option<u64>,
        eval_duration_ns: Option<u64>,
    },
    ServerError(String),
    Empty,
}

pub fn parse_record(line: &str) -> Result<Record, ChatError> {
    let v: serde_json::Value =
        serde_json::from_str(line).map_err(|e| ChatError::Parse(e.to_string()))?;
    if let Some(content) = v["message"]["content"].as_str() {
        if !content.is_empty() {
            return Ok(Record::Content(content.to_string()));
        }
    }
    if let Some(err) = v["error"].as_str() {
        return Ok(Record::ServerError(err.to_string()));
    }
    if v["done"].as_bool() == Some(true) {
        return Ok(Record::Done {
            eval_count: v["eval_count"].as_u64(),
            eval_duration_ns: v["eval_duration"].as_u64(),
        });
    }
    Ok(Record::Empty)
}
