use bytes::{Buf, BytesMut};
use serde::Deserialize;

pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseRecord {
    Data(String),
    Done,
}

#[derive(Deserialize)]
struct TextPayload {
    text: String,
}

/// Incremental parser for newline-delimited `data: <payload>` records.
///
/// Network chunks may split a record anywhere; partial lines are held until
/// their newline arrives.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: BytesMut,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        self.buf.extend_from_slice(chunk);
        let mut records = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            if let Some(record) = parse_line(&line) {
                records.push(record);
            }
        }
        records
    }

    /// Flushes a trailing line that never got its newline.
    pub fn finish(&mut self) -> Option<SseRecord> {
        let line = self.buf.split();
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseRecord> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');
    // Blank separators and `:` comments carry nothing.
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim() == DONE_SENTINEL {
        return Some(SseRecord::Done);
    }
    Some(SseRecord::Data(decode_payload(payload)))
}

/// Payloads are either bare text or `{"text": "..."}`.
fn decode_payload(payload: &str) -> String {
    if payload.trim_start().starts_with('{') {
        if let Ok(decoded) = serde_json::from_str::<TextPayload>(payload) {
            return decoded.text;
        }
    }
    payload.to_string()
}
