//! Incremental `text/event-stream` parser.

use serde_json::Value;

use super::types::StreamEvent;

/// Fields collected from one blank-line terminated block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SseBlock {
    pub event_type: Option<String>,
    pub data: Option<String>,
    pub id: Option<String>,
    pub retry_ms: Option<u64>,
}

impl SseBlock {
    fn is_empty(&self) -> bool {
        self.event_type.is_none() && self.data.is_none() && self.id.is_none() && self.retry_ms.is_none()
    }

    /// Blocks without data only move the cursor or retry hint.
    pub(crate) fn into_event(self) -> Option<StreamEvent> {
        let raw = self.data?;
        let data = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
        Some(StreamEvent {
            event_type: self
                .event_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data,
            id: self.id,
            retry_hint_ms: self.retry_ms,
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buf: Vec<u8>,
    block: SseBlock,
}

impl SseParser {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every block completed by this chunk.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<SseBlock> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            let mut line = &self.buf[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let line = String::from_utf8_lossy(line).into_owned();
            start = end + 1;
            if let Some(block) = self.feed_line(&line) {
                out.push(block);
            }
        }
        self.buf.drain(..start);
        out
    }

    fn feed_line(&mut self, line: &str) -> Option<SseBlock> {
        if line.is_empty() {
            let block = std::mem::take(&mut self.block);
            return (!block.is_empty()).then_some(block);
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.block.event_type = Some(value.to_string()),
            "data" => match &mut self.block.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.block.data = Some(value.to_string()),
            },
            "id" if !value.contains('\0') => self.block.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.trim().parse::<u64>() {
                    self.block.retry_ms = Some(ms);
                }
            }
            _ => {}
        }
        None
    }
}
