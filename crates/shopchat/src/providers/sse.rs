use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};

const SSE_DELIMITER: &str = "\n\n";

/// A decoded server-sent event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Split a byte stream into server-sent events. Multi-byte characters may straddle
/// chunk boundaries; incomplete bytes are held back until the rest arrives.
pub fn sse_events<S>(bytes: S) -> BoxStream<'static, Result<SseEvent>>
where
    S: futures::Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    bytes
        .scan(SseState::default(), |state, chunk| {
            let results = match chunk {
                Ok(bytes) => {
                    state.push_bytes(&bytes);
                    state.drain_events()
                }
                Err(err) => vec![Err(anyhow!("Stream read failed: {}", err))],
            };
            async move { Some(futures::stream::iter(results)) }
        })
        .flatten()
        .boxed()
}

#[derive(Default)]
struct SseState {
    buffer: String,
    utf8_buffer: Vec<u8>,
    /// A chunk ended on `\r`, which may be the first half of a `\r\n`
    pending_cr: bool,
}

impl SseState {
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.utf8_buffer.extend_from_slice(bytes);
        match std::str::from_utf8(&self.utf8_buffer) {
            Ok(text) => {
                let text = text.to_string();
                self.push_text(&text);
                self.utf8_buffer.clear();
            }
            Err(err) => self.consume_valid_prefix(err.valid_up_to()),
        }
    }

    fn consume_valid_prefix(&mut self, valid_up_to: usize) {
        if valid_up_to == 0 {
            return;
        }

        let valid = String::from_utf8_lossy(&self.utf8_buffer[..valid_up_to]).into_owned();
        self.push_text(&valid);
        self.utf8_buffer.drain(..valid_up_to);
    }

    fn push_text(&mut self, text: &str) {
        let mut text = if std::mem::take(&mut self.pending_cr) {
            format!("\r{}", text)
        } else {
            text.to_string()
        };
        if text.ends_with('\r') {
            text.pop();
            self.pending_cr = true;
        }
        self.buffer.push_str(&text.replace("\r\n", "\n"));
    }

    fn drain_events(&mut self) -> Vec<Result<SseEvent>> {
        let mut results = Vec::new();
        while let Some(raw) = self.next_event() {
            if let Some(event) = parse_event(&raw) {
                results.push(Ok(event));
            }
        }
        results
    }

    fn next_event(&mut self) -> Option<String> {
        let pos = self.buffer.find(SSE_DELIMITER)?;
        let end = pos + SSE_DELIMITER.len();
        let event = self.buffer[..pos].to_string();
        self.buffer.drain(..end);
        Some(event)
    }
}

fn parse_event(raw: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines = Vec::new();

    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        } else if let Some(value) = line.strip_prefix("event:") {
            event.event = Some(value.trim().to_string());
        }
    }

    if data_lines.is_empty() {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}
