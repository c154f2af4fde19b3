//! Server-sent events decoding
//!
//! Bytes are buffered raw until a blank line closes an event, so a UTF-8
//! sequence split across network chunks is decoded whole.

/// One decoded event that carried data
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct SseEvent {
    /// The `event:` field, `None` for the default `message` type
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is(&self, name: &str) -> bool {
        self.event.as_deref() == Some(name)
    }
}

#[derive(Debug, Default)]
pub(super) struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes already known not to contain a boundary
    scanned: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and take every event it completes.
    ///
    /// An event that is not valid UTF-8 comes back as `Err`; the stream
    /// continues with the next one.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<SseEvent, String>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = event_end(&self.buffer[self.scanned..]).map(|e| e + self.scanned) {
            let raw: Vec<u8> = self.buffer.drain(..end).collect();
            self.scanned = 0;
            match String::from_utf8(raw) {
                Ok(text) => events.extend(parse_event(&text).map(Ok)),
                Err(e) => events.push(Err(format!("SSE event is not valid UTF-8: {}", e))),
            }
        }
        // A boundary may straddle the next chunk
        self.scanned = self.buffer.len().saturating_sub(2);
        events
    }
}

/// Offset just past the first blank line, accepting LF and CRLF endings
fn event_end(buf: &[u8]) -> Option<usize> {
    buf.iter().enumerate().find_map(|(i, &b)| {
        if b != b'\n' {
            return None;
        }
        match (buf.get(i + 1), buf.get(i + 2)) {
            (Some(b'\n'), _) => Some(i + 2),
            (Some(b'\r'), Some(b'\n')) => Some(i + 3),
            _ => None,
        }
    })
}

fn parse_event(text: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}
