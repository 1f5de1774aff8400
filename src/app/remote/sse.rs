//! Server-Sent Events framing for the realtime stream.
//!
//! The realtime endpoint writes one change per frame:
//!
//! ```text
//! event: update
//! data: {"table":"driver_locations","kind":"update","record":{...},"commit_timestamp":"..."}
//!
//! ```
//!
//! Chunks from the HTTP body can split a frame anywhere, including inside a
//! multi-byte character, so raw bytes are buffered until a blank line closes
//! the frame and only complete frames are decoded.

/// One parsed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Accumulates body chunks and yields complete frames
#[derive(Debug, Default)]
pub struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completed.
    ///
    /// Carriage returns are dropped, so CRLF line endings work even when the
    /// pair straddles two chunks. Invalid UTF-8 inside a complete frame is
    /// replaced rather than dropping the connection.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = self.pending.windows(2).position(|pair| pair == b"\n\n") {
            let raw: Vec<u8> = self.pending.drain(..end + 2).collect();
            if let Some(frame) = parse_frame(&String::from_utf8_lossy(&raw)) {
                frames.push(frame);
            }
        }
        frames
    }
}

/// Parse one frame. Comment-only frames (keep-alives) yield `None`.
pub fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in raw.lines() {
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
    Some(SseFrame { event, data: data.join("\n") })
}
