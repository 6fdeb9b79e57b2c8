//! SSE framing for reasoning events: `id:` / `event: <phase>.<status>` / `data: <json>`.

use crate::event::ReasoningEvent;

/// Event name of the frame that tells a subscriber it missed live deliveries.
pub const MISSED_EVENT_NAME: &str = "stream.missed";

/// Formats one reasoning event as an SSE frame (terminated by a blank line).
pub fn to_sse_frame(event: &ReasoningEvent) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(format!(
        "id: {}\nevent: {}\ndata: {json}\n\n",
        event.sequence_index,
        event.event_name()
    ))
}

/// Frame telling the subscriber to re-fetch the persisted log after `resume_after`.
pub fn missed_frame(resume_after: Option<u64>) -> String {
    let data = serde_json::json!({ "resume_after": resume_after });
    format!("event: {MISSED_EVENT_NAME}\ndata: {data}\n\n")
}

/// One parsed SSE frame. Used by clients and tests reading a reasoning stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// Parses a single frame (lines up to, not including, the blank separator).
    /// Returns `None` for comment-only or empty input.
    pub fn parse(block: &str) -> Option<Self> {
        let mut frame = SseFrame::default();
        let mut data_lines: Vec<&str> = Vec::new();
        for line in block.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "id" => frame.id = Some(value.to_string()),
                "event" => frame.event = Some(value.to_string()),
                "data" => data_lines.push(value),
                _ => {}
            }
        }
        if frame.id.is_none() && frame.event.is_none() && data_lines.is_empty() {
            return None;
        }
        frame.data = data_lines.join("\n");
        Some(frame)
    }

    /// Splits a buffer into complete frames; returns the frames and the unconsumed tail.
    pub fn split_buffer(buf: &str) -> (Vec<SseFrame>, String) {
        let mut frames = Vec::new();
        let mut rest = buf;
        while let Some(pos) = rest.find("\n\n") {
            if let Some(frame) = SseFrame::parse(&rest[..pos]) {
                frames.push(frame);
            }
            rest = &rest[pos + 2..];
        }
        (frames, rest.to_string())
    }
}
