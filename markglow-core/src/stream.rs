//! Events delivered to the client over the outbound SSE channel.
//!
//! Contract:
//! - 0..n `chunk` events, each carrying one non-empty delta, in upstream order.
//! - Exactly one terminal event, `end` or `error`, and it is always the last.
//! - When the client itself is gone no terminal event is sent.

use axum::response::sse::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    Chunk,
    End,
    Error,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chunk => "chunk",
            Self::End => "end",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEvent {
    pub name: EventName,
    pub payload: String,
}

impl ClientEvent {
    /// Chunk event with the delta JSON-string-encoded.
    pub fn chunk(text: &str) -> Self {
        Self {
            name: EventName::Chunk,
            payload: crate::encoder::encode(text),
        }
    }

    /// End event. The payload keeps `done` ahead of `cost`.
    pub fn end(cost_ms: u64) -> Self {
        Self {
            name: EventName::End,
            payload: format!(r#"{{"done":true,"cost":{cost_ms}}}"#),
        }
    }

    /// Error event; the message is sent as raw text.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            name: EventName::Error,
            payload: message.into(),
        }
    }

    /// Returns true if this event terminates the stream (`end` or `error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self.name, EventName::End | EventName::Error)
    }

    /// SSE cannot carry a bare `\r`; raw error text is normalized to `\n`, which
    /// the encoder splits into multiple `data:` lines.
    pub fn into_sse(self) -> Event {
        let data = if self.payload.contains('\r') {
            self.payload.replace("\r\n", "\n").replace('\r', "\n")
        } else {
            self.payload
        };
        Event::default().event(self.name.as_str()).data(data)
    }
}
