//! Decodes the upstream's `data:`-framed event lines into text deltas.
//!
//! Payloads are OpenAI-style chat-completion chunks:
//! `{"choices":[{"delta":{"content":"..."}}]}`, optionally carrying a full
//! `message.content` instead of a delta, or an `{"error":{...}}` object.
//! A single bad line never aborts the stream: it decodes to [`Decoded::Skip`].

use serde::Deserialize;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One meaningful unit decoded from an upstream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    Delta(String),
    Done,
    Error {
        message: String,
        code: Option<String>,
    },
}

/// Why a line produced nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Blank,
    NotData,
    /// Valid JSON with no usable text (role-only deltas, usage frames, duplicates).
    NoContent,
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// One or more frames, in choice order.
    Frames(Vec<DecodedFrame>),
    Skip(SkipReason),
}

// ---- Wire structs (lenient: every field optional) ----
#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    error: Option<WireError>,
    #[serde(default)]
    choices: Option<Vec<Option<WireChoice>>>,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: Option<WireContent>,
    #[serde(default)]
    message: Option<WireContent>,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(default)]
    content: Option<String>,
}

fn code_to_string(v: serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Decode one raw line.
///
/// `accumulated` is the text relayed so far in this request; a full-message
/// fallback already contained in it (or in deltas earlier in the same line) is
/// suppressed so nothing is counted twice.
pub fn decode_line(line: &str, accumulated: &str) -> Decoded {
    let line = line.trim();
    if line.is_empty() {
        return Decoded::Skip(SkipReason::Blank);
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Decoded::Skip(SkipReason::NotData);
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Decoded::Skip(SkipReason::Blank);
    }
    if payload.eq_ignore_ascii_case(DONE_SENTINEL) {
        return Decoded::Frames(vec![DecodedFrame::Done]);
    }

    let chunk: WireChunk = match serde_json::from_str(payload) {
        Ok(c) => c,
        Err(e) => return Decoded::Skip(SkipReason::Malformed(e.to_string())),
    };

    if let Some(err) = chunk.error {
        return Decoded::Frames(vec![DecodedFrame::Error {
            message: err
                .message
                .unwrap_or_else(|| "upstream reported an error".to_string()),
            code: err.code.and_then(code_to_string),
        }]);
    }

    let mut frames = Vec::new();
    // Text emitted earlier in this same line, needed for the containment check.
    let mut in_line = String::new();
    for choice in chunk.choices.unwrap_or_default().into_iter().flatten() {
        if let Some(text) = choice.delta.and_then(|d| d.content)
            && !text.is_empty()
        {
            in_line.push_str(&text);
            frames.push(DecodedFrame::Delta(text));
        }
        if let Some(text) = choice.message.and_then(|m| m.content)
            && !text.is_empty()
            && !already_seen(accumulated, &in_line, &text)
        {
            in_line.push_str(&text);
            frames.push(DecodedFrame::Delta(text));
        }
    }

    if frames.is_empty() {
        Decoded::Skip(SkipReason::NoContent)
    } else {
        Decoded::Frames(frames)
    }
}

fn already_seen(accumulated: &str, in_line: &str, text: &str) -> bool {
    if accumulated.contains(text) || in_line.contains(text) {
        return true;
    }
    if in_line.is_empty() {
        return false;
    }
    // The match may straddle the boundary between the two buffers.
    let mut joined = String::with_capacity(accumulated.len() + in_line.len());
    joined.push_str(accumulated);
    joined.push_str(in_line);
    joined.contains(text)
}
