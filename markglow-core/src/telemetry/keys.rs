/// Span field keys for relay calls.
/// Keep these stable; log pipelines filter on them.
pub const KEY_PROVIDER: &str = "llm.provider";
pub const KEY_MODEL: &str = "llm.model";
pub const KEY_ACTION: &str = "relay.action";

pub const KEY_CHUNKS: &str = "relay.chunks";
pub const KEY_OUTPUT_CHARS: &str = "relay.output_chars";
pub const KEY_LATENCY_MS: &str = "latency.ms";

pub const KEY_ERROR_KIND: &str = "error.kind";
