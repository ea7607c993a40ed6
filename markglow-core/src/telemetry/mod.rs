//! Span keys and usage accounting for relayed requests.
//! Usage goes wherever the installed [`UsageSink`] sends it; the default logs it.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use std::sync::{Arc, Mutex};

/// Receives one record per finished request.
///
/// Implementations must be thread-safe; `record` is called from the relay
/// task and should not block.
pub trait UsageSink: Send + Sync + 'static {
    fn record(&self, usage: UsageRecord);
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageSink;

impl UsageSink for TracingUsageSink {
    fn record(&self, usage: UsageRecord) {
        tracing::info!(
            target: "markglow::usage",
            action = %usage.action,
            provider = %usage.provider,
            model = %usage.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            duration_ms = usage.duration_ms,
            success = usage.success,
            error_kind = usage.error_kind.as_deref().unwrap_or(""),
            "usage"
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUsageSink;

impl UsageSink for NoopUsageSink {
    fn record(&self, _usage: UsageRecord) {}
}

/// Keeps every record in memory. Handy in tests and for embedding callers that
/// aggregate usage themselves.
#[derive(Debug, Default, Clone)]
pub struct MemoryUsageSink {
    records: Arc<Mutex<Vec<UsageRecord>>>,
}

impl MemoryUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl UsageSink for MemoryUsageSink {
    fn record(&self, usage: UsageRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(usage);
        }
    }
}
