use serde::Serialize;

/// Rough token estimate used when the upstream reports no usage: two
/// characters per token.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 2) as u64
}

/// One completed (or failed) streaming request, as handed to a [`super::UsageSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub action: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl UsageRecord {
    pub fn new(action: &str, provider: &str, model: &str) -> Self {
        Self {
            action: action.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            success: true,
            error_kind: None,
        }
    }

    /// Estimate both token counts from the prompt and the relayed text.
    pub fn tokens_from_text(mut self, input: &str, output: &str) -> Self {
        self.input_tokens = estimate_tokens(input);
        self.output_tokens = estimate_tokens(output);
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn failed(mut self, kind: &str) -> Self {
        self.success = false;
        self.error_kind = Some(kind.to_string());
        self
    }
}
