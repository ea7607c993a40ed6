use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::config::GenerationCfg;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Bearer key plus the optional `appid` header value.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: SecretString,
    pub app_id: Option<String>,
}

/// Sampling parameters after defaulting and clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

const MAX_OUTPUT_TOKENS_CAP: u32 = 100_000;

fn clamp_round_f32(x: f32, lo: f32, hi: f32, dp: u32) -> f32 {
    let clamped = x.clamp(lo, hi);
    let p = 10f32.powi(dp as i32);
    (clamped * p).round() / p
}

impl GenerationParams {
    /// Fill missing values from config defaults, then clamp into the range
    /// providers accept.
    pub fn resolve(
        temperature: Option<f32>,
        max_output_tokens: Option<u32>,
        defaults: &GenerationCfg,
    ) -> Self {
        let temperature = match temperature {
            Some(t) if t.is_finite() => clamp_round_f32(t, 0.0, 2.0, 3),
            _ => defaults.temperature,
        };
        let max_output_tokens = max_output_tokens
            .unwrap_or(defaults.max_output_tokens)
            .clamp(1, MAX_OUTPUT_TOKENS_CAP);
        Self {
            temperature,
            max_output_tokens,
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::resolve(None, None, &GenerationCfg::default())
    }
}

/// Everything needed to open one upstream stream. Built once per invocation.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Provider code used in errors and logs, e.g. "ernie".
    pub provider: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub model: String,
    pub endpoint: String,
    pub credentials: Credentials,
}

impl StreamRequest {
    /// System message first (when non-empty), then the user prompt.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut msgs = Vec::with_capacity(2);
        if let Some(system) = self.system_prompt.as_deref()
            && !system.is_empty()
        {
            msgs.push(ChatMessage {
                role: Role::System,
                content: system.to_string(),
            });
        }
        msgs.push(ChatMessage {
            role: Role::User,
            content: self.prompt.clone(),
        });
        msgs
    }
}
