use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, RelayError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Providers {
    pub ernie: Option<ProviderCfg>,
    pub qwen: Option<ProviderCfg>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderCfg {
    /// Chat-completions endpoint that accepts `stream: true`.
    pub api_url: String,
    /// Name of the environment variable that contains the API key.
    pub api_key_env: String,
    /// Sent as the `appid` header when present.
    #[serde(default)]
    pub app_id: Option<String>,
    /// Overrides the provider's built-in default model.
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GenerationCfg {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for GenerationCfg {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    2_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Max gap between two reads of the upstream body in milliseconds (default 120000ms).
    /// There is no total request timeout: a stream may legitimately run for minutes.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_read_timeout_ms() -> u64 {
    120_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerCfg {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Capacity of the per-request outbound event channel.
    #[serde(default = "default_relay_buffer")]
    pub relay_buffer: usize,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            relay_buffer: default_relay_buffer(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_relay_buffer() -> usize {
    1
}

fn default_provider() -> String {
    "ernie".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Provider used when a request names none.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default)]
    pub providers: Providers,
    #[serde(default)]
    pub generation: GenerationCfg,
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub server: ServerCfg,
}

fn parse_json(s: &str) -> CoreResult<Config> {
    serde_json::from_str(s)
        .map_err(|e| RelayError::Other(anyhow::anyhow!("invalid JSON config: {e}")))
}

fn parse_toml(s: &str) -> CoreResult<Config> {
    toml::from_str(s).map_err(|e| RelayError::Other(anyhow::anyhow!("invalid TOML config: {e}")))
}

impl Config {
    /// Read a config file. `.json` and `.toml` are parsed as such; any other
    /// extension is tried as JSON and then as TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = String::from_utf8(fs::read(path)?)
            .map_err(|e| RelayError::Other(anyhow::anyhow!("config is not UTF-8: {e}")))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => parse_json(&text),
            Some("toml") => parse_toml(&text),
            _ => parse_json(&text).or_else(|_| parse_toml(&text)),
        }
    }
}
