//! Opens a streaming chat-completions call against the configured provider.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::error::CoreResult;
use crate::http_client::{HttpClient, SseStream};
use crate::model::{ChatMessage, StreamRequest};

/// Source of raw upstream lines for one request. Finite and not restartable:
/// every call opens a fresh connection.
#[async_trait]
pub trait LineSource: Send + Sync {
    async fn open(&self, req: &StreamRequest) -> CoreResult<SseStream>;
}

// ---- Wire structs ----
#[derive(Serialize)]
struct StreamBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct UpstreamStreamClient {
    http: HttpClient,
}

impl UpstreamStreamClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    fn headers(req: &StreamRequest) -> Vec<(String, String)> {
        let mut h = vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", req.credentials.api_key.expose_secret()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let Some(app_id) = req.credentials.app_id.as_deref()
            && !app_id.is_empty()
        {
            h.push(("appid".to_string(), app_id.to_string()));
        }
        h
    }
}

#[async_trait]
impl LineSource for UpstreamStreamClient {
    async fn open(&self, req: &StreamRequest) -> CoreResult<SseStream> {
        let body = StreamBody {
            model: &req.model,
            messages: req.messages(),
            stream: true,
            temperature: req.temperature,
            max_output_tokens: req.max_output_tokens,
        };
        let owned_headers = Self::headers(req);
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        tracing::debug!(
            provider = %req.provider,
            model = %req.model,
            prompt_chars = req.prompt.chars().count(),
            "opening upstream stream"
        );
        self.http
            .post_sse_lines(&req.provider, &req.endpoint, &body, &hdrs)
            .await
    }
}
