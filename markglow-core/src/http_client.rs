use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::Stream;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::config::HttpCfg;
use crate::error::{CoreResult, RelayError};

/// Represents a single Server-Sent-Event line (already split on `\n`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseLine {
    pub line: String,
}

impl SseLine {
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }
}

/// A boxed stream of `SseLine` results.
pub type SseStream = Pin<Box<dyn Stream<Item = CoreResult<SseLine>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .read_timeout(Duration::from_millis(cfg.read_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| RelayError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "markglow/0.1".to_string(),
        })
    }

    /// POST JSON and return an SSE (Server-Sent Events) line stream.
    ///
    /// Lines are yielded as soon as their terminating `\n` arrives; the body is never
    /// buffered whole. Dropping the returned stream drops the response and releases
    /// the connection.
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        provider: &str,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<SseStream> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");

        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RelayError::UpstreamUnavailable {
                provider: provider.to_string(),
                status: None,
                detail: format!("request failed: {e}"),
            })?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(provider, status, &body));
        }

        let byte_stream = resp.bytes_stream();
        let line_stream = LineStream::new(provider, Box::pin(byte_stream));
        Ok(Box::pin(line_stream))
    }
}

fn map_http_error(provider: &str, status: StatusCode, body: &str) -> RelayError {
    RelayError::UpstreamUnavailable {
        provider: provider.to_string(),
        status: Some(status.as_u16()),
        detail: format!("HTTP {}: {}", status.as_u16(), truncate(body, 300)),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let mut t: String = s.chars().take(max).collect();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

type ByteStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>;

/// Internal line splitter over a bytes stream; yields `SseLine`s separated by '\n'.
///
/// Splitting happens on raw bytes so a multi-byte character cut across two network
/// chunks is decoded only once the whole line is in hand.
struct LineStream<E> {
    inner: ByteStream<E>,
    provider: String,
    buf: Vec<u8>,
    finished: bool,
}

impl<E> LineStream<E> {
    fn new(provider: &str, inner: ByteStream<E>) -> Self {
        Self {
            inner,
            provider: provider.to_string(),
            buf: Vec::new(),
            finished: false,
        }
    }

    fn take_line(&mut self, end: usize) -> SseLine {
        let mut raw: Vec<u8> = self.buf.drain(..end).collect();
        if raw.last() == Some(&b'\n') {
            raw.pop();
        }
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        SseLine {
            line: String::from_utf8_lossy(&raw).into_owned(),
        }
    }
}

impl<E: std::fmt::Display> Stream for LineStream<E> {
    type Item = CoreResult<SseLine>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
                let line = self.take_line(idx + 1);
                return Poll::Ready(Some(Ok(line)));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buf.extend_from_slice(&chunk);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    self.buf.clear();
                    return Poll::Ready(Some(Err(RelayError::UpstreamUnavailable {
                        provider: self.provider.clone(),
                        status: None,
                        detail: format!("stream interrupted: {e}"),
                    })));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if self.buf.is_empty() {
                        return Poll::Ready(None);
                    }
                    let end = self.buf.len();
                    let line = self.take_line(end);
                    return Poll::Ready(Some(Ok(line)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    fn lines_from(chunks: Vec<Result<&'static [u8], &'static str>>) -> LineStream<&'static str> {
        let items: Vec<Result<Bytes, &'static str>> = chunks
            .into_iter()
            .map(|c| c.map(Bytes::from_static))
            .collect();
        LineStream::new("test", Box::pin(futures::stream::iter(items)))
    }

    async fn collect_ok(stream: LineStream<&'static str>) -> Vec<String> {
        stream
            .map(|r| r.expect("line ok").line)
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn splits_across_chunk_boundaries_and_strips_crlf() {
        let s = lines_from(vec![
            Ok(&b"data: a"[..]),
            Ok(&b"b\r\n\r\ndata: c\n"[..]),
            Ok(&b"tail"[..]),
        ]);
        assert_eq!(collect_ok(s).await, vec!["data: ab", "", "data: c", "tail"]);
    }

    #[tokio::test]
    async fn multibyte_char_split_between_chunks_survives() {
        // "你" is E4 BD A0
        let s = lines_from(vec![Ok(&b"data: \xE4\xBD"[..]), Ok(&b"\xA0 ok\n"[..])]);
        assert_eq!(collect_ok(s).await, vec!["data: 你 ok"]);
    }

    #[tokio::test]
    async fn transport_error_ends_stream_after_error_item() {
        let mut s = lines_from(vec![
            Ok(&b"data: x\n"[..]),
            Err("reset"),
            Ok(&b"data: y\n"[..]),
        ]);
        assert_eq!(s.next().await.unwrap().unwrap().line, "data: x");
        let err = s.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            RelayError::UpstreamUnavailable { status: None, .. }
        ));
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn post_sse_lines_yields_body_lines() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/chat")
                .header("accept", "text/event-stream")
                .header("x-extra", "1");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("data: {\"a\":1}\n\ndata: [DONE]\n");
        });

        let client = HttpClient::new_default().unwrap();
        let stream = client
            .post_sse_lines(
                "ernie",
                &server.url("/chat"),
                &json!({"stream": true}),
                &[("x-extra", "1")],
            )
            .await
            .unwrap();
        let lines: Vec<String> = stream.map(|l| l.unwrap().line).collect().await;
        assert_eq!(lines, vec!["data: {\"a\":1}", "", "data: [DONE]"]);
        m.assert();
    }

    #[tokio::test]
    async fn non_200_maps_to_unavailable_with_body_detail() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(401).body("bad key");
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_sse_lines("qwen", &server.url("/chat"), &json!({}), &[])
            .await
            .err()
            .expect("should fail");
        match err {
            RelayError::UpstreamUnavailable {
                provider,
                status,
                detail,
            } => {
                assert_eq!(provider, "qwen");
                assert_eq!(status, Some(401));
                assert!(detail.contains("bad key"));
            }
            other => panic!("expected UpstreamUnavailable, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn error_body_is_truncated() {
        let server = MockServer::start();
        let big = "x".repeat(1000);
        let _m = server.mock(|when, then| {
            when.method(POST).path("/chat");
            then.status(500).body(big.clone());
        });
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_sse_lines("ernie", &server.url("/chat"), &json!({}), &[])
            .await
            .err()
            .expect("should fail");
        match err {
            RelayError::UpstreamUnavailable { detail, .. } => assert!(detail.ends_with("...")),
            other => panic!("expected UpstreamUnavailable, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn network_error_maps_to_unavailable() {
        // Port 9 (discard) is typically closed.
        let client = HttpClient::new_default().expect("client");
        let err = client
            .post_sse_lines("ernie", "http://127.0.0.1:9/chat", &json!({}), &[])
            .await
            .err()
            .expect("should fail");
        assert!(matches!(
            err,
            RelayError::UpstreamUnavailable { status: None, .. }
        ));
    }
}
