//! The streaming bridge: pulls upstream lines, decodes deltas, hands each one to
//! the client-facing sink before reading the next line, and accumulates the
//! full response.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::field::Empty;
use tracing_futures::Instrument;

use crate::decoder::{Decoded, DecodedFrame, SkipReason, decode_line};
use crate::error::{CoreResult, RelayError};
use crate::http_client::{HttpClient, SseLine};
use crate::model::StreamRequest;
use crate::stream::ClientEvent;
use crate::telemetry::{KEY_CHUNKS, KEY_ERROR_KIND, KEY_LATENCY_MS, KEY_OUTPUT_CHARS};
use crate::upstream::{LineSource, UpstreamStreamClient};

/// Receives each delta as it is decoded. An error aborts the relay.
#[async_trait]
pub trait ChunkSink: Send {
    async fn send_chunk(&mut self, text: &str) -> CoreResult<()>;
}

/// Forwards chunks as encoded [`ClientEvent`]s over a bounded channel. The send
/// waits for capacity, so a slow reader throttles the relay.
pub struct ChannelSink {
    tx: mpsc::Sender<ClientEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ClientEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ChunkSink for ChannelSink {
    async fn send_chunk(&mut self, text: &str) -> CoreResult<()> {
        self.tx
            .send(ClientEvent::chunk(text))
            .await
            .map_err(|_| RelayError::ClientWrite("client disconnected".into()))
    }
}

/// Adapts a synchronous callback into a sink.
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: FnMut(&str) -> CoreResult<()> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> ChunkSink for FnSink<F>
where
    F: FnMut(&str) -> CoreResult<()> + Send,
{
    async fn send_chunk(&mut self, text: &str) -> CoreResult<()> {
        (self.0)(text)
    }
}

/// Text relayed so far in one request. Append-only.
#[derive(Debug, Default)]
struct Accumulator {
    text: String,
    chunks: usize,
}

impl Accumulator {
    fn push(&mut self, delta: &str) {
        self.text.push_str(delta);
        self.chunks += 1;
    }

    fn as_str(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub full_text: String,
    pub elapsed_ms: u64,
    pub chunks: usize,
    /// False when the upstream closed without a `[DONE]` marker.
    pub saw_done: bool,
}

/// Drive a line stream to completion, forwarding every delta to `sink`.
///
/// Returns on `[DONE]` or end of stream. An `error` frame, a transport error,
/// or a sink failure stops iteration immediately; the partial text is dropped
/// together with `lines`, which releases the upstream connection.
pub async fn relay_lines<L>(
    mut lines: L,
    sink: &mut (dyn ChunkSink + '_),
    started: Instant,
) -> CoreResult<RelayOutcome>
where
    L: Stream<Item = CoreResult<SseLine>> + Unpin + Send,
{
    let mut acc = Accumulator::default();
    let mut saw_done = false;

    'lines: while let Some(item) = lines.next().await {
        let line = item?;
        match decode_line(&line.line, acc.as_str()) {
            Decoded::Skip(SkipReason::Malformed(e)) => {
                tracing::warn!(
                    chunk = acc.chunks,
                    payload = %line.line,
                    error = %e,
                    "skipping malformed frame"
                );
            }
            Decoded::Skip(SkipReason::NotData) => {
                tracing::debug!(line = %line.line, "ignoring non-data line");
            }
            Decoded::Skip(_) => {}
            Decoded::Frames(frames) => {
                for frame in frames {
                    match frame {
                        DecodedFrame::Delta(text) => {
                            acc.push(&text);
                            sink.send_chunk(&text).await?;
                        }
                        DecodedFrame::Done => {
                            saw_done = true;
                            break 'lines;
                        }
                        DecodedFrame::Error { message, code } => {
                            tracing::error!(%message, code = ?code, "upstream sent error frame");
                            return Err(RelayError::UpstreamProtocol { message, code });
                        }
                    }
                }
            }
        }
    }

    if !saw_done {
        tracing::debug!("upstream closed without [DONE]; treating as complete");
    }
    Ok(RelayOutcome {
        elapsed_ms: started.elapsed().as_millis() as u64,
        chunks: acc.chunks,
        full_text: acc.text,
        saw_done,
    })
}

/// Opens the upstream for a request and relays it into a sink.
#[derive(Clone)]
pub struct ChunkRelay {
    source: Arc<dyn LineSource>,
}

impl ChunkRelay {
    pub fn new(source: Arc<dyn LineSource>) -> Self {
        Self { source }
    }

    pub fn upstream(http: HttpClient) -> Self {
        Self::new(Arc::new(UpstreamStreamClient::new(http)))
    }

    pub async fn run(
        &self,
        req: &StreamRequest,
        sink: &mut (dyn ChunkSink + '_),
    ) -> CoreResult<RelayOutcome> {
        let span = tracing::info_span!(
            "relay",
            llm.provider = %req.provider,
            llm.model = %req.model,
            relay.chunks = Empty,
            relay.output_chars = Empty,
            latency.ms = Empty,
            error.kind = Empty,
        );
        let started = Instant::now();
        let result = async {
            let lines = self.source.open(req).await?;
            relay_lines(lines, sink, started).await
        }
        .instrument(span.clone())
        .await;

        match &result {
            Ok(outcome) => {
                span.record(KEY_CHUNKS, outcome.chunks as u64);
                span.record(KEY_OUTPUT_CHARS, outcome.full_text.chars().count() as u64);
                span.record(KEY_LATENCY_MS, outcome.elapsed_ms);
                span.in_scope(|| {
                    if outcome.full_text.is_empty() {
                        tracing::warn!("upstream stream produced no text");
                    }
                    tracing::info!(
                        chunks = outcome.chunks,
                        elapsed_ms = outcome.elapsed_ms,
                        saw_done = outcome.saw_done,
                        "relay complete"
                    );
                });
            }
            Err(e) => {
                span.record(KEY_ERROR_KIND, e.kind());
                span.record(KEY_LATENCY_MS, started.elapsed().as_millis() as u64);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::SseStream;
    use crate::model::GenerationParams;
    use crate::provider::{ProviderKind, ProviderProfile};
    use crate::stream::EventName;
    use crate::telemetry::test_span::install_capture;
    use crate::telemetry::{KEY_MODEL, KEY_PROVIDER};
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn items(lines: &[&str]) -> Vec<CoreResult<SseLine>> {
        lines.iter().map(|l| Ok(SseLine::new(*l))).collect()
    }

    fn scripted(
        lines: &[&str],
    ) -> impl Stream<Item = CoreResult<SseLine>> + Unpin + Send + 'static {
        futures::stream::iter(items(lines))
    }

    async fn relay(lines: &[&str]) -> (CoreResult<RelayOutcome>, Vec<String>) {
        let mut seen = Vec::new();
        let result = {
            let mut sink = FnSink::new(|t: &str| {
                seen.push(t.to_string());
                Ok(())
            });
            relay_lines(scripted(lines), &mut sink, Instant::now()).await
        };
        (result, seen)
    }

    const A: &str = r#"data: {"choices":[{"delta":{"content":"A"}}]}"#;
    const B: &str = r#"data: {"choices":[{"delta":{"content":"B"}}]}"#;

    #[tokio::test]
    async fn ordered_deltas_then_done() {
        let (res, seen) = relay(&[A, B, "data: [DONE]"]).await;
        let out = res.unwrap();
        assert_eq!(seen, vec!["A", "B"]);
        assert_eq!(out.full_text, "AB");
        assert_eq!(out.chunks, 2);
        assert!(out.saw_done);
    }

    #[tokio::test]
    async fn lines_after_done_are_not_read() {
        let (res, seen) = relay(&[A, "data: [DONE]", B]).await;
        assert_eq!(res.unwrap().full_text, "A");
        assert_eq!(seen, vec!["A"]);
    }

    #[tokio::test]
    async fn error_frame_stops_relay() {
        let (res, seen) = relay(&[A, r#"data: {"error":{"message":"boom"}}"#, B]).await;
        assert_eq!(seen, vec!["A"]);
        match res {
            Err(RelayError::UpstreamProtocol { message, code }) => {
                assert_eq!(message, "boom");
                assert_eq!(code, None);
            }
            other => panic!("expected UpstreamProtocol, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_lines_are_skipped() {
        let x = r#"data: {"choices":[{"delta":{"content":"X"}}]}"#;
        let lines = ["not-data-prefixed", x, "data:not-json", "", "data: [DONE]"];
        let (res, seen) = relay(&lines).await;
        assert_eq!(seen, vec!["X"]);
        assert_eq!(res.unwrap().full_text, "X");
    }

    #[tokio::test]
    async fn full_message_fallback_is_not_double_counted() {
        let hi = r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#;
        let full = r#"data: {"choices":[{"message":{"content":"Hi"}}]}"#;
        let (res, seen) = relay(&[hi, full, "data: [DONE]"]).await;
        assert_eq!(seen, vec!["Hi"]);
        assert_eq!(res.unwrap().full_text, "Hi");
    }

    #[tokio::test]
    async fn eof_without_done_completes() {
        let z = r#"data: {"choices":[{"delta":{"content":"Z"}}]}"#;
        let (res, seen) = relay(&[z]).await;
        let out = res.unwrap();
        assert_eq!(seen, vec!["Z"]);
        assert_eq!(out.full_text, "Z");
        assert!(!out.saw_done);
    }

    #[tokio::test]
    async fn whitespace_only_deltas_are_forwarded_verbatim() {
        let sp = r#"data: {"choices":[{"delta":{"content":"  "}}]}"#;
        let nl = r#"data: {"choices":[{"delta":{"content":"\n\n"}}]}"#;
        let (res, seen) = relay(&[A, sp, nl, B]).await;
        assert_eq!(seen, vec!["A", "  ", "\n\n", "B"]);
        assert_eq!(res.unwrap().full_text, "A  \n\nB");
    }

    #[tokio::test]
    async fn sink_failure_aborts_without_reading_further() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let lines = scripted(&[A, B, A, "data: [DONE]"]).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut calls = 0;
        let mut sink = FnSink::new(|_: &str| {
            calls += 1;
            Err(RelayError::ClientWrite("gone".into()))
        });
        let res = relay_lines(lines, &mut sink, Instant::now()).await;
        assert!(matches!(res, Err(RelayError::ClientWrite(_))));
        drop(sink);
        assert_eq!(calls, 1);
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_error_mid_stream_propagates() {
        let items: Vec<CoreResult<SseLine>> = vec![
            Ok(SseLine::new(A)),
            Err(RelayError::UpstreamUnavailable {
                provider: "ernie".into(),
                status: None,
                detail: "stream interrupted".into(),
            }),
        ];
        let lines = futures::stream::iter(items);
        let mut sink = FnSink::new(|_: &str| Ok(()));
        let res = relay_lines(lines, &mut sink, Instant::now()).await;
        assert!(matches!(res, Err(RelayError::UpstreamUnavailable { .. })));
    }

    #[tokio::test]
    async fn channel_sink_reports_dropped_receiver() {
        let (tx, rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);
        sink.send_chunk("first").await.unwrap();
        drop(rx);
        let err = sink.send_chunk("second").await.unwrap_err();
        assert!(err.is_client_gone());
    }

    #[tokio::test]
    async fn channel_sink_encodes_chunks() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = ChannelSink::new(tx);
        sink.send_chunk("a \"b\"\n").await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.name, EventName::Chunk);
        let text: String = serde_json::from_str(&ev.payload).unwrap();
        assert_eq!(text, "a \"b\"\n");
    }

    /// Serves fixed lines and records whether the stream was dropped.
    struct Scripted {
        lines: Vec<&'static str>,
        dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);
    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl LineSource for Scripted {
        async fn open(&self, _req: &StreamRequest) -> CoreResult<SseStream> {
            let flag = DropFlag(self.dropped.clone());
            Ok(Box::pin(futures::stream::iter(items(&self.lines)).map(move |l| {
                let _keep = &flag;
                l
            })))
        }
    }

    fn request() -> StreamRequest {
        let key = SecretString::new("k".into());
        ProviderProfile::new(ProviderKind::Ernie, "http://unused", key).stream_request(
            "hi",
            None,
            GenerationParams::default(),
            None,
        )
    }

    #[tokio::test]
    async fn run_records_span_fields_and_releases_source() {
        let store = install_capture();
        let dropped = Arc::new(AtomicBool::new(false));
        let relay = ChunkRelay::new(Arc::new(Scripted {
            lines: vec![A, B, "data: [DONE]"],
            dropped: dropped.clone(),
        }));
        let mut sink = FnSink::new(|_: &str| Ok(()));
        let out = relay.run(&request(), &mut sink).await.unwrap();
        assert_eq!(out.full_text, "AB");
        assert!(dropped.load(Ordering::SeqCst));

        let fields = store.fields_of("relay").expect("relay span captured");
        assert_eq!(fields[KEY_CHUNKS], "2");
        assert_eq!(fields[KEY_PROVIDER], "ernie");
        assert_eq!(fields[KEY_MODEL], "ernie-4.5-turbo-128k");
        assert!(fields.contains_key(KEY_LATENCY_MS));
        assert!(!fields.contains_key(KEY_ERROR_KIND));
    }

    #[tokio::test]
    async fn run_releases_source_when_client_goes_away() {
        let store = install_capture();
        let dropped = Arc::new(AtomicBool::new(false));
        let relay = ChunkRelay::new(Arc::new(Scripted {
            lines: vec![A, B, "data: [DONE]"],
            dropped: dropped.clone(),
        }));
        let mut sink = FnSink::new(|_: &str| Err(RelayError::ClientWrite("gone".into())));
        let err = relay.run(&request(), &mut sink).await.unwrap_err();
        assert!(err.is_client_gone());
        assert!(dropped.load(Ordering::SeqCst));

        let fields = store.fields_of("relay").unwrap();
        assert_eq!(fields[KEY_ERROR_KIND], "\"client_write\"");
    }
}
