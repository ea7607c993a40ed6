//! Inbound HTTP surface: `POST /api/ai/stream` relays one action as an SSE
//! stream and `GET /api/ai/provider` reports the configured providers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use futures::Stream;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_futures::Instrument;

use crate::config::{Config, GenerationCfg};
use crate::error::CoreResult;
use crate::http_client::HttpClient;
use crate::model::GenerationParams;
use crate::prompts::{Action, PromptInputs, PromptPair};
use crate::provider::ProviderRegistry;
use crate::relay::{ChannelSink, ChunkRelay};
use crate::stream::ClientEvent;
use crate::telemetry::{TracingUsageSink, UsageRecord, UsageSink};

/// Shared, read-only state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub relay: ChunkRelay,
    pub providers: Arc<ProviderRegistry>,
    pub generation: GenerationCfg,
    pub usage: Arc<dyn UsageSink>,
    /// Capacity of the per-request event channel.
    pub relay_buffer: usize,
}

impl AppState {
    pub fn new(relay: ChunkRelay, providers: ProviderRegistry) -> Self {
        Self {
            relay,
            providers: Arc::new(providers),
            generation: GenerationCfg::default(),
            usage: Arc::new(TracingUsageSink),
            relay_buffer: 1,
        }
    }

    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let http = HttpClient::from_cfg(&cfg.http)?;
        let providers = ProviderRegistry::from_config(cfg)?;
        Ok(Self {
            generation: cfg.generation.clone(),
            relay_buffer: cfg.server.relay_buffer,
            ..Self::new(ChunkRelay::upstream(http), providers)
        })
    }

    pub fn with_generation(mut self, generation: GenerationCfg) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_usage_sink(mut self, usage: Arc<dyn UsageSink>) -> Self {
        self.usage = usage;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/ai/stream", post(stream_action))
        .route("/api/ai/provider", get(provider_info))
        .with_state(state)
}

/// Serve until the listener fails.
pub async fn serve(listener: TcpListener, state: AppState) -> CoreResult<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "listening");
    }
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamActionRequest {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub temperature: Option<f32>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

impl StreamActionRequest {
    fn inputs(&self) -> PromptInputs<'_> {
        PromptInputs {
            content: self.content.as_deref(),
            style: self.style.as_deref(),
            target_lang: self.target_lang.as_deref(),
            title: self.title.as_deref(),
            context: self.context.as_deref(),
        }
    }

    /// Text the input token estimate is taken from: the document for most
    /// actions, the title plus context for generate.
    fn usage_input(&self, action: Action) -> String {
        if action.needs_content() {
            self.content.clone().unwrap_or_default()
        } else {
            [self.title.as_deref(), self.context.as_deref()]
                .into_iter()
                .flatten()
                .collect()
        }
    }
}

/// Numeric parameters arrive as JSON numbers or as numeric strings. Fractions
/// are rounded and negatives saturate at zero for integer targets.
trait FromLenient: Sized {
    fn from_f64(v: f64) -> Self;
}

impl FromLenient for f32 {
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl FromLenient for u32 {
    fn from_f64(v: f64) -> Self {
        v.round() as u32
    }
}

fn lenient_number<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromLenient,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(d)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(T::from_f64(n))),
        Some(Raw::Text(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<f64>()
                .map(|n| Some(T::from_f64(n)))
                .map_err(|_| serde::de::Error::custom(format!("expected a number, got '{s}'")))
        }
    }
}

async fn stream_action(
    State(state): State<AppState>,
    Json(req): Json<StreamActionRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<ClientEvent>(state.relay_buffer.max(1));
    let action = Action::resolve(req.action.as_deref());
    let span = tracing::info_span!("stream_request", relay.action = %action);
    tokio::spawn(drive(state, action, req, tx).instrument(span));

    let events = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|ev| (Ok::<_, Infallible>(ev.into_sse()), rx))
    });
    Sse::new(events)
}

/// Runs one request to its terminal event. Exactly one `end` or `error` is
/// queued unless the client has already gone away.
async fn drive(
    state: AppState,
    action: Action,
    req: StreamActionRequest,
    tx: mpsc::Sender<ClientEvent>,
) {
    let started = Instant::now();
    let profile = state.providers.resolve(req.provider.as_deref());
    let usage = UsageRecord::new(
        action.code(),
        profile.kind.code(),
        profile.model_for(req.model.as_deref()),
    );
    let input = req.usage_input(action);

    let prompts = match PromptPair::build(action, &req.inputs()) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting stream request");
            let _ = tx.send(ClientEvent::error(e.to_string())).await;
            state.usage.record(
                usage
                    .tokens_from_text(&input, "")
                    .duration_ms(started.elapsed().as_millis() as u64)
                    .failed(e.kind()),
            );
            return;
        }
    };

    let params = GenerationParams::resolve(req.temperature, req.max_tokens, &state.generation);
    let request = profile.stream_request(
        prompts.user,
        Some(prompts.system),
        params,
        req.model.as_deref(),
    );
    tracing::info!(
        provider = %request.provider,
        model = %request.model,
        temperature = request.temperature,
        max_tokens = request.max_output_tokens,
        content_chars = input.chars().count(),
        "stream request accepted"
    );

    let mut sink = ChannelSink::new(tx.clone());
    let result = state.relay.run(&request, &mut sink).await;

    match result {
        Ok(outcome) => {
            let cost = started.elapsed().as_millis() as u64;
            if tx.send(ClientEvent::end(cost)).await.is_err() {
                tracing::debug!("client left before the end event");
            }
            state.usage.record(
                usage
                    .tokens_from_text(&input, &outcome.full_text)
                    .duration_ms(outcome.elapsed_ms),
            );
        }
        Err(e) if e.is_client_gone() => {
            tracing::info!("client disconnected, upstream released");
        }
        Err(e) => {
            tracing::error!(error = %e, kind = e.kind(), "stream failed");
            let _ = tx.send(ClientEvent::error(e.to_string())).await;
            state.usage.record(
                usage
                    .tokens_from_text(&input, "")
                    .duration_ms(started.elapsed().as_millis() as u64)
                    .failed(e.kind()),
            );
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderInfo {
    pub provider: String,
    pub available: Vec<String>,
}

async fn provider_info(State(state): State<AppState>) -> Json<ProviderInfo> {
    Json(ProviderInfo {
        provider: state.providers.default_kind().code().to_string(),
        available: state
            .providers
            .available()
            .into_iter()
            .map(|k| k.code().to_string())
            .collect(),
    })
}
