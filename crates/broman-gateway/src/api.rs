use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use broman_agents::{ChatOptions, CompletionGuard, Fallback, Metric, clamp_horizon};
use broman_common::Message;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::state::SharedState;

const CHAT_BUFFER: usize = 32;

const ECHO_CHUNKS: usize = 5;
const ECHO_PERIOD: Duration = Duration::from_millis(400);

/// A chat turn as posted by the web client. Unreadable input degrades to an
/// empty conversation rather than an error, so the caller still gets an answer.
#[derive(Debug, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub system: Option<String>,
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn from_body(body: &[u8]) -> Self {
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };

        let messages = value
            .get("messages")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|m| serde_json::from_value::<Message>(m.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            messages,
            system: value.get("system").and_then(Value::as_str).map(str::to_string),
            model: value.get("model").and_then(Value::as_str).map(str::to_string),
        }
    }
}

/// `POST /api/chat`: stream the guarded reply as plain text.
#[instrument(skip_all, fields(request_id = tracing::field::Empty))]
pub async fn chat(State(state): State<SharedState>, body: Bytes) -> Response {
    let started = Instant::now();
    let request_id = Uuid::new_v4();
    tracing::Span::current().record("request_id", tracing::field::display(request_id));

    let request = ChatRequest::from_body(&body);
    let options = ChatOptions {
        system: request.system,
        model: request.model,
    };
    let model = state.runtime.resolve_model(&options);
    info!(messages = request.messages.len(), model = %model, "chat turn started");

    let upstream = state.runtime.stream_reply(&request.messages, &options);
    let fallback: Arc<dyn Fallback> = state.fallback.clone();
    let (rx, handle) = CompletionGuard::new(fallback).spawn(upstream, request.messages, CHAT_BUFFER);

    tokio::spawn(async move {
        match handle.await {
            Ok(outcome) => info!(%request_id, ?outcome, "chat turn finished"),
            Err(e) => warn!(%request_id, "chat turn task failed: {e}"),
        }
    });

    let prep_ms = started.elapsed().as_millis() as u64;
    let mut response = Response::new(Body::from_stream(
        ReceiverStream::new(rx).map(Ok::<_, Infallible>),
    ));
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.insert("x-ai-server-prepms", HeaderValue::from(prep_ms));
    if let Ok(value) = HeaderValue::from_str(&model) {
        headers.insert("x-ai-model", value);
    }
    response
}

/// `POST /api/forecast`: predict the next values of a numeric series.
#[instrument(skip_all)]
pub async fn forecast(State(state): State<SharedState>, body: Bytes) -> Response {
    let value = match serde_json::from_slice::<Value>(&body) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => return bad_request("expected a JSON object"),
        Err(e) => return bad_request(&e.to_string()),
    };

    let series: Vec<f64> = value
        .get("series")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(finite_number).collect())
        .unwrap_or_default();
    let horizon = clamp_horizon(value.get("horizon").and_then(finite_number));
    let metric = Metric::from_label(value.get("metric").and_then(Value::as_str));

    let result = state.forecast.forecast(&series, horizon, metric).await;
    Json(result).into_response()
}

/// `POST /api/structured`: sentiment, summary and keywords for `query`.
#[instrument(skip_all)]
pub async fn structured(State(state): State<SharedState>, body: Bytes) -> Response {
    if !state.runtime.has_provider() {
        return plain_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "OPENAI_API_KEY is missing".to_string(),
        );
    }

    let query = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("query").and_then(Value::as_str).map(str::to_string))
        .filter(|q| !q.is_empty());
    let Some(query) = query else {
        return plain_error(
            StatusCode::BAD_REQUEST,
            "`query` must be a non-empty string".to_string(),
        );
    };

    match state.runtime.analyze(&query).await {
        Ok(analysis) => ([(CACHE_CONTROL, "no-store")], Json(analysis)).into_response(),
        Err(e) => {
            error!("structured analysis failed: {e}");
            plain_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Structured API error: {e}"),
            )
        }
    }
}

/// `GET /api/echo`: a slow chunked body for checking that nothing buffers it.
pub async fn echo() -> Response {
    let mut response = Response::new(Body::from_stream(
        echo_chunks(ECHO_CHUNKS, ECHO_PERIOD).map(Ok::<_, Infallible>),
    ));
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("connection", HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// `count` lines `chunk 1\n` .. `chunk {count}\n`, each after waiting `period`.
fn echo_chunks(count: usize, period: Duration) -> impl Stream<Item = String> + Send {
    futures::stream::unfold(1, move |i| async move {
        if i > count {
            return None;
        }
        tokio::time::sleep(period).await;
        Some((format!("chunk {i}\n"), i + 1))
    })
}

/// `GET /api/ping`
pub async fn ping() -> impl IntoResponse {
    (
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8"),
            (CACHE_CONTROL, "no-store"),
        ],
        "pong",
    )
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}

/// Numbers, or strings holding numbers; anything non-finite is dropped.
fn finite_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn plain_error(status: StatusCode, message: String) -> Response {
    (status, [(CONTENT_TYPE, "text/plain; charset=utf-8")], message).into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}
