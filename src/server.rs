use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::PipelineError;
use crate::instrumentation::{TurnLog, TurnLogger};
use crate::llm::{GeminiClient, HuggingFaceClient, Transcriber};
use crate::models::{HistoryTurn, Mode, Query};
use crate::pipeline::{GenerationSettings, NodeEvaluator, Pipeline, Refiner, Verifier};

const MAX_AUDIO_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_AUDIO_TYPE: &str = "audio/webm";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub turn_log: Option<Arc<TurnLogger>>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let gemini = GeminiClient::new(
            &config.gemini_api_key,
            &config.gemini_base_url,
            &config.gemini_model,
        );

        let hugging_face = config.hugging_face_api_key.as_deref().map(|key| {
            Arc::new(
                HuggingFaceClient::new(
                    key,
                    &config.hugging_face_base_url,
                    &config.refine_model,
                    &config.whisper_model,
                )
                .with_transcribe_timeout(config.transcribe_timeout_ms),
            )
        });
        if hugging_face.is_none() {
            tracing::warn!("HUGGING_FACE_API_KEY not set; refinement and transcription are unavailable");
        }

        let refiner = match &hugging_face {
            Some(client) => Refiner::new(
                client.clone(),
                config.refine_deadline_ms,
                config.max_output_tokens,
            ),
            None => Refiner::unavailable(),
        };
        let verifier = Verifier::new(Arc::new(NodeEvaluator::new(
            &config.node_binary,
            config.sandbox_timeout_ms,
        )));

        let settings = GenerationSettings {
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            deadline_ms: config.generation_deadline_ms,
            stream_idle_timeout_ms: config.stream_idle_timeout_ms,
            blocking_check: config.blocking_check,
        };

        Ok(Self {
            pipeline: Arc::new(Pipeline::new(Arc::new(gemini), verifier, refiner, settings)),
            transcriber: hugging_face.map(|client| client as Arc<dyn Transcriber>),
            turn_log: Some(Arc::new(TurnLogger::new(&config.log_dir)?)),
        })
    }

    /// File appends run on the blocking pool.
    fn log_turn(&self, turn: TurnLog) {
        tracing::info!("{}", turn.summary());
        if let Some(logger) = self.turn_log.clone() {
            tokio::task::spawn_blocking(move || {
                if let Err(err) = logger.write(&turn) {
                    tracing::warn!(error = %err, "failed to write turn log");
                }
            });
        }
    }
}

/// Typed pipeline failure rendered as `{ "error": ... }` with a matching status.
pub struct ApiError(PipelineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            PipelineError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            PipelineError::Timeout { .. } => (
                StatusCode::GATEWAY_TIMEOUT,
                "AI took too long. Try a simpler question.".to_string(),
            ),
            PipelineError::Provider { .. } => (StatusCode::BAD_GATEWAY, self.0.to_string()),
            PipelineError::UnsupportedLanguage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/chat", post(chat))
        .route(
            "/api/stt",
            post(speech_to_text).layer(DefaultBodyLimit::max(MAX_AUDIO_BYTES)),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind {}", addr))?;
    tracing::info!("Sparkles backend listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "Sparkles backend is running",
        "endpoints": {
            "chat": "POST /api/chat",
            "stt": "POST /api/stt"
        }
    }))
}

async fn chat(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match request {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "malformed chat request");
            return ApiError(PipelineError::Validation(format!(
                "Invalid request body: {}",
                rejection.body_text()
            )))
            .into_response();
        }
    };
    let query = match Query::new(request.query.unwrap_or_default(), request.mode) {
        Ok(query) => query,
        Err(err) => return ApiError(err).into_response(),
    };

    if request.stream {
        stream_chat(state, query, request.history).await
    } else {
        blocking_chat(state, query).await
    }
}

async fn blocking_chat(state: AppState, query: Query) -> Response {
    let started = Instant::now();
    let mut turn = TurnLog::new(query.text(), query.mode(), false);

    let result = state.pipeline.answer(&query).await;
    turn.total_latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(answer) => {
            turn.record_answer(&answer);
            state.log_turn(turn);
            Json(json!({ "intent": answer.intent, "solution": answer.solution })).into_response()
        }
        Err(err) => {
            turn.error = Some(err.to_string());
            state.log_turn(turn);
            ApiError(err).into_response()
        }
    }
}

async fn stream_chat(state: AppState, query: Query, history: Vec<HistoryTurn>) -> Response {
    let started = Instant::now();

    // Nothing is committed yet, so failures to open still get a status code.
    let open = match state.pipeline.open_stream(&query, &history).await {
        Ok(open) => open,
        Err(err) => {
            let mut turn = TurnLog::new(query.text(), query.mode(), true);
            turn.error = Some(err.to_string());
            turn.total_latency_ms = started.elapsed().as_millis() as u64;
            state.log_turn(turn);
            return ApiError(err).into_response();
        }
    };
    let opened_ms = started.elapsed().as_millis() as u64;

    let (tx, rx) = mpsc::channel::<String>(32);
    let relay = state.pipeline.relay();
    tokio::spawn(async move {
        let report = relay.run(open.chunks, open.intent, query.text(), tx).await;

        let mut turn = TurnLog::new(query.text(), query.mode(), true);
        turn.record_stream(open.intent, &report, opened_ms);
        turn.total_latency_ms = started.elapsed().as_millis() as u64;
        state.log_turn(turn);
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

async fn speech_to_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    tracing::info!(bytes = body.len(), "STT request received");
    if body.is_empty() {
        return ApiError(PipelineError::Validation("No audio data provided".into())).into_response();
    }

    let Some(transcriber) = &state.transcriber else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Transcription unavailable: HUGGING_FACE_API_KEY not set" })),
        )
            .into_response();
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| value.starts_with("audio/"))
        .unwrap_or(DEFAULT_AUDIO_TYPE);

    match transcriber.transcribe(body, content_type).await {
        Ok(transcript) => Json(json!({ "transcript": transcript })).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "transcription failed");
            ApiError(err).into_response()
        }
    }
}
