//! HTTP/SSE surface over the engine.
//!
//! - GET /api/health
//! - GET /api/sessions/active
//! - GET /api/actions/recent, /api/stream/actions (SSE)
//! - GET /api/jobs/active, /api/jobs/recent
//! - GET /api/jobs/{id}/actions, /api/jobs/{id}/actions/stream (SSE)
//! - GET /api/jobs/{id}/output/recent, /api/jobs/{id}/output/stream (SSE)
//! - GET /api/jobs/{id}/timeline
//! - GET /api/jobs/gateway-log/recent, /api/jobs/gateway-log/stream (SSE)
//! - GET /api/usage/codex

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use jobwatch_core::{Error, JobMonitor, LogStream, StreamEvent};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

type AppState = Arc<JobMonitor>;

pub const DEFAULT_JOB_ACTIONS: usize = 500;
pub const MAX_JOB_ACTIONS: usize = 5000;

/// Engine errors rendered as `{error}` with a status that matches the cause.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidJobId(_) => StatusCode::BAD_REQUEST,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Counts arrive as free text; anything unparseable falls back to the default.
#[derive(Debug, Default, Deserialize)]
struct CountQuery {
    limit: Option<String>,
    tail: Option<String>,
}

fn parse_count(raw: Option<&str>) -> Option<usize> {
    let n: i64 = raw?.trim().parse().ok()?;
    Some(n.max(0) as usize)
}

impl CountQuery {
    fn limit(&self) -> Option<usize> {
        parse_count(self.limit.as_deref())
    }

    fn tail(&self) -> Option<usize> {
        parse_count(self.tail.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
struct TimelineQuery {
    tail: Option<String>,
    #[serde(default)]
    reasoning: bool,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn sessions_active(State(monitor): State<AppState>) -> impl IntoResponse {
    Json(monitor.list_processes().await)
}

async fn actions_recent(
    State(monitor): State<AppState>,
    Query(query): Query<CountQuery>,
) -> ApiResult<impl IntoResponse> {
    let events = monitor.read_recent_actions(query.limit()).await?;
    Ok(Json(json!({ "events": events })))
}

async fn actions_stream(State(monitor): State<AppState>) -> Response {
    event_stream(monitor.stream_actions(), LineFormat::Action)
}

async fn jobs_active(State(monitor): State<AppState>) -> impl IntoResponse {
    Json(monitor.list_active_jobs().await)
}

async fn jobs_recent(
    State(monitor): State<AppState>,
    Query(query): Query<CountQuery>,
) -> ApiResult<impl IntoResponse> {
    let jobs = monitor.list_recent_jobs(query.limit()).await?;
    Ok(Json(json!({ "jobs": jobs })))
}

async fn job_actions(
    State(monitor): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<CountQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query
        .limit()
        .unwrap_or(DEFAULT_JOB_ACTIONS)
        .clamp(1, MAX_JOB_ACTIONS);
    let events = monitor.read_job_actions(&job_id, Some(limit)).await?;
    Ok(Json(json!({ "events": events })))
}

async fn job_actions_stream(
    State(monitor): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let logs = monitor.stream_job_actions(&job_id)?;
    Ok(event_stream(logs, LineFormat::Action))
}

async fn job_output_recent(
    State(monitor): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<CountQuery>,
) -> ApiResult<impl IntoResponse> {
    let recent = monitor.read_job_output_recent(&job_id, query.tail()).await?;
    Ok(Json(recent))
}

async fn job_output_stream(
    State(monitor): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let logs = monitor.stream_job_output(&job_id)?;
    Ok(event_stream(logs, LineFormat::Log))
}

async fn job_timeline(
    State(monitor): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<TimelineQuery>,
) -> ApiResult<impl IntoResponse> {
    let tail = parse_count(query.tail.as_deref());
    let timeline = monitor
        .job_timeline(&job_id, tail, query.reasoning)
        .await?;
    Ok(Json(timeline))
}

async fn gateway_log_recent(
    State(monitor): State<AppState>,
    Query(query): Query<CountQuery>,
) -> impl IntoResponse {
    Json(monitor.read_gateway_log_recent(query.tail()).await)
}

async fn gateway_log_stream(State(monitor): State<AppState>) -> Response {
    event_stream(monitor.stream_gateway_log(), LineFormat::Log)
}

async fn usage(State(monitor): State<AppState>) -> impl IntoResponse {
    Json(monitor.usage_summary().await)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "API route not found" })),
    )
}

/// How appended lines are framed on the wire.
#[derive(Debug, Clone, Copy)]
enum LineFormat {
    /// `event: log`, `data: {"line": ...}`
    Log,
    /// `event: action`, `data: <raw ndjson line>`
    Action,
}

fn to_sse(event: StreamEvent, format: LineFormat) -> Event {
    match event {
        StreamEvent::Path(path) => Event::default()
            .event("path")
            .data(json!({ "path": path }).to_string()),
        StreamEvent::Line(line) => match format {
            LineFormat::Log => Event::default()
                .event("log")
                .data(json!({ "line": line }).to_string()),
            LineFormat::Action => Event::default().event("action").data(line),
        },
        StreamEvent::Ping(at) => Event::default()
            .event("ping")
            .data(at.timestamp_millis().to_string()),
        StreamEvent::NotFound(message) => Event::default()
            .event("not_found")
            .data(json!({ "message": message }).to_string()),
        StreamEvent::Vanished(path) => Event::default().event("server_error").data(
            json!({ "message": format!("log file vanished: {}", path.display()) }).to_string(),
        ),
        StreamEvent::Failed(message) => Event::default()
            .event("server_error")
            .data(json!({ "message": message }).to_string()),
    }
}

/// Bridge one [`LogStream`] to one SSE response. The stream is dropped, and
/// its follow task aborted, when the client goes away.
fn event_stream(mut logs: LogStream, format: LineFormat) -> Response {
    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(
            Event::default()
                .event("ready")
                .data(Utc::now().timestamp_millis().to_string()),
        );
        while let Some(event) = logs.recv().await {
            let terminal = event.is_terminal();
            yield Ok(to_sse(event, format));
            if terminal {
                break;
            }
        }
    };

    (
        [("cache-control", "no-cache, no-transform"), ("x-accel-buffering", "no")],
        Sse::new(stream),
    )
        .into_response()
}

/// Build the API router.
pub fn router(monitor: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions/active", get(sessions_active))
        .route("/api/actions/recent", get(actions_recent))
        .route("/api/stream/actions", get(actions_stream))
        .route("/api/jobs/active", get(jobs_active))
        .route("/api/jobs/recent", get(jobs_recent))
        .route("/api/jobs/gateway-log/recent", get(gateway_log_recent))
        .route("/api/jobs/gateway-log/stream", get(gateway_log_stream))
        .route("/api/jobs/{id}/actions", get(job_actions))
        .route("/api/jobs/{id}/actions/stream", get(job_actions_stream))
        .route("/api/jobs/{id}/output/recent", get(job_output_recent))
        .route("/api/jobs/{id}/output/stream", get(job_output_stream))
        .route("/api/jobs/{id}/timeline", get(job_timeline))
        .route("/api/usage/codex", get(usage))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(monitor)
}

/// Serve the API until interrupted.
pub async fn serve(monitor: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    let addr = listener.local_addr().context("failed to read bound address")?;

    tracing::info!(%addr, "jobwatch API listening");
    println!("jobwatch listening on http://{}", addr);

    axum::serve(listener, router(monitor))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("jobwatch API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
