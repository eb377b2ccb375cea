//! HTTP surface over the run dispatcher.
//!
//! | Method | Path | Result |
//! |--------|------|--------|
//! | `POST` | `/api/runs` | `202 {run_id}`, `400` on invalid input |
//! | `GET` | `/api/runs` | all run records |
//! | `GET` | `/api/runs/{id}` | one run record, `404` if unknown |
//! | `POST` | `/api/runs/{id}/cancel` | `202`, `404` if unknown |
//! | `GET` | `/api/events` | SSE stream of `progress` events |
//! | `GET` | `/health` | `ok` |

use crate::jobs::{RunManager, RunRequest};
use async_stream::stream;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

pub fn router(manager: RunManager) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/runs", post(start_run).get(list_runs))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/api/events", get(events))
        .with_state(manager)
}

/// Serve until Ctrl-C.
pub async fn serve(bind: SocketAddr, manager: RunManager) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, router(manager))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
            }
        })
        .await
}

async fn health() -> &'static str {
    "ok"
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn start_run(
    State(manager): State<RunManager>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    match manager.start(request) {
        Ok(run_id) => (StatusCode::ACCEPTED, Json(json!({ "run_id": run_id }))).into_response(),
        Err(e) => {
            warn!(error = %e, "Rejected run request");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

async fn list_runs(State(manager): State<RunManager>) -> Response {
    Json(manager.list()).into_response()
}

async fn get_run(State(manager): State<RunManager>, Path(run_id): Path<Uuid>) -> Response {
    match manager.status(run_id) {
        Some(record) => Json(record).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("run {run_id} not found")),
    }
}

async fn cancel_run(State(manager): State<RunManager>, Path(run_id): Path<Uuid>) -> Response {
    if manager.cancel(run_id) {
        (StatusCode::ACCEPTED, Json(json!({ "run_id": run_id }))).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, format!("run {run_id} not found"))
    }
}

async fn events(
    State(manager): State<RunManager>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = manager.subscribe();
    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event("progress").json_data(&event) {
                    Ok(sse) => {
                        yield Ok::<_, Infallible>(sse);
                    }
                    Err(e) => warn!(error = %e, "Could not encode progress event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE subscriber fell behind; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}
