//! HTTP front door
//!
//! `GET /hcaptcha` submits a task and answers immediately with its id;
//! `GET /result` reports the task's outcome. Neither handler ever waits on a
//! solve.

use crate::{CaptchaError, Dispatcher, HealthReport, SessionFactory, TaskId, FAILED_TOKEN};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const WELCOME_PAGE: &str = include_str!("welcome.html");

/// Shared context handed to every handler.
pub struct AppState<F: SessionFactory> {
    pub dispatcher: Arc<Dispatcher<F>>,
    pub metrics: Option<PrometheusHandle>,
}

impl<F: SessionFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<F: SessionFactory> AppState<F> {
    pub fn new(dispatcher: Arc<Dispatcher<F>>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            dispatcher,
            metrics,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Captcha(#[from] CaptchaError),

    #[error("Invalid task ID/Request parameter")]
    InvalidTask,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidTask => StatusCode::BAD_REQUEST,
            ApiError::Captcha(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Captcha(e) => {
                error!("Unexpected error processing request: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = json!({
            "status": "error",
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitParams {
    pub sitekey: Option<String>,
    pub proxy: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Deserialize)]
pub struct ResultParams {
    pub id: Option<String>,
}

pub fn router<F: SessionFactory>(state: AppState<F>) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/hcaptcha", get(submit::<F>))
        .route("/result", get(result::<F>))
        .route("/health", get(health::<F>))
        .route("/metrics", get(metrics::<F>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn welcome() -> Html<&'static str> {
    Html(WELCOME_PAGE)
}

/// GET /hcaptcha?sitekey=&proxy=
async fn submit<F: SessionFactory>(
    State(state): State<AppState<F>>,
    Query(params): Query<SubmitParams>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let task_id = state
        .dispatcher
        .submit(params.sitekey.as_deref(), params.proxy.as_deref())?;

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task_id })))
}

/// GET /result?id=
async fn result<F: SessionFactory>(
    State(state): State<AppState<F>>,
    Query(params): Query<ResultParams>,
) -> Result<Response, ApiError> {
    let id: TaskId = params
        .id
        .as_deref()
        .and_then(|id| id.trim().parse().ok())
        .ok_or(ApiError::InvalidTask)?;

    let outcome = state
        .dispatcher
        .store()
        .get(&id)
        .ok_or(ApiError::InvalidTask)?;

    let Some(record) = outcome.to_record() else {
        return Ok((StatusCode::ACCEPTED, Json(json!({ "status": "processing" }))).into_response());
    };

    let status = if record.token == FAILED_TOKEN {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };

    Ok((status, Json(record)).into_response())
}

/// GET /health
async fn health<F: SessionFactory>(State(state): State<AppState<F>>) -> Json<HealthReport> {
    let dispatcher = &state.dispatcher;
    Json(HealthReport::new(
        dispatcher.pool().stats(),
        dispatcher.store().counts(),
        dispatcher.in_flight(),
    ))
}

/// GET /metrics
async fn metrics<F: SessionFactory>(State(state): State<AppState<F>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Serve `app` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), CaptchaError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(CaptchaError::from)
}
