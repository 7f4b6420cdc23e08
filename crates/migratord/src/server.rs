//! HTTP API for migratord.
//!
//! Local-only REST endpoints for starting runs and polling their output.
//! Every endpoint except `/health` honours the optional bearer token.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use migrator_core::{RunParams, RunToken};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

use crate::coordinator::{RunCoordinator, RunError, RunRequest};
use crate::credentials::CredentialSet;

/// Shared state for HTTP handlers.
#[derive(Debug)]
pub struct AppState {
    pub coordinator: Arc<RunCoordinator>,
    pub auth_token: Option<String>,
    /// Tokens used when a request does not carry its own.
    pub fallback_credentials: CredentialSet,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Create the HTTP router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/credentials", get(credential_status))
        .route("/runs", post(create_run))
        .route("/runs/{token}/output", get(run_output))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Start the HTTP server and serve until `shutdown` is cancelled.
pub async fn start_server(
    coordinator: Arc<RunCoordinator>,
    port: u16,
    auth_token: Option<String>,
    fallback_credentials: CredentialSet,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(AppState {
        coordinator,
        auth_token,
        fallback_credentials,
    });

    let router = create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Validate auth token if configured.
fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if let Some(expected) = &state.auth_token {
        let provided = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

        match provided {
            Some(token) if token == expected => Ok(()),
            Some(_) => Err(api_error(StatusCode::UNAUTHORIZED, "invalid auth token")),
            None => Err(api_error(StatusCode::UNAUTHORIZED, "missing auth token")),
        }
    } else {
        Ok(())
    }
}

fn request_credentials(state: &AppState, headers: &HeaderMap) -> CredentialSet {
    CredentialSet::from_headers(headers).or(&state.fallback_credentials)
}

// --- Request/Response types ---

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Script generation output, when generation failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub busy: bool,
    pub streams: usize,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            output: Vec::new(),
        }),
    )
}

fn run_error_response(err: RunError) -> ApiError {
    let message = err.to_string();
    match err {
        RunError::AdmissionDenied => api_error(StatusCode::CONFLICT, message),
        RunError::CredentialMissing(_) => api_error(StatusCode::UNAUTHORIZED, message),
        RunError::InvalidRequest(_) => api_error(StatusCode::BAD_REQUEST, message),
        RunError::StreamNotFound(_) => api_error(StatusCode::NOT_FOUND, message),
        RunError::ScriptGenerationFailed { output, .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: message,
                output,
            }),
        ),
        RunError::GenerationTimedOut(_) => api_error(StatusCode::UNPROCESSABLE_ENTITY, message),
        RunError::ToolNotFound(_) | RunError::TokenCollision(_) | RunError::Launch(_) => {
            error!("failed to start run: {}", message);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

// --- Handlers ---

/// GET /health - Liveness plus a glance at daemon state.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        busy: state.coordinator.is_busy(),
        streams: state.coordinator.stream_count().await,
    })
}

/// GET /credentials - Which identities have a usable token.
async fn credential_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&state, &headers)?;
    let credentials = request_credentials(&state, &headers);
    Ok(Json(state.coordinator.authenticated(&credentials)))
}

/// POST /runs - Start a migration.
async fn create_run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<RunParams>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&state, &headers)?;

    let Json(params) = body.map_err(|e| {
        warn!("rejected run request: {}", e.body_text());
        api_error(StatusCode::BAD_REQUEST, e.body_text())
    })?;

    let credentials = Arc::new(request_credentials(&state, &headers));
    let ticket = state
        .coordinator
        .run(RunRequest::new(credentials, params))
        .await
        .map_err(run_error_response)?;

    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

/// GET /runs/{token}/output - Lines produced since the previous poll.
async fn run_output(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    check_auth(&state, &headers)?;

    let token = RunToken::from_string(token);
    let chunk = state
        .coordinator
        .output(&token)
        .await
        .map_err(run_error_response)?;

    Ok(Json(chunk))
}
