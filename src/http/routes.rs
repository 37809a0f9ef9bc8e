//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchError, MatchPhase, MatchStatus};
use crate::util::time::{uptime_secs, Tick};
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/match", get(match_status_handler))
        .route("/match/start", post(match_start_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    tick: Tick,
    phase: MatchPhase,
    players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.match_handle.status();
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        tick: status.tick,
        phase: status.phase,
        players: status.players,
    })
}

// ============================================================================
// Match endpoints
// ============================================================================

async fn match_status_handler(State(state): State<AppState>) -> Json<MatchStatus> {
    Json(state.match_handle.status())
}

#[derive(Serialize)]
struct StartResponse {
    status: &'static str,
    phase: MatchPhase,
}

/// Operator start, equivalent to a client's `start_match`
async fn match_start_handler(State(state): State<AppState>) -> Result<Json<StartResponse>, AppError> {
    state.match_handle.start(Uuid::nil()).await?;
    info!(match_id = %state.match_handle.id, "match start requested over HTTP");
    Ok(Json(StartResponse {
        status: "starting",
        phase: MatchPhase::WaitingForPlayers,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Conflict: {message}")]
    Conflict { code: &'static str, message: String },

    #[error("Service unavailable")]
    Unavailable,
}

impl From<MatchError> for AppError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Closed => AppError::Unavailable,
            other => AppError::Conflict {
                code: other.code(),
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match &self {
            AppError::Conflict { code, message } => (StatusCode::CONFLICT, *code, message.clone()),
            AppError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "Match loop is not running".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}
