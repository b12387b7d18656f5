//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::rewards::contract::PlayerStats;
use crate::rewards::{Address, ClaimPanelView, RewardService};
use crate::sync::Participant;
use crate::util::time::uptime_secs;
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
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/sessions/:name", get(session_handler))
        .route("/rewards/:address", get(reward_status_handler))
        .route("/rewards/:address/stats", get(player_stats_handler))
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
    active_sessions: usize,
    connected_participants: usize,
    rewards_enabled: bool,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_sessions: state.sessions.active_sessions(),
        connected_participants: state.sessions.total_participants(),
        rewards_enabled: state.rewards.is_some(),
    })
}

// ============================================================================
// Session endpoints
// ============================================================================

#[derive(Debug, Serialize)]
struct SessionResponse {
    name: String,
    participants: Vec<Participant>,
    values: serde_json::Map<String, serde_json::Value>,
}

async fn session_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let hub = state
        .sessions
        .get(&name)
        .ok_or_else(|| AppError::NotFound(format!("No live session named {name}")))?;

    Ok(Json(SessionResponse {
        name: hub.name().to_string(),
        participants: hub.roster(),
        values: hub.shared_values(),
    }))
}

// ============================================================================
// Reward endpoints
// ============================================================================

fn reward_service(state: &AppState) -> Result<&RewardService, AppError> {
    state
        .rewards
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("Reward contract is not configured".to_string()))
}

fn parse_address(raw: &str) -> Result<Address, AppError> {
    raw.parse()
        .map_err(|e: crate::rewards::abi::AbiError| AppError::BadRequest(e.to_string()))
}

async fn reward_status_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<ClaimPanelView>, AppError> {
    let rewards = reward_service(&state)?;
    let player = parse_address(&address)?;

    let view = rewards
        .refresh(player)
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    Ok(Json(view))
}

async fn player_stats_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<PlayerStats>, AppError> {
    let rewards = reward_service(&state)?;
    let player = parse_address(&address)?;

    let stats = rewards
        .player_stats(player)
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    Ok(Json(stats))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn state_without_rewards() -> AppState {
        AppState::new(Config {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "info".to_string(),
            client_origin: "http://localhost:3000".to_string(),
            session_name: "click-battle".to_string(),
            session_password: None,
            rpc_url: "http://127.0.0.1:1".to_string(),
            contract_address: None,
            explorer_url: "https://explorer.test".to_string(),
            receipt_timeout: Duration::from_secs(1),
        })
    }

    #[tokio::test]
    async fn test_rewards_unavailable_without_contract() {
        let state = state_without_rewards();
        let err = reward_status_handler(
            State(state),
            Path("0x00000000000000000000000000000000000000bb".to_string()),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let err = session_handler(State(state_without_rewards()), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_live_session_lists_roster() {
        let state = state_without_rewards();
        let (_replica, _link) = state.sessions.join(
            "arena",
            Participant {
                id: uuid::Uuid::from_u128(1),
                display_name: "ada".to_string(),
            },
        );

        let Json(body) = session_handler(State(state.clone()), Path("arena".to_string()))
            .await
            .unwrap();
        assert_eq!(body.name, "arena");
        assert_eq!(body.participants.len(), 1);
        assert_eq!(body.participants[0].display_name, "ada");
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = AppError::BadRequest("Invalid address: 0x12".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Invalid address: 0x12");
    }

    #[test]
    fn test_malformed_address_is_bad_request() {
        let err = parse_address("0x1234").unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
