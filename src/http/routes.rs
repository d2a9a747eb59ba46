//! HTTP route definitions

use axum::{
    extract::{Extension, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::anticheat::{FlagRecord, SuspicionRecord};
use crate::app::AppState;
use crate::http::middleware::{require_auth, AuthenticatedPlayer};
use crate::matchmaking::QueueStatus;
use crate::store::{PlayerStats, RankedPlayer};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::PlayerId;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origins);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/matchmaking/status", get(matchmaking_status_handler))
        .route("/stats/leaderboard", get(leaderboard_handler))
        .route("/stats/:player_id", get(stats_handler))
        .route("/anticheat/flags", get(flags_handler))
        .route(
            "/anticheat/players/:player_id",
            get(player_records_handler).delete(clear_player_handler),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Configured origins, or any origin when none are set
fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.parse::<HeaderValue>().ok())
        .collect();
    cors.allow_origin(allowed).allow_credentials(true)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_sessions: usize,
    connected_players: usize,
    queue_size: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_size = state.matchmaking.queue_size().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_sessions: state.sessions.len(),
        connected_players: state.registry.len(),
        queue_size,
    })
}

// ============================================================================
// Matchmaking and stats
// ============================================================================

async fn matchmaking_status_handler(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.matchmaking.status().await)
}

async fn stats_handler(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
) -> Json<PlayerStats> {
    Json(state.stats.get(&PlayerId::from(player_id)).await)
}

/// Default and maximum leaderboard size
const LEADERBOARD_DEFAULT: usize = 10;
const LEADERBOARD_MAX: usize = 100;

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct LeaderboardResponse {
    leaderboard: Vec<RankedPlayer>,
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Json<LeaderboardResponse> {
    let limit = query
        .limit
        .unwrap_or(LEADERBOARD_DEFAULT)
        .clamp(1, LEADERBOARD_MAX);
    Json(LeaderboardResponse {
        leaderboard: state.stats.leaderboard(limit).await,
    })
}

// ============================================================================
// Anti-cheat review (admin only)
// ============================================================================

fn require_admin(auth: &AuthenticatedPlayer) -> Result<(), AppError> {
    if auth.claims.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

#[derive(Serialize)]
struct FlagsResponse {
    flags: Vec<FlagRecord>,
}

async fn flags_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedPlayer>,
) -> Result<Json<FlagsResponse>, AppError> {
    require_admin(&auth)?;
    Ok(Json(FlagsResponse {
        flags: state.anticheat.flags(Utc::now()),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerRecordsResponse {
    player_id: PlayerId,
    records: Vec<SuspicionRecord>,
    flag: Option<FlagRecord>,
}

async fn player_records_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedPlayer>,
    Path(player_id): Path<String>,
) -> Result<Json<PlayerRecordsResponse>, AppError> {
    require_admin(&auth)?;
    let player_id = PlayerId::from(player_id);
    let now = Utc::now();

    Ok(Json(PlayerRecordsResponse {
        records: state.anticheat.records(&player_id, now),
        flag: state.anticheat.ledger().flag(&player_id, now),
        player_id,
    }))
}

#[derive(Serialize)]
struct ClearResponse {
    cleared: bool,
}

async fn clear_player_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedPlayer>,
    Path(player_id): Path<String>,
) -> Result<Json<ClearResponse>, AppError> {
    require_admin(&auth)?;
    let player_id = PlayerId::from(player_id);
    let cleared = state.anticheat.clear(&player_id).await;
    info!(player_id = %player_id, admin = %auth.player_id, "Anti-cheat records cleared");

    if !cleared {
        return Err(AppError::NotFound(format!("no anti-cheat records for {player_id}")));
    }
    Ok(Json(ClearResponse { cleared }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden")]
    Forbidden,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
