use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::db::Database;
use crate::tracker::weekly::current_standings;
use crate::tracker::SchedulerStatus;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub status: watch::Receiver<SchedulerStatus>,
}

/// Build the Axum router for the read-only status API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/last-seen", get(last_seen_handler))
        .route("/api/leaderboard", get(leaderboard_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// GET /api/status
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    Json(state.status.borrow().clone())
}

/// GET /api/last-seen
async fn last_seen_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .list_last_seen()
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// GET /api/leaderboard
async fn leaderboard_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    current_standings(&state.db, Utc::now())
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
