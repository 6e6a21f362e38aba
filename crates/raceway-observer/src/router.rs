//! Axum router construction.
//!
//! Assembles the REST routes and the push channel into a single
//! [`Router`] with CORS enabled for the venue displays, which are served
//! from other origins.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete router.
///
/// `/api/races/next` is a static segment and takes precedence over
/// `/api/races/{id}`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Push channel
        .route("/ws", get(ws::ws_connect))
        // Queue
        .route(
            "/api/races",
            get(handlers::list_races).post(handlers::create_race),
        )
        .route("/api/races/next", get(handlers::next_race))
        .route(
            "/api/races/{id}",
            get(handlers::get_race)
                .put(handlers::update_race)
                .delete(handlers::delete_race),
        )
        .route("/api/races/{id}/drivers", post(handlers::assign_driver))
        .route(
            "/api/races/{id}/drivers/{name}",
            delete(handlers::unassign_driver),
        )
        // Session (read-only)
        .route("/api/session", get(handlers::get_session))
        .route("/api/session/laps", get(handlers::session_laps))
        .route("/api/session/leaderboard", get(handlers::leaderboard))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
