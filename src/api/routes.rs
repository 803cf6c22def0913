//! API route configuration.

use axum::Router;
use axum::routing::get;

use super::handlers;
use super::state::AppState;
use super::websocket;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(websocket::ws_handler))
        .with_state(state)
}
