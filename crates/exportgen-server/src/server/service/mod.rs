//! HTTP service: routing, shared state and handlers.
//!
//! ## Structure
//!
//! - [`handler`] - download, health and index endpoints.
//! - [`state`] - [`AppState`](state::AppState) and shutdown draining.
//! - [`error`] - JSON error responses.

pub mod error;
pub mod handler;
pub mod state;

use axum::{Router, routing::get};
use state::AppState;
use tower_http::cors::{Any, CorsLayer};

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handler::index))
        .route("/health", get(handler::health))
        .route("/exports/{export_id}/download", get(handler::download))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
