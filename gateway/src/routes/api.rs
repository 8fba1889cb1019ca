use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the REST router: health check, session introspection and batch voice
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/sessions", get(api::list_sessions))
        .route("/sessions/{session_id}", get(api::get_session))
        .route(
            "/voice/process",
            post(api::process_voice).layer(DefaultBodyLimit::max(api::MAX_VOICE_BODY_SIZE)),
        )
        .layer(TraceLayer::new_for_http())
}
