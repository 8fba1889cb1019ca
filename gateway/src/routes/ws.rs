use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws;
use crate::state::AppState;
use std::sync::Arc;

/// Create the WebSocket router
///
/// `GET /ws` upgrades to a coaching session. Clients send `startStream`, then binary
/// audio frames; the server answers with transcripts, the coach's reply and synthesized
/// audio. See [`crate::core::session::protocol`] for the message set.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(ws::ws_session_handler))
        .layer(TraceLayer::new_for_http())
}
