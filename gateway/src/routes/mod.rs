pub mod api;
pub mod ws;

use axum::{Router, middleware};
use std::sync::Arc;

use crate::middleware::connection_limit_middleware;
use crate::state::AppState;

/// All application routes with state applied
///
/// The WebSocket route sits behind the connection-limit middleware, which needs the peer
/// address: serve with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_app_router(app_state: Arc<AppState>) -> Router {
    let ws_routes = ws::create_ws_router().layer(middleware::from_fn_with_state(
        app_state.clone(),
        connection_limit_middleware,
    ));

    api::create_api_router()
        .merge(ws_routes)
        .with_state(app_state)
}
