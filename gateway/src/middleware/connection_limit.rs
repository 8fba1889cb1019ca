//! WebSocket admission control
//!
//! Upgrade requests are counted against a global cap and a per-IP cap before they reach
//! the session handler. Plain HTTP requests are never counted.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Address of an admitted client, handed to the WebSocket handler so it can release the
/// slot when the socket closes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn rejection(error: ConnectionLimitError) -> Response {
    match error {
        ConnectionLimitError::GlobalLimitReached => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Server at capacity. Please try again later.",
        )
            .into_response(),
        ConnectionLimitError::PerIpLimitReached => (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many connections from your IP address.",
        )
            .into_response(),
    }
}

/// Reserve a connection slot for WebSocket upgrades
///
/// Rejects with 503 when the server-wide cap is reached and 429 when the caller's
/// address already holds its share. Admitted requests carry a [`ClientIp`] extension.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return next.run(request).await;
    }

    let client_ip = addr.ip();
    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            let response = next.run(request).await;
            // A failed upgrade never reaches the socket handler, so nothing else releases it
            if response.status() != StatusCode::SWITCHING_PROTOCOLS {
                state.release_connection(client_ip);
            }
            response
        }
        Err(error) => {
            tracing::warn!(
                ip = %client_ip,
                reason = ?error,
                active = state.ws_connection_count(),
                "Rejecting WebSocket connection"
            );
            rejection(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{
        Extension, Router, extract::connect_info::MockConnectInfo, middleware, routing::get,
    };
    use std::net::Ipv4Addr;
    use tower::ServiceExt;

    async fn echo_ip(ip: Option<Extension<ClientIp>>) -> String {
        match ip {
            Some(Extension(ClientIp(ip))) => ip.to_string(),
            None => "none".to_string(),
        }
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/ws", get(echo_ip))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                connection_limit_middleware,
            ))
            .with_state(state)
            .layer(MockConnectInfo(SocketAddr::from((
                Ipv4Addr::new(192, 168, 1, 7),
                4000,
            ))))
    }

    fn upgrade_request() -> Request<Body> {
        Request::builder()
            .uri("/ws")
            .header(header::UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_detects_upgrade_header() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, "WebSocket".parse().unwrap());
        assert!(is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, "h2c".parse().unwrap());
        assert!(!is_websocket_upgrade(&headers));
    }

    #[tokio::test]
    async fn test_plain_requests_are_not_counted() {
        let state = AppState::new(ServerConfig::default());
        let response = app(state.clone())
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"none");
        assert_eq!(state.ws_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_upgrade_releases_slot() {
        let state = AppState::new(ServerConfig::default());
        let response = app(state.clone()).oneshot(upgrade_request()).await.unwrap();

        // The stub route answers 200 instead of switching protocols
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"192.168.1.7");
        assert_eq!(state.ws_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_rejections() {
        let ip: IpAddr = Ipv4Addr::new(192, 168, 1, 7).into();

        let mut config = ServerConfig::default();
        config.max_connections_per_ip = 1;
        let state = AppState::new(config);
        state.try_acquire_connection(ip).unwrap();
        let response = app(state).oneshot(upgrade_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let mut config = ServerConfig::default();
        config.max_websocket_connections = Some(1);
        let state = AppState::new(config);
        state
            .try_acquire_connection(Ipv4Addr::new(10, 0, 0, 1).into())
            .unwrap();
        let response = app(state).oneshot(upgrade_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
