//! Connection limits for relay sessions
//!
//! Every relay session holds one slot in the global gauge and one in its
//! client's per-IP gauge for as long as the WebSocket is open.
//!
//! ```ignore
//! let app = routes::relay::create_relay_router().layer(
//!     axum::middleware::from_fn_with_state(state.clone(), connection_limit_middleware),
//! );
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Client address of a request that holds a connection slot.
///
/// The session supervisor releases the slot when the session ends.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

/// Reserve a session slot before a WebSocket upgrade.
///
/// Answers 503 when the global limit is reached and 429 when the client's
/// address already holds its share. Plain HTTP requests pass through.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();

    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            let response = next.run(request).await;
            // A refused upgrade never reaches the session, so nothing else frees the slot.
            if response.status() != StatusCode::SWITCHING_PROTOCOLS {
                state.release_connection(client_ip);
            }
            response
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                active = state.ws_connection_count(),
                "Rejecting relay session: global limit reached"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting relay session: per-IP limit reached"
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{
        Router,
        extract::connect_info::MockConnectInfo,
        middleware::from_fn_with_state,
        routing::get,
    };
    use std::net::Ipv4Addr;
    use tower::ServiceExt;

    fn state_with_limits(global: Option<usize>, per_ip: u32) -> Arc<AppState> {
        let mut config = ServerConfig::with_api_key("test-key");
        config.max_websocket_connections = global;
        config.max_connections_per_ip = per_ip;
        AppState::new(config).unwrap()
    }

    fn upgrade_request() -> Request<Body> {
        Request::builder()
            .uri("/ws")
            .header("upgrade", "websocket")
            .body(Body::empty())
            .unwrap()
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/ws", get(|| async { StatusCode::SWITCHING_PROTOCOLS }))
            .route("/plain", get(|| async { "ok" }))
            .layer(from_fn_with_state(state, connection_limit_middleware))
            .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))))
    }

    #[test]
    fn test_connection_tracking_basic() {
        let state = state_with_limits(Some(10), 3);
        let ip: IpAddr = Ipv4Addr::new(192, 168, 1, 100).into();

        assert_eq!(state.ws_connection_count(), 0);
        assert_eq!(state.ip_connection_count(&ip), 0);

        for expected in 1..=3 {
            assert!(state.try_acquire_connection(ip).is_ok());
            assert_eq!(state.ws_connection_count(), expected);
            assert_eq!(state.ip_connection_count(&ip), expected as u32);
        }

        assert_eq!(
            state.try_acquire_connection(ip),
            Err(ConnectionLimitError::PerIpLimitReached)
        );
        assert_eq!(state.ws_connection_count(), 3);

        state.release_connection(ip);
        assert_eq!(state.ws_connection_count(), 2);
        assert_eq!(state.ip_connection_count(&ip), 2);
        assert!(state.try_acquire_connection(ip).is_ok());
    }

    #[test]
    fn test_global_connection_limit() {
        let state = state_with_limits(Some(5), 10);
        let ips: Vec<IpAddr> = (1..=6)
            .map(|i| Ipv4Addr::new(192, 168, 1, i).into())
            .collect();

        for ip in &ips[0..5] {
            assert!(state.try_acquire_connection(*ip).is_ok());
        }
        assert_eq!(
            state.try_acquire_connection(ips[5]),
            Err(ConnectionLimitError::GlobalLimitReached)
        );

        state.release_connection(ips[0]);
        assert!(state.try_acquire_connection(ips[5]).is_ok());
        assert_eq!(state.ip_connection_count(&ips[0]), 0);
    }

    #[tokio::test]
    async fn test_middleware_rejects_at_capacity() {
        let state = state_with_limits(Some(0), 10);

        let response = app(state).oneshot(upgrade_request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_middleware_per_ip_limit() {
        let state = state_with_limits(None, 1);
        state
            .try_acquire_connection(Ipv4Addr::new(10, 0, 0, 1).into())
            .unwrap();

        let response = app(state).oneshot(upgrade_request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_middleware_holds_slot_for_upgrade() {
        let state = state_with_limits(None, 5);

        let response = app(Arc::clone(&state))
            .oneshot(upgrade_request())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(state.ws_connection_count(), 1);
    }

    #[tokio::test]
    async fn test_plain_requests_pass_through() {
        let state = state_with_limits(Some(0), 0);
        let request = Request::builder()
            .uri("/plain")
            .body(Body::empty())
            .unwrap();

        let response = app(Arc::clone(&state)).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.ws_connection_count(), 0);
    }
}
