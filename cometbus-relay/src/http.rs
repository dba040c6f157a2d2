// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP Gateway
//!
//! `GET /bus` polls the caller's queue (SSE, long-poll or flush) and
//! `POST /bus` stores inbound messages before polling. Health, readiness and
//! Prometheus endpoints live on the same router.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use cometbus_core::{
    encode_messages, parse_messages, BusError, ConnectionPhase, Message, MessageQueue,
    QueueSession, ServerBus,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::metrics::RelayMetrics;
use crate::rate_limit::RateLimiter;
use crate::sse;

/// Cookie carrying the HTTP session id.
pub const SESSION_COOKIE: &str = "COMETBUS_SESSION";

/// Header carrying the client id.
pub const CLIENT_ID_HEADER: &str = "RemoteQueueID";

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub bus: Arc<ServerBus>,
    pub config: Arc<RelayConfig>,
    pub metrics: RelayMetrics,
    pub rate_limiter: Arc<RateLimiter>,
    pub start_time: Instant,
    pub metrics_token: Option<String>,
}

impl HttpState {
    pub fn new(bus: Arc<ServerBus>, config: RelayConfig, metrics: RelayMetrics) -> Self {
        HttpState {
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_per_min)),
            metrics_token: config.metrics_token.clone(),
            config: Arc::new(config),
            bus,
            metrics,
            start_time: Instant::now(),
        }
    }
}

/// Query parameters understood by `/bus`.
#[derive(Debug, Default, Deserialize)]
pub struct BusQuery {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
    /// Present (any value) to request an SSE stream.
    pub sse: Option<String>,
    /// `1` makes a POST long-poll after storing.
    pub wait: Option<String>,
    /// Client connection phase (`connecting`, `disconnecting`).
    pub phase: Option<String>,
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub sessions: usize,
    pub pending_messages: usize,
}

/// Middleware to check bearer token for metrics endpoint.
async fn metrics_auth_middleware(
    State(state): State<HttpState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/metrics" {
        if let Some(ref expected_token) = state.metrics_token {
            let is_authorized = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .is_some_and(|token| token == expected_token);

            if !is_authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

/// Creates the HTTP router with the bus, health and metrics endpoints.
pub fn create_router(state: HttpState) -> Router {
    let body_limit = state.config.max_message_size;

    Router::new()
        .route("/bus", get(bus_get).post(bus_post))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/", get(root_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_auth_middleware,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Polls the caller's queue.
async fn bus_get(
    State(state): State<HttpState>,
    Query(query): Query<BusQuery>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let Some((session, created)) = resolve_session(&headers, &query) else {
        return error_response(StatusCode::BAD_REQUEST, "missing client id", None);
    };
    if !allow(&state, &rate_key(peer, &session, created)) {
        return with_session_cookie(StatusCode::TOO_MANY_REQUESTS.into_response(), &session, created);
    }
    state.metrics.polls_total.inc();

    let phase = ConnectionPhase::from_param(query.phase.as_deref());
    let response = match state.bus.get_queue(&session) {
        None => queue_missing(&state, &session, phase),
        Some(queue) => {
            queue.heartbeat();
            if query.sse.is_some() && state.config.sse_enabled {
                sse_response(&state, queue)
            } else {
                poll_response(&state, &queue, state.config.long_polling_enabled).await
            }
        }
    };

    with_session_cookie(response, &session, created)
}

/// Stores inbound messages, then polls.
async fn bus_post(
    State(state): State<HttpState>,
    Query(query): Query<BusQuery>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((session, created)) = resolve_session(&headers, &query) else {
        return error_response(StatusCode::BAD_REQUEST, "missing client id", None);
    };
    if !allow(&state, &rate_key(peer, &session, created)) {
        return with_session_cookie(StatusCode::TOO_MANY_REQUESTS.into_response(), &session, created);
    }

    if body.len() > state.config.max_message_size {
        warn!("Message too large from {}: {} bytes", session, body.len());
        return with_session_cookie(StatusCode::PAYLOAD_TOO_LARGE.into_response(), &session, created);
    }

    let messages = match parse_messages(&body) {
        Ok(messages) => messages,
        Err(e) => {
            debug!("Rejecting payload from {}: {}", session, e);
            let response =
                error_response(StatusCode::BAD_REQUEST, "invalid message payload", Some(&e.to_string()));
            return with_session_cookie(response, &session, created);
        }
    };
    state
        .metrics
        .messages_received_total
        .inc_by(messages.len() as u64);

    for message in messages {
        match state.bus.store(&session, message) {
            Ok(_) => {}
            Err(BusError::QueueUnavailable(_)) => {
                let response = disconnect_response(&state, &session);
                return with_session_cookie(response, &session, created);
            }
            Err(e) => {
                warn!("Failed to store message from {}: {}", session, e);
                let status = match e {
                    BusError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::SERVICE_UNAVAILABLE,
                };
                let response = error_response(status, "failed to store message", Some(&e.to_string()));
                return with_session_cookie(response, &session, created);
            }
        }
    }

    let phase = ConnectionPhase::from_param(query.phase.as_deref());
    let response = match state.bus.get_queue(&session) {
        None => queue_missing(&state, &session, phase),
        Some(queue) => {
            queue.heartbeat();
            let wait = query.wait.as_deref() == Some("1");
            poll_response(&state, &queue, wait).await
        }
    };

    with_session_cookie(response, &session, created)
}

/// Resolves the queue session from the request. `None` without a client id.
fn resolve_session(headers: &HeaderMap, query: &BusQuery) -> Option<(QueueSession, bool)> {
    let client_id = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.client_id.clone())
        .filter(|id| !id.is_empty())?;

    let cookie = session_cookie(headers);
    Some(QueueSession::create_or_get(cookie.as_deref(), &client_id))
}

/// Reads the session id from the `Cookie` headers.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE).then(|| value.to_string())
        })
}

fn with_session_cookie(mut response: Response, session: &QueueSession, created: bool) -> Response {
    if created {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            SESSION_COOKIE,
            session.session_id()
        );
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            Err(e) => warn!("Cannot set session cookie for {}: {}", session, e),
        }
    }
    response
}

/// Rate limit bucket for a request.
///
/// Keyed by peer address when the listener provides one. Otherwise a fresh
/// session is keyed by its client id, since its minted session id changes on
/// every cookie-less request.
fn rate_key(peer: Option<ConnectInfo<SocketAddr>>, session: &QueueSession, created: bool) -> String {
    match peer {
        Some(ConnectInfo(addr)) => addr.ip().to_string(),
        None if created => format!("client:{}", session.client_id()),
        None => session.id(),
    }
}

fn allow(state: &HttpState, key: &str) -> bool {
    if state.rate_limiter.consume(key) {
        return true;
    }
    warn!("Rate limited: {}", key);
    state.metrics.rate_limited_total.inc();
    false
}

/// Response for a request whose queue is missing or expired.
fn queue_missing(state: &HttpState, session: &QueueSession, phase: ConnectionPhase) -> Response {
    if phase.is_transient() {
        debug!("No queue for {} while {:?}", session, phase);
        return json_response(StatusCode::OK, String::new());
    }
    disconnect_response(state, session)
}

/// Tells the client its session is gone.
fn disconnect_response(state: &HttpState, session: &QueueSession) -> Response {
    debug!("Sending session expiry to {}", session);
    state.metrics.disconnects_sent_total.inc();
    json_response(StatusCode::OK, encode_messages(&[Message::session_expired()]))
}

async fn poll_response(state: &HttpState, queue: &MessageQueue, wait: bool) -> Response {
    let result = if wait {
        queue.poll(state.config.long_poll_timeout()).await
    } else {
        queue.flush()
    };

    match result {
        Ok(messages) => {
            state
                .metrics
                .messages_delivered_total
                .inc_by(messages.len() as u64);
            json_response(StatusCode::OK, encode_messages(&messages))
        }
        Err(e) => {
            warn!("Poll failed for {}: {}", queue.session(), e);
            state.metrics.poll_errors_total.inc();
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to poll message queue",
                Some(&e.to_string()),
            )
        }
    }
}

fn sse_response(state: &HttpState, queue: Arc<MessageQueue>) -> Response {
    let stream = sse::event_stream(
        queue,
        state.config.sse_timeout(),
        state.config.sse_poll_timeout(),
        state.metrics.clone(),
    );
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, NO_CACHE),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

fn json_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, NO_CACHE),
        ],
        body,
    )
        .into_response()
}

/// Error payload for the client's error channel.
fn error_response(status: StatusCode, message: &str, details: Option<&str>) -> Response {
    json_response(status, encode_messages(&[Message::error(message, details)]))
}

/// Root handler - returns basic info.
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "cometbus-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/bus", "/health", "/ready", "/metrics"]
    }))
}

/// Health check endpoint - always returns 200 if server is running.
async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

async fn ready_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(ReadyResponse {
        ready: true,
        sessions: state.bus.session_count(),
        pending_messages: state.bus.pending_count(),
    })
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    state
        .metrics
        .sessions_active
        .set(state.bus.session_count() as i64);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

// INLINE_TEST_REQUIRED: Tests private cookie and client id resolution
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_session_cookie_parsing() {
        let map = headers(&[("cookie", "theme=dark; COMETBUS_SESSION=abc; other=1")]);
        assert_eq!(session_cookie(&map).as_deref(), Some("abc"));

        let map = headers(&[("cookie", "theme=dark"), ("cookie", "COMETBUS_SESSION=xyz")]);
        assert_eq!(session_cookie(&map).as_deref(), Some("xyz"));

        assert_eq!(session_cookie(&HeaderMap::new()), None);
    }

    #[test]
    fn test_client_id_prefers_header() {
        let query = BusQuery {
            client_id: Some("from-query".to_string()),
            ..Default::default()
        };
        let map = headers(&[("remotequeueid", "from-header"), ("cookie", "COMETBUS_SESSION=s")]);

        let (session, created) = resolve_session(&map, &query).unwrap();
        assert_eq!(session, QueueSession::new("s", "from-header"));
        assert!(!created);

        let (session, _) = resolve_session(&headers(&[]), &query).unwrap();
        assert_eq!(session.client_id(), "from-query");
    }

    #[test]
    fn test_missing_client_id() {
        assert!(resolve_session(&HeaderMap::new(), &BusQuery::default()).is_none());

        let query = BusQuery {
            client_id: Some(String::new()),
            ..Default::default()
        };
        assert!(resolve_session(&HeaderMap::new(), &query).is_none());
    }

    #[test]
    fn test_new_session_sets_cookie() {
        let session = QueueSession::new("abc", "1");
        let response = with_session_cookie(StatusCode::OK.into_response(), &session, true);
        assert_eq!(
            response.headers().get(header::SET_COOKIE).unwrap(),
            "COMETBUS_SESSION=abc; Path=/; HttpOnly; SameSite=Lax"
        );

        let response = with_session_cookie(StatusCode::OK.into_response(), &session, false);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[test]
    fn test_rate_key_ignores_minted_session() {
        let addr: SocketAddr = "10.0.0.7:40123".parse().unwrap();
        let (first, created) = QueueSession::create_or_get(None, "c1");
        let (second, _) = QueueSession::create_or_get(None, "c1");
        assert!(created);

        assert_eq!(rate_key(Some(ConnectInfo(addr)), &first, true), "10.0.0.7");
        assert_eq!(rate_key(None, &first, true), rate_key(None, &second, true));

        let known = QueueSession::new("s", "c1");
        assert_eq!(rate_key(None, &known, false), "s-c1");
    }

    #[test]
    fn test_transient_phase_is_silent() {
        let bus = Arc::new(ServerBus::new(Default::default(), Duration::from_secs(60)));
        let state = HttpState::new(bus, RelayConfig::default(), RelayMetrics::new().unwrap());
        let session = QueueSession::new("s", "1");

        queue_missing(&state, &session, ConnectionPhase::Connecting);
        assert_eq!(state.metrics.disconnects_sent_total.get(), 0);

        queue_missing(&state, &session, ConnectionPhase::Unknown);
        assert_eq!(state.metrics.disconnects_sent_total.get(), 1);
    }
}
