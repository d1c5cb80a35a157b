//! Request-path middleware: telemetry and rate limiting.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, histogram};
use tracing::info;

use crate::cluster::client_ip;
use crate::error::ApiError;
use crate::metrics::{REQUEST_COUNT, REQUEST_LATENCY};
use crate::server::rate_limit::Quota;
use crate::server::AppState;

/// The connection peer, when the server was set up with connect info.
/// Falls back to the unspecified address so a missing extension (e.g.
/// under in-process test harnesses) never fails the request.
fn peer_addr(request: &Request) -> SocketAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0)
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)))
}

/// Structured request log plus the request counter and latency
/// histogram. The counter is labelled with the matched route pattern
/// rather than the raw path to keep cardinality bounded.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let ip = client_ip(request.headers(), peer_addr(&request));

    let response = next.run(request).await;

    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();

    info!(
        method = %method,
        path = %path,
        status,
        response_time = elapsed,
        client_ip = %ip,
        "HTTP request"
    );
    counter!(
        REQUEST_COUNT,
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => status.to_string(),
    )
    .increment(1);
    histogram!(REQUEST_LATENCY).record(elapsed);

    response
}

/// Token-bucket admission for one route class. Applied per route
/// group with that group's quota.
pub async fn enforce_rate_limit(
    State((state, quota)): State<(AppState, Quota)>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), peer_addr(&request));
    if !state.limiter.check(&quota, &ip.to_string()) {
        return ApiError::RateLimited.into_response();
    }
    next.run(request).await
}
