//! Shared axum plumbing: JSON response envelopes, the allow-all CORS
//! policy, and the coarse per-client throttle applied in front of the
//! intake routes.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    body,
    extract::{ConnectInfo, Request, State},
    http::{header::CONTENT_TYPE, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

/// Result type for intake handlers.
pub type ServerResult<T> = Result<T, ServerErrorResponse>;

/// A successful JSON response; the wrapped value is the whole body.
#[derive(Clone, Debug)]
pub struct ServerSuccessResponse<T: Serialize> {
    status_code: StatusCode,
    result: T,
}

impl<T: Serialize> ServerSuccessResponse<T> {
    /// 200 OK.
    pub fn new(result: T) -> Self {
        Self {
            status_code: StatusCode::OK,
            result,
        }
    }

    /// 201 Created, for freshly admitted jobs.
    pub fn created(result: T) -> Self {
        Self {
            status_code: StatusCode::CREATED,
            result,
        }
    }
}

impl<T: Serialize> IntoResponse for ServerSuccessResponse<T> {
    fn into_response(self) -> Response<body::Body> {
        let json_body = serde_json::to_string(&self.result).unwrap_or("{}".to_owned());
        Response::builder()
            .header(CONTENT_TYPE, "application/json")
            .status(self.status_code)
            .body(body::Body::new(json_body))
            .expect("Failed to build response")
    }
}

/// Body shape of every error response.
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct ServerErrorBody {
    /// Human-readable reason.
    pub error: String,
}

/// An unsuccessful JSON response.
#[derive(Clone, Debug)]
pub struct ServerErrorResponse {
    /// Status code to send.
    pub status_code: StatusCode,
    /// JSON body to send.
    pub body: ServerErrorBody,
}

impl ServerErrorResponse {
    /// Build an error response with `error` as the body reason.
    pub fn new(status_code: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status_code,
            body: ServerErrorBody {
                error: error.into(),
            },
        }
    }
}

impl IntoResponse for ServerErrorResponse {
    fn into_response(self) -> Response<body::Body> {
        let json_body = serde_json::to_string(&self.body).unwrap_or("{}".to_owned());
        Response::builder()
            .header(CONTENT_TYPE, "application/json")
            .status(self.status_code)
            .body(body::Body::new(json_body))
            .expect("Failed to build response")
    }
}

/// Allow-all CORS for the intake surface.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Keyed limiter shared by the throttle middleware.
pub type IpRateLimiter =
    governor::RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// A per-client limiter admitting `per_second` requests per IP.
pub fn ip_rate_limiter(per_second: u32) -> Arc<IpRateLimiter> {
    let quota = Quota::per_second(NonZeroU32::new(per_second).expect("nonzero throttle"));
    Arc::new(governor::RateLimiter::keyed(quota))
}

/// Middleware rejecting clients that exceed the per-IP quota with 429.
pub async fn throttle_by_ip(
    State(limiter): State<Arc<IpRateLimiter>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response<body::Body> {
    if limiter.check_key(&addr.ip()).is_err() {
        return ServerErrorResponse::new(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
            .into_response();
    }
    next.run(request).await
}
