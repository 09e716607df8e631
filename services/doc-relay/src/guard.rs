//! Inbound request guards: CORS, origin enforcement and per-client rate limiting

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

pub const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again later.";

/// Client windows kept before expired ones are swept.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// CORS headers for browser callers.
///
/// With an allowed origin only that origin is echoed back; without one any
/// origin is accepted.
pub fn cors_layer(
    allowed_origin: Option<&str>,
) -> Result<CorsLayer, axum::http::header::InvalidHeaderValue> {
    let Some(origin) = allowed_origin else {
        warn!("no allowed_origin configured, CORS allows all origins");
        return Ok(CorsLayer::permissive());
    };
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::exact(HeaderValue::from_str(origin)?))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]))
}

/// Reject browser requests from any origin but the configured one.
///
/// Requests without an `Origin` header (server-to-server callers, curl) pass.
pub async fn enforce_origin(
    State(allowed): State<HeaderValue>,
    request: Request,
    next: Next,
) -> Response {
    match request.headers().get(ORIGIN) {
        Some(origin) if *origin != allowed => {
            warn!(origin = ?origin, "request from disallowed origin rejected");
            (
                StatusCode::FORBIDDEN,
                axum::Json(serde_json::json!({"error": "CORS policy violation"})),
            )
                .into_response()
        }
        _ => next.run(request).await,
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window request counter per client IP.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Count one request for `key`.
    ///
    /// Returns the remaining allowance, or the time until the window resets
    /// once the allowance is used up.
    pub async fn check(&self, key: &str) -> Result<u32, Duration> {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;

        if clients.len() >= MAX_TRACKED_CLIENTS {
            clients.retain(|_, w| w.reset_at > now);
        }

        let window = clients.entry(key.to_owned()).or_insert(Window {
            count: 0,
            reset_at: now + self.window,
        });
        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + self.window;
        }

        if window.count < self.max_requests {
            window.count += 1;
            Ok(self.max_requests - window.count)
        } else {
            Err(window.reset_at.saturating_duration_since(now))
        }
    }
}

/// Rate limit by peer IP, as reported by the listener's connect info.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned());

    match limiter.check(&key).await {
        Ok(remaining) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(limiter.max_requests));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
            response
        }
        Err(reset_in) => {
            warn!(client = %key, path = %request.uri().path(), "rate limit exceeded");
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                axum::Json(serde_json::json!({"error": RATE_LIMIT_MESSAGE})),
            )
                .into_response();
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(limiter.max_requests));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
            headers.insert("Retry-After", HeaderValue::from(reset_in.as_secs().max(1)));
            response
        }
    }
}
