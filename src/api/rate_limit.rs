//! Per-client request rate limiting on the Control API, distinct from the
//! outbound per-domain limiter in [`crate::ratelimit`]: this one protects
//! the API surface itself from a single caller hammering it, counting
//! requests rather than pacing them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;

use super::AppState;

struct Window {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window request counter keyed by client identity. A window resets
/// to zero once it expires rather than sliding, trading precision for the
/// same `HashMap`-under-`Mutex` simplicity as [`crate::ratelimit::RateLimiter`].
pub struct ApiRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    limit: u32,
    window: Duration,
}

pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub window_s: u64,
    pub retry_after_s: u64,
}

impl ApiRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit: limit.max(1),
            window,
        }
    }

    async fn check(&self, client: &str) -> Decision {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(client.to_string()).or_insert_with(|| Window {
            count: 0,
            reset_at: now + self.window,
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }

        let retry_after_s = entry.reset_at.saturating_duration_since(now).as_secs();
        if entry.count >= self.limit {
            return Decision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                window_s: self.window.as_secs(),
                retry_after_s,
            };
        }

        entry.count += 1;
        Decision {
            allowed: true,
            limit: self.limit,
            remaining: self.limit - entry.count,
            window_s: self.window.as_secs(),
            retry_after_s,
        }
    }
}

/// Identifies the caller by `X-Forwarded-For`/`X-Real-IP` when present
/// (set by a reverse proxy in front of this process), else the observed
/// peer address from `ConnectInfo`.
fn client_key(request: &Request<Body>, peer: SocketAddr) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let real_ip = request
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty());

    format!("ip:{}", forwarded.or(real_ip).unwrap_or(&peer.ip().to_string()))
}

/// Applies the fixed-window limit and stamps every response with
/// `X-RateLimit-*` headers, mirroring the same contract a reverse-proxy
/// limiter would expose. Exceeding the limit short-circuits with 429 and
/// `Retry-After` before the request reaches its handler.
pub async fn enforce(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(&request, peer);
    let decision = state.api_rate_limiter.check(&client).await;

    if !decision.allowed {
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        stamp_headers(&mut response, &decision);
        if let Ok(value) = HeaderValue::from_str(&decision.retry_after_s.to_string()) {
            response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
        }
        return response;
    }

    let mut response = next.run(request).await;
    stamp_headers(&mut response, &decision);
    response
}

fn stamp_headers(response: &mut Response, decision: &Decision) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.window_s.to_string()) {
        headers.insert("x-ratelimit-window", v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_the_limit_then_blocks() {
        let limiter = ApiRateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("ip:1.2.3.4").await.allowed);
        assert!(limiter.check("ip:1.2.3.4").await.allowed);
        let blocked = limiter.check("ip:1.2.3.4").await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
    }

    #[tokio::test]
    async fn different_clients_have_independent_windows() {
        let limiter = ApiRateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("ip:1.2.3.4").await.allowed);
        assert!(limiter.check("ip:5.6.7.8").await.allowed);
    }

    #[tokio::test]
    async fn window_resets_after_it_expires() {
        let limiter = ApiRateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.check("ip:1.2.3.4").await.allowed);
        assert!(!limiter.check("ip:1.2.3.4").await.allowed);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.check("ip:1.2.3.4").await.allowed);
    }
}
