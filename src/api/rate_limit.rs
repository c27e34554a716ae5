use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use dashmap::DashMap;
use serde_json::json;
use tokio::time::Instant;

/// Fixed-window request counter per client. Sits in front of every route;
/// counts reset when a window expires rather than sliding.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: DashMap<String, WindowSlot>,
    last_sweep: Mutex<Instant>,
}

struct WindowSlot {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Records one hit for `client` and reports whether it is still within
    /// the window budget.
    pub fn check(&self, client: &str) -> bool {
        let now = Instant::now();
        self.sweep(now);
        let mut slot = self.windows.entry(client.to_string()).or_insert(WindowSlot {
            started: now,
            count: 0,
        });
        if now.duration_since(slot.started) >= self.window {
            slot.started = now;
            slot.count = 0;
        }
        slot.count += 1;
        slot.count <= self.max_requests
    }

    /// Drops slots whose window has expired, at most once per window, so the
    /// map does not grow with every distinct client ever seen.
    fn sweep(&self, now: Instant) {
        let Ok(mut last) = self.last_sweep.lock() else {
            return;
        };
        if now.duration_since(*last) < self.window {
            return;
        }
        *last = now;
        drop(last);
        self.windows
            .retain(|_, slot| now.duration_since(slot.started) < self.window);
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request);
    if !limiter.check(&client) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Too many requests, please try again later." })),
        )
            .into_response();
    }
    next.run(request).await
}

/// Proxy-forwarded address first, then the socket peer. Requests with
/// neither (in-process tests) share one bucket.
fn client_key(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        // Other clients have their own window.
        assert!(limiter.check("10.0.0.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_resets_the_count() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check("10.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_slots_are_swept_from_the_map() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.2"));
        assert_eq!(limiter.windows.len(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check("10.0.0.3"));
        // Only the fresh client survives the sweep.
        assert_eq!(limiter.windows.len(), 1);
        assert!(limiter.windows.contains_key("10.0.0.3"));
    }
}
