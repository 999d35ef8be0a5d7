use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::time::Instant;

use crate::error::{Error, ErrorKind};

const WINDOW: Duration = Duration::from_secs(1);
const MAX_TRACKED_CLIENTS: usize = 10_000;

#[derive(Debug)]
struct WindowState {
    start: Instant,
    count: u32,
}

/// Fixed one-second window per client address.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    rps: u32,
    max_clients: usize,
    trust_forwarded_for: bool,
    windows: Arc<Mutex<HashMap<String, WindowState>>>,
}

impl RateLimiter {
    pub fn new(rps: u32) -> Self {
        Self {
            rps: rps.max(1),
            max_clients: MAX_TRACKED_CLIENTS,
            trust_forwarded_for: false,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients.max(1);
        self
    }

    /// Key clients on `x-forwarded-for`. Only for deployments behind a proxy
    /// that overwrites the header.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn allow(&self, key: &str) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        if !windows.contains_key(key) && windows.len() >= self.max_clients {
            windows.retain(|_, w| now.duration_since(w.start) < WINDOW);
            if windows.len() >= self.max_clients {
                return false;
            }
        }
        let window = windows.entry(key.to_string()).or_insert(WindowState {
            start: now,
            count: 0,
        });
        if now.duration_since(window.start) >= WINDOW {
            window.start = now;
            window.count = 0;
        }
        if window.count < self.rps {
            window.count += 1;
            true
        } else {
            false
        }
    }

    fn client_key(&self, req: &Request<Body>) -> String {
        if self.trust_forwarded_for {
            let forwarded = req
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty());
            if let Some(ip) = forwarded {
                return format!("ip:{}", ip);
            }
        }
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
            .unwrap_or_else(|| "anonymous".to_string())
    }
}

pub async fn rps_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = limiter.client_key(&req);
    if !limiter.allow(&key) {
        tracing::debug!(key = %key, "rate limit exceeded");
        return Error::backend(ErrorKind::TooManyRequests, "rate limit exceeded").into_response();
    }
    next.run(req).await
}
