use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
    Json,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::types::ApiResponse;

pub(super) const DEFAULT_API_RATE_LIMIT_PER_SEC: u32 = 120;
const MAX_TRACKED_CLIENTS: usize = 4096;

#[derive(Clone)]
pub(super) struct ApiSecurity {
    pub required_token: Option<String>,
    pub rate_limit_per_sec: u32,
    pub buckets: Arc<Mutex<HashMap<String, RateBucket>>>,
}

#[derive(Clone)]
pub(super) struct RateBucket {
    pub window_start: Instant,
    pub count: u32,
}

impl ApiSecurity {
    pub(super) fn new(required_token: Option<String>, rate_limit_per_sec: u32) -> Self {
        Self {
            required_token,
            rate_limit_per_sec: rate_limit_per_sec.max(1),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(super) fn from_env() -> Self {
        let required_token = std::env::var("GAMEQUEST_API_TOKEN")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let rate_limit_per_sec = std::env::var("GAMEQUEST_API_RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_API_RATE_LIMIT_PER_SEC);
        Self::new(required_token, rate_limit_per_sec)
    }

    fn authorized(&self, req: &Request) -> bool {
        let Some(expected) = self.required_token.as_deref() else {
            return true;
        };
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .unwrap_or("")
        };
        let auth = header("authorization");
        let bearer = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .unwrap_or(auth);
        bearer == expected || header("x-api-key") == expected
    }

    /// Fixed one-second window per client key.
    fn admit(&self, client: String) -> bool {
        let Ok(mut buckets) = self.buckets.lock() else {
            return false;
        };
        let now = Instant::now();
        let entry = buckets.entry(client).or_insert(RateBucket {
            window_start: now,
            count: 0,
        });
        if now.duration_since(entry.window_start).as_secs_f32() >= 1.0 {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);
        let admitted = entry.count <= self.rate_limit_per_sec;
        if buckets.len() > MAX_TRACKED_CLIENTS {
            buckets.retain(|_, v| now.duration_since(v.window_start).as_secs_f32() < 10.0);
        }
        admitted
    }
}

pub(super) async fn api_guard(
    State(security): State<ApiSecurity>,
    req: Request,
    next: Next,
) -> axum::response::Response {
    if !security.authorized(&req) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::err(
                "Unauthorized: send Authorization: Bearer <GAMEQUEST_API_TOKEN>",
            )),
        )
            .into_response();
    }

    let client = req
        .headers()
        .get("x-forwarded-for")
        .or_else(|| req.headers().get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("local")
        .to_string();
    if !security.admit(client) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::err("Rate limit exceeded")),
        )
            .into_response();
    }

    next.run(req).await
}
