//! Request rate limiting for the HTTP surface.
//!
//! A global limiter for reads and a stricter one for writes. Single-node
//! service, so in-process token buckets are sufficient.

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

pub const READ_REQUESTS_PER_MINUTE: u32 = 600;
pub const WRITE_REQUESTS_PER_MINUTE: u32 = 120;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct RateLimitState {
    read_limiter: Arc<DirectLimiter>,
    write_limiter: Arc<DirectLimiter>,
}

impl RateLimitState {
    pub fn new() -> Self {
        Self::with_quotas(READ_REQUESTS_PER_MINUTE, WRITE_REQUESTS_PER_MINUTE)
    }

    pub fn with_quotas(reads_per_minute: u32, writes_per_minute: u32) -> Self {
        let read_quota =
            Quota::per_minute(NonZeroU32::new(reads_per_minute.max(1)).unwrap_or(NonZeroU32::MIN));
        let write_quota = Quota::per_minute(
            NonZeroU32::new(writes_per_minute.max(1)).unwrap_or(NonZeroU32::MIN),
        );
        Self {
            read_limiter: Arc::new(RateLimiter::direct(read_quota)),
            write_limiter: Arc::new(RateLimiter::direct(write_quota)),
        }
    }

    fn check(&self, method: &Method) -> bool {
        let is_write = matches!(
            *method,
            Method::POST | Method::PATCH | Method::PUT | Method::DELETE
        );
        // `check()` consumes a token on success, so each request may touch
        // exactly one bucket: a rejected request must not spend the other
        // class's allowance.
        if is_write {
            self.write_limiter.check().is_ok()
        } else {
            self.read_limiter.check().is_ok()
        }
    }
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !state.check(request.method()) {
        warn!(
            "Rate limit exceeded: {} {}",
            request.method(),
            request.uri().path()
        );
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(request).await)
}
