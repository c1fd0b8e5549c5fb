use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

type TierMap = DashMap<Tier, (RateLimitConfig, DashMap<IpAddr, Vec<Instant>>)>;

// ── Configuration ──

/// Route groups with their own request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Catalog, availability and coupon checks.
    Public,
    /// Booking session edits.
    Session,
    /// Booking submission.
    Submit,
    Admin,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Public, Tier::Session, Tier::Submit, Tier::Admin];

    pub fn default_config(self) -> RateLimitConfig {
        let (max_requests, secs) = match self {
            Tier::Public => (60, 60),
            Tier::Session => (120, 60),
            Tier::Submit => (5, 300),
            Tier::Admin => (120, 60),
        };
        RateLimitConfig {
            max_requests,
            window: Duration::from_secs(secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed within the sliding window.
    pub max_requests: u32,
    pub window: Duration,
}

// ── Core Rate Limiter ──

/// In-memory per-IP rate limiter using sliding window counters.
///
/// Keys are client IP addresses; values are the timestamps of requests still
/// inside the window.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tiers: Arc<TierMap>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        let limiter = Self::empty();
        for tier in Tier::ALL {
            limiter.configure(tier, tier.default_config());
        }
        limiter
    }
}

impl RateLimiter {
    /// Limiter with every tier at its default budget.
    pub fn new() -> Self {
        Self::default()
    }

    fn empty() -> Self {
        Self {
            tiers: Arc::new(DashMap::new()),
        }
    }

    /// Replace a tier's budget, resetting its counters.
    pub fn configure(&self, tier: Tier, config: RateLimitConfig) {
        self.tiers.insert(tier, (config, DashMap::new()));
    }

    /// Returns `Err(retry_after_secs)` if `ip` has used up its budget.
    pub fn check(&self, tier: Tier, ip: IpAddr) -> Result<(), u64> {
        let Some(tier_entry) = self.tiers.get(&tier) else {
            return Ok(());
        };
        let (config, ip_map) = tier_entry.value();
        let now = Instant::now();

        let mut entry = ip_map.entry(ip).or_default();
        entry.retain(|t| now.duration_since(*t) < config.window);

        if entry.len() >= config.max_requests as usize {
            // Time until the oldest request leaves the window
            let oldest = entry[0];
            let retry_after = (oldest + config.window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        entry.push(now);
        Ok(())
    }

    /// Drop entries older than twice the window. Run from a background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        for tier_entry in self.tiers.iter() {
            let (config, ip_map) = tier_entry.value();
            let cutoff = config.window * 2;
            ip_map.retain(|_ip, timestamps| {
                timestamps.retain(|t| now.duration_since(*t) < cutoff);
                !timestamps.is_empty()
            });
        }
    }
}

// ── IP Extraction ──

/// First hop of X-Forwarded-For when behind a proxy, else the peer address.
pub fn extract_client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first_ip) = forwarded.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

// ── 429 Response Builder ──

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(format!(
        "Too many requests. Try again in {} seconds",
        retry_after
    ));
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

// ── Middleware ──

/// Use with `from_fn_with_state((limiter, Tier::X), rate_limit)`.
pub async fn rate_limit(
    State((limiter, tier)): State<(RateLimiter, Tier)>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = extract_client_ip(&req);
    limiter.check(tier, ip).map_err(|retry_after| {
        tracing::warn!("Rate limit hit: {:?} tier, ip {}", tier, ip);
        too_many_requests(retry_after)
    })?;
    Ok(next.run(req).await)
}

// ── Tests ──
