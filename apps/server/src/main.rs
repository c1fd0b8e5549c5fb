mod auth;
mod booking;
mod cache;
mod clients;
mod config;
mod db;
mod handlers;
mod models;
mod rate_limit;
mod store;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use booking::engine::BookingEngine;
use cache::CatalogCache;
use clients::storage::HttpImageStorage;
use clients::stylist::HttpStylist;
use config::Config;
use db::SqliteStore;
use rate_limit::{rate_limit, RateLimiter, Tier};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub cache: Arc<CatalogCache>,
    pub engine: BookingEngine,
    pub admin_key: auth::AdminKey,
    pub started_at: Instant,
}

/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;
/// Idle booking session sweep interval (seconds).
const SESSION_SWEEP_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Tracing ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    let config = Config::from_env()?;

    if config.stylist_api_url.is_none() || config.stylist_api_key.is_none() {
        tracing::warn!("STYLIST_API_URL or STYLIST_API_KEY not set, image analysis will be unavailable");
    }
    if config.storage_upload_url.is_none() {
        tracing::warn!("STORAGE_UPLOAD_URL not set, reference images will be stored inline");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    db::run_migrations(&pool).await?;

    let state = build_state(
        SqliteStore::new(pool),
        &config,
        Arc::new(HttpStylist::new(
            config.stylist_api_url.clone(),
            config.stylist_api_key.clone(),
        )),
        Arc::new(HttpImageStorage::new(
            config.storage_upload_url.clone(),
            config.storage_token.clone(),
        )),
    );

    // ── Background task: drop idle booking sessions ──
    let sweep_state = state.clone();
    let ttl = config.session_ttl;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_SWEEP_SECS));
        loop {
            interval.tick().await;
            let dropped = sweep_state.engine.sweep_idle(ttl);
            if dropped > 0 {
                tracing::info!("Dropped {} idle booking sessions", dropped);
            }
        }
    });

    // ── Rate limiter ──
    let rate_limiter = RateLimiter::new();

    // ── Background task: cleanup stale rate limit entries ──
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = match &config.webapp_url {
        Some(webapp_url) => {
            let origins: Vec<axum::http::HeaderValue> = vec![
                webapp_url.parse()?,
                axum::http::HeaderValue::from_static("http://localhost:5173"), // Vite dev server
            ];
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = router(state, rate_limiter)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Piercing studio server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn build_state(
    store: SqliteStore,
    config: &Config,
    stylist: Arc<dyn clients::stylist::Stylist>,
    storage: Arc<dyn clients::storage::ImageStorage>,
) -> Arc<AppState> {
    let store = Arc::new(store);
    let cache = Arc::new(CatalogCache::new());
    let engine = BookingEngine::new(
        store.clone(),
        cache.clone(),
        stylist,
        storage,
        config.studio_timezone,
    );
    Arc::new(AppState {
        store,
        cache,
        engine,
        admin_key: auth::AdminKey::new(&config.admin_token),
        started_at: Instant::now(),
    })
}

/// Route groups, each with its own rate limit tier.
fn router(state: Arc<AppState>, limiter: RateLimiter) -> Router {
    let limit = |tier: Tier| from_fn_with_state((limiter.clone(), tier), rate_limit);

    // 1. No limit: health check
    let no_limit_routes = Router::new().route("/api/health", get(handlers::health::health));

    // 2. Public: catalog, availability, coupon check
    let public_routes = Router::new()
        .route("/api/services", get(handlers::client::list_services))
        .route("/api/jewelry", get(handlers::client::list_jewelry))
        .route("/api/availability", get(handlers::client::availability))
        .route(
            "/api/coupons/validate",
            post(handlers::client::validate_coupon),
        )
        .layer(limit(Tier::Public));

    // 3. Booking session edits
    let session = "/api/booking/sessions/{id}";
    let session_routes = Router::new()
        .route(
            "/api/booking/sessions",
            post(handlers::booking::create_session),
        )
        .route(session, get(handlers::booking::get_session))
        .route(
            &format!("{session}/services"),
            put(handlers::booking::select_services),
        )
        .route(
            &format!("{session}/jewelry"),
            put(handlers::booking::select_jewelry),
        )
        .route(&format!("{session}/date"), put(handlers::booking::pick_date))
        .route(&format!("{session}/slot"), put(handlers::booking::pick_slot))
        .route(
            &format!("{session}/details"),
            put(handlers::booking::update_details),
        )
        .route(
            &format!("{session}/consent"),
            put(handlers::booking::update_consent),
        )
        .route(
            &format!("{session}/coupon"),
            post(handlers::booking::apply_coupon).delete(handlers::booking::remove_coupon),
        )
        .route(
            &format!("{session}/stylist/analyze"),
            post(handlers::booking::analyze),
        )
        .route(
            &format!("{session}/stylist/skip"),
            post(handlers::booking::skip_stylist),
        )
        .route(&format!("{session}/next"), post(handlers::booking::next_step))
        .route(
            &format!("{session}/back"),
            post(handlers::booking::previous_step),
        )
        .layer(limit(Tier::Session));

    // 4. Submission: strictest limit (5 req/5min)
    let submit_routes = Router::new()
        .route(&format!("{session}/submit"), post(handlers::booking::submit))
        .layer(limit(Tier::Submit));

    // 5. Admin: bearer token, 120 req/min
    let admin_routes = Router::new()
        .route(
            "/api/admin/services",
            get(handlers::admin::list_services).post(handlers::admin::create_service),
        )
        .route(
            "/api/admin/services/{id}",
            put(handlers::admin::update_service),
        )
        .route(
            "/api/admin/jewelry",
            get(handlers::admin::list_jewelry).post(handlers::admin::create_jewelry),
        )
        .route(
            "/api/admin/jewelry/{id}",
            put(handlers::admin::update_jewelry),
        )
        .route(
            "/api/admin/coupons",
            get(handlers::admin::list_coupons).post(handlers::admin::create_coupon),
        )
        .route(
            "/api/admin/coupons/{id}",
            put(handlers::admin::update_coupon),
        )
        .route(
            "/api/admin/settings",
            get(handlers::admin::get_settings).put(handlers::admin::update_settings),
        )
        .route(
            "/api/admin/appointments",
            get(handlers::admin::list_appointments),
        )
        .route(
            "/api/admin/appointments/{id}/status",
            put(handlers::admin::update_appointment_status),
        )
        .route_layer(from_fn_with_state(state.clone(), auth::require_admin))
        .layer(limit(Tier::Admin));

    Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(session_routes)
        .merge(submit_routes)
        .merge(admin_routes)
        .with_state(state)
}
