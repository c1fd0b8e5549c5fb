//! Admin endpoints. Authentication is enforced by [`crate::auth::require_admin`]
//! on the whole route group; every write invalidates the catalog cache.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use std::sync::Arc;

use super::{api_error, store_error, ApiError};
use crate::models::*;
use crate::store::StudioStore;
use crate::AppState;

type AdminResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ── Services ──

/// GET /api/admin/services — every service, including inactive ones
pub async fn list_services(State(state): State<Arc<AppState>>) -> AdminResult<Vec<Service>> {
    let services = state.store.all_services().await.map_err(store_error)?;
    Ok(Json(ApiResponse::success(services)))
}

/// POST /api/admin/services
pub async fn create_service(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateServiceRequest>,
) -> AdminResult<Service> {
    let service = state.store.create_service(&body).await.map_err(store_error)?;
    state.cache.invalidate().await;
    tracing::info!("Service {} created: {}", service.id, service.name);
    Ok(Json(ApiResponse::success(service)))
}

/// PUT /api/admin/services/{id}
pub async fn update_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateServiceRequest>,
) -> AdminResult<Service> {
    let service = state.store.update_service(id, &body).await.map_err(store_error)?;
    state.cache.invalidate().await;
    Ok(Json(ApiResponse::success(service)))
}

// ── Jewelry ──

/// GET /api/admin/jewelry — including out-of-stock items
pub async fn list_jewelry(State(state): State<Arc<AppState>>) -> AdminResult<Vec<JewelryItem>> {
    let jewelry = state.store.list_jewelry().await.map_err(store_error)?;
    Ok(Json(ApiResponse::success(jewelry)))
}

/// POST /api/admin/jewelry
pub async fn create_jewelry(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateJewelryRequest>,
) -> AdminResult<JewelryItem> {
    let item = state.store.create_jewelry(&body).await.map_err(store_error)?;
    state.cache.invalidate().await;
    Ok(Json(ApiResponse::success(item)))
}

/// PUT /api/admin/jewelry/{id}
pub async fn update_jewelry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateJewelryRequest>,
) -> AdminResult<JewelryItem> {
    let item = state.store.update_jewelry(id, &body).await.map_err(store_error)?;
    state.cache.invalidate().await;
    Ok(Json(ApiResponse::success(item)))
}

// ── Coupons ──

/// GET /api/admin/coupons
pub async fn list_coupons(State(state): State<Arc<AppState>>) -> AdminResult<Vec<Coupon>> {
    let coupons = state.store.list_coupons().await.map_err(store_error)?;
    Ok(Json(ApiResponse::success(coupons)))
}

/// POST /api/admin/coupons
pub async fn create_coupon(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCouponRequest>,
) -> AdminResult<Coupon> {
    let coupon = state.store.create_coupon(&body).await.map_err(store_error)?;
    tracing::info!("Coupon {} created", coupon.code);
    Ok(Json(ApiResponse::success(coupon)))
}

/// PUT /api/admin/coupons/{id}
pub async fn update_coupon(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateCouponRequest>,
) -> AdminResult<Coupon> {
    let coupon = state.store.update_coupon(id, &body).await.map_err(store_error)?;
    Ok(Json(ApiResponse::success(coupon)))
}

// ── Settings ──

/// GET /api/admin/settings
pub async fn get_settings(State(state): State<Arc<AppState>>) -> AdminResult<StudioSettings> {
    let settings = state.store.studio_settings().await.map_err(store_error)?;
    Ok(Json(ApiResponse::success(settings)))
}

/// PUT /api/admin/settings — working hours are validated before saving
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StudioSettings>,
) -> AdminResult<StudioSettings> {
    body.working_hours
        .validate()
        .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    state.store.save_settings(&body).await.map_err(store_error)?;
    state.cache.invalidate().await;
    tracing::info!(
        "Studio settings updated (AI stylist {})",
        if body.ai_stylist_enabled { "on" } else { "off" }
    );
    Ok(Json(ApiResponse::success(body)))
}

// ── Appointments ──

/// GET /api/admin/appointments?date=YYYY-MM-DD&status=pending
pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AppointmentsQuery>,
) -> AdminResult<Vec<Appointment>> {
    let date = query
        .date
        .as_deref()
        .map(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d"))
        .transpose()
        .map_err(|_| api_error(StatusCode::UNPROCESSABLE_ENTITY, "date must be YYYY-MM-DD"))?;

    let appointments = state
        .store
        .list_appointments(date, query.status, state.engine.availability().timezone())
        .await
        .map_err(store_error)?;
    Ok(Json(ApiResponse::success(appointments)))
}

/// PUT /api/admin/appointments/{id}/status — pending → confirmed | cancelled
pub async fn update_appointment_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateStatusRequest>,
) -> AdminResult<Appointment> {
    let appointment = state
        .store
        .update_appointment_status(id, body.status)
        .await
        .map_err(store_error)?;
    tracing::info!("Appointment {} is now {:?}", id, appointment.status);
    Ok(Json(ApiResponse::success(appointment)))
}
