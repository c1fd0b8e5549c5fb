use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use std::sync::Arc;

use super::{api_error, ApiError};
use crate::booking::{coupon, fit, session::SlotView};
use crate::models::*;
use crate::AppState;

/// Duration assumed by the public grid when the caller gives none.
const DEFAULT_GRID_DURATION: u32 = fit::SLOT_MINUTES;

fn lookup_failed(what: &str, e: impl std::fmt::Display) -> ApiError {
    tracing::error!("{}: {}", what, e);
    api_error(StatusCode::BAD_GATEWAY, "Could not load data, please try again")
}

/// GET /api/services — active services in display order.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Service>>>, ApiError> {
    let catalog = state
        .cache
        .catalog(state.store.as_ref())
        .await
        .map_err(|e| lookup_failed("list_services", e))?;
    Ok(Json(ApiResponse::success(catalog.services.clone())))
}

/// GET /api/jewelry — in-stock jewelry only.
pub async fn list_jewelry(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<JewelryItem>>>, ApiError> {
    let catalog = state
        .cache
        .catalog(state.store.as_ref())
        .await
        .map_err(|e| lookup_failed("list_jewelry", e))?;
    Ok(Json(ApiResponse::success(catalog.in_stock_jewelry())))
}

/// GET /api/availability?date=YYYY-MM-DD&duration=N
pub async fn availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<ApiResponse<AvailabilityResponse>>, ApiError> {
    let date = NaiveDate::parse_from_str(query.date.trim(), "%Y-%m-%d").map_err(|_| {
        api_error(StatusCode::UNPROCESSABLE_ENTITY, "date must be YYYY-MM-DD")
    })?;
    let duration = query.duration.unwrap_or(DEFAULT_GRID_DURATION);

    let slots = state
        .engine
        .availability()
        .slots_for(date)
        .await
        .map_err(|e| lookup_failed("availability", e))?;
    let selectable = fit::selectable(&slots, duration);

    Ok(Json(ApiResponse::success(AvailabilityResponse {
        date: date.to_string(),
        duration,
        slots: slots
            .into_iter()
            .zip(selectable)
            .map(|(s, selectable)| SlotView {
                time: s.time,
                available: s.available,
                selectable,
            })
            .collect(),
    })))
}

/// POST /api/coupons/validate — check a code against a base price.
///
/// An unreachable store is reported as "could not verify", never as an
/// invalid code.
pub async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidateCouponRequest>,
) -> Result<Json<ApiResponse<CouponCheckResponse>>, ApiError> {
    let result = coupon::validate(state.store.as_ref(), &body.code, body.base_price)
        .await
        .map_err(|e| {
            tracing::warn!("coupon lookup failed: {}", e);
            api_error(
                StatusCode::BAD_GATEWAY,
                "Could not verify coupon, please try again",
            )
        })?;

    let response = match result {
        Ok(coupon) => CouponCheckResponse {
            is_valid: true,
            coupon: Some(coupon),
            error: None,
        },
        Err(rejection) => CouponCheckResponse {
            is_valid: false,
            coupon: None,
            error: Some(rejection.to_string()),
        },
    };
    Ok(Json(ApiResponse::success(response)))
}
