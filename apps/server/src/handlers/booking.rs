use axum::{
    extract::{Path, State},
    Json,
};
use base64::Engine as _;
use std::sync::Arc;
use uuid::Uuid;

use super::{booking_error, ApiError};
use crate::booking::error::{BookingError, ValidationError};
use crate::booking::session::{CouponOutcome, CustomerDetails, ReferenceImage, SessionView};
use crate::models::*;
use crate::AppState;

type SessionResult = Result<Json<ApiResponse<SessionView>>, ApiError>;

fn respond(result: Result<SessionView, BookingError>) -> SessionResult {
    result
        .map(|view| Json(ApiResponse::success(view)))
        .map_err(booking_error)
}

/// POST /api/booking/sessions
pub async fn create_session(State(state): State<Arc<AppState>>) -> SessionResult {
    respond(state.engine.create_session().await)
}

/// GET /api/booking/sessions/{id}
pub async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> SessionResult {
    respond(state.engine.view(id).await)
}

/// PUT /api/booking/sessions/{id}/services
pub async fn select_services(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<SelectIdsRequest>,
) -> SessionResult {
    respond(state.engine.select_services(id, &body.ids).await)
}

/// PUT /api/booking/sessions/{id}/jewelry
pub async fn select_jewelry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<SelectIdsRequest>,
) -> SessionResult {
    respond(state.engine.select_jewelry(id, &body.ids).await)
}

/// PUT /api/booking/sessions/{id}/date
pub async fn pick_date(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<PickDateRequest>,
) -> SessionResult {
    respond(state.engine.pick_date(id, &body.date).await)
}

/// PUT /api/booking/sessions/{id}/slot
pub async fn pick_slot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<PickSlotRequest>,
) -> SessionResult {
    respond(state.engine.pick_slot(id, &body.time).await)
}

/// PUT /api/booking/sessions/{id}/details
pub async fn update_details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<CustomerDetails>,
) -> SessionResult {
    respond(state.engine.update_details(id, body).await)
}

/// PUT /api/booking/sessions/{id}/consent
pub async fn update_consent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ConsentRequest>,
) -> SessionResult {
    respond(state.engine.update_consent(id, body.agreed, body.signature).await)
}

/// POST /api/booking/sessions/{id}/coupon
pub async fn apply_coupon(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<CouponCodeRequest>,
) -> Result<Json<ApiResponse<CouponApplyResponse>>, ApiError> {
    let (outcome, session) = state
        .engine
        .apply_coupon(id, &body.code)
        .await
        .map_err(booking_error)?;

    let (applied, message) = match outcome {
        CouponOutcome::Applied(_) => (true, None),
        CouponOutcome::Rejected(rejection) => (false, Some(rejection.to_string())),
        CouponOutcome::Unverified => (
            false,
            Some("Could not verify coupon, please try again".to_string()),
        ),
        CouponOutcome::Stale => (false, None),
    };
    Ok(Json(ApiResponse::success(CouponApplyResponse {
        applied,
        message,
        session,
    })))
}

/// DELETE /api/booking/sessions/{id}/coupon
pub async fn remove_coupon(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> SessionResult {
    respond(state.engine.remove_coupon(id).await)
}

/// POST /api/booking/sessions/{id}/stylist/analyze
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AnalyzeRequest>,
) -> SessionResult {
    let image = decode_image(&body.image, body.mime_type.as_deref())
        .map_err(|e| booking_error(e.into()))?;
    respond(state.engine.analyze(id, image).await)
}

/// POST /api/booking/sessions/{id}/stylist/skip
pub async fn skip_stylist(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> SessionResult {
    respond(state.engine.skip_stylist(id).await)
}

/// POST /api/booking/sessions/{id}/next
pub async fn next_step(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> SessionResult {
    respond(state.engine.next(id).await)
}

/// POST /api/booking/sessions/{id}/back
pub async fn previous_step(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> SessionResult {
    respond(state.engine.back(id).await)
}

/// POST /api/booking/sessions/{id}/submit
pub async fn submit(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> SessionResult {
    respond(state.engine.submit(id).await)
}

/// Accepts bare base64 or a `data:<mime>;base64,<payload>` URL.
fn decode_image(raw: &str, mime: Option<&str>) -> Result<ReferenceImage, ValidationError> {
    let raw = raw.trim();
    let (data_mime, payload) = match raw.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
        Some((header, payload)) => (header.strip_suffix(";base64"), payload),
        None => (None, raw),
    };
    let mime = data_mime
        .or(mime)
        .filter(|m| m.starts_with("image/"))
        .unwrap_or("image/jpeg");

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|_| ValidationError::BadImage)?;
    if bytes.is_empty() {
        return Err(ValidationError::BadImage);
    }
    Ok(ReferenceImage::new(bytes, mime))
}
