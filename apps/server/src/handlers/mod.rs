pub mod admin;
pub mod booking;
pub mod client;
pub mod health;

use axum::{http::StatusCode, Json};

use crate::booking::error::{BookingError, SubmissionError};
use crate::models::ApiResponse;
use crate::store::StoreError;

pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

pub fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::error(msg)))
}

pub fn booking_error(e: BookingError) -> ApiError {
    let status = match &e {
        BookingError::SessionNotFound => StatusCode::NOT_FOUND,
        BookingError::InFlight(_) | BookingError::Terminal => StatusCode::CONFLICT,
        BookingError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BookingError::Lookup(_) | BookingError::Analysis(_) => StatusCode::BAD_GATEWAY,
        BookingError::Submission(
            SubmissionError::SlotTaken
            | SubmissionError::SlotElapsed
            | SubmissionError::CouponRejected(_),
        ) => StatusCode::CONFLICT,
        BookingError::Submission(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    if status.is_server_error() {
        tracing::error!("booking request failed: {}", e);
    }
    api_error(status, e.user_message())
}

pub fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound => api_error(StatusCode::NOT_FOUND, "Not found"),
        StoreError::Conflict(msg) => api_error(StatusCode::CONFLICT, msg),
        e @ StoreError::CouponUnavailable(_) => api_error(StatusCode::CONFLICT, e.to_string()),
        StoreError::Invalid(msg) => api_error(StatusCode::UNPROCESSABLE_ENTITY, msg),
        other => {
            tracing::error!("store error: {}", other);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "DB error")
        }
    }
}
