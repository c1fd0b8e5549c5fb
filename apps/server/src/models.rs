use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::hours::WorkingHours;
use crate::booking::session::{SessionView, SlotView};

// ── Catalog ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ServiceCategory {
    Ear,
    Face,
    Body,
    Jewelry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: i64,
    pub duration_min: i64,
    pub category: ServiceCategory,
    pub pain_level: i64,
    pub is_active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct JewelryItem {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub category: String,
    pub in_stock: bool,
    pub image_url: Option<String>,
}

// ── Coupons ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DiscountType {
    Fixed,
    Percentage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub discount_type: DiscountType,
    pub value: f64,
    pub min_order_amount: i64,
    pub is_active: bool,
    /// Zero means unlimited.
    pub max_uses: i64,
    pub used_count: i64,
}

// ── Settings ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioSettings {
    pub working_hours: WorkingHours,
    pub ai_stylist_enabled: bool,
}

// ── Appointments ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    /// Admin transitions: only a pending appointment may change status.
    pub fn can_become(self, next: AppointmentStatus) -> bool {
        matches!(
            (self, next),
            (AppointmentStatus::Pending, AppointmentStatus::Confirmed)
                | (AppointmentStatus::Pending, AppointmentStatus::Cancelled)
        )
    }
}

/// Which service an appointment is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum PrimaryService {
    Single(i64),
    Combined,
    JewelryOnly,
}

impl PrimaryService {
    pub fn as_db(&self) -> String {
        match self {
            PrimaryService::Single(id) => id.to_string(),
            PrimaryService::Combined => "combined".into(),
            PrimaryService::JewelryOnly => "jewelry".into(),
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "combined" => PrimaryService::Combined,
            "jewelry" => PrimaryService::JewelryOnly,
            other => other
                .parse()
                .map(PrimaryService::Single)
                .unwrap_or(PrimaryService::Combined),
        }
    }
}

/// A booked interval as seen by the availability resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookedInterval {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
}

/// Everything the booking flow hands to the store at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub client_name: String,
    pub client_phone: String,
    pub client_id_number: String,
    pub client_email: Option<String>,
    pub primary_service: PrimaryService,
    pub service_label: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub notes: Option<String>,
    pub signature: String,
    pub coupon_code: Option<String>,
    pub base_price: i64,
    pub discount_amount: i64,
    pub final_price: i64,
    /// Serialized [`crate::booking::session::VisualPlan`].
    pub visual_plan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub client_name: String,
    pub client_phone: String,
    pub client_id_number: String,
    pub client_email: Option<String>,
    pub primary_service: PrimaryService,
    pub service_label: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub signature: String,
    pub coupon_code: Option<String>,
    pub base_price: i64,
    pub discount_amount: i64,
    pub final_price: i64,
    pub visual_plan: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: String,
    /// Total duration in minutes; selectable flags are computed against it.
    pub duration: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest {
    pub code: String,
    pub base_price: i64,
}

#[derive(Debug, Serialize)]
pub struct CouponCheckResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<Coupon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub duration_min: i64,
    pub category: ServiceCategory,
    pub pain_level: Option<i64>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub duration_min: Option<i64>,
    pub category: Option<ServiceCategory>,
    pub pain_level: Option<i64>,
    pub is_active: Option<bool>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateJewelryRequest {
    pub name: String,
    pub price: i64,
    pub category: String,
    pub in_stock: Option<bool>,
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateJewelryRequest {
    pub name: Option<String>,
    pub price: Option<i64>,
    pub category: Option<String>,
    pub in_stock: Option<bool>,
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCouponRequest {
    pub code: String,
    pub discount_type: DiscountType,
    pub value: f64,
    pub min_order_amount: Option<i64>,
    pub max_uses: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCouponRequest {
    pub is_active: Option<bool>,
    pub value: Option<f64>,
    pub min_order_amount: Option<i64>,
    pub max_uses: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentsQuery {
    pub date: Option<String>,
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

// ── Booking session requests ──

#[derive(Debug, Deserialize)]
pub struct SelectIdsRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PickDateRequest {
    /// YYYY-MM-DD, studio-local.
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct PickSlotRequest {
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    pub agreed: bool,
    /// Drawn signature as an image data URL.
    pub signature: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CouponCodeRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Base64 image, optionally as a full data URL.
    pub image: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CouponApplyResponse {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub session: SessionView,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub date: String,
    pub duration: u32,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
