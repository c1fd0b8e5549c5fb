//! Repository interface the booking engine reads and writes through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Appointment, BookedInterval, Coupon, JewelryItem, NewAppointment, Service, StudioSettings,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("coupon {0} is inactive or used up")]
    CouponUnavailable(String),
}

#[async_trait]
pub trait StudioStore: Send + Sync {
    /// Active services, in display order.
    async fn list_services(&self) -> Result<Vec<Service>, StoreError>;
    async fn list_jewelry(&self) -> Result<Vec<JewelryItem>, StoreError>;
    async fn studio_settings(&self) -> Result<StudioSettings, StoreError>;
    /// Non-cancelled appointments starting within `[from, to]`.
    async fn bookings_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BookedInterval>, StoreError>;
    /// Insert the appointment and take one use of its coupon, all or nothing.
    ///
    /// A coupon that is inactive or has `used_count >= max_uses` (when
    /// `max_uses > 0`) fails with [`StoreError::CouponUnavailable`] and
    /// nothing is written.
    async fn create_appointment(&self, new: &NewAppointment) -> Result<Appointment, StoreError>;
    /// Case-insensitive lookup.
    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, StoreError>;
}
