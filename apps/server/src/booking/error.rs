use thiserror::Error;

use super::coupon::CouponRejection;
use crate::store::StoreError;

/// Malformed working-hours configuration, rejected at settings-save time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("unknown weekday key `{0}` (expected 0..6)")]
    UnknownWeekday(String),
    #[error("weekday {weekday}: range {start}-{end} must satisfy start < end <= 24")]
    InvalidRange { weekday: String, start: u8, end: u8 },
    #[error("weekday {weekday}: ranges must be sorted and must not overlap")]
    Overlap { weekday: String },
}

/// Availability, catalog or coupon read failed. Always retryable.
#[derive(Debug, Error)]
#[error("lookup failed: {0}")]
pub struct LookupError(#[from] pub StoreError);

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("AI stylist is not configured")]
    NotConfigured,
    #[error("AI stylist request failed: {0}")]
    Request(String),
    #[error("AI stylist returned status {0}")]
    Rejected(u16),
    #[error("AI stylist response could not be parsed: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("image storage is not configured")]
    NotConfigured,
    #[error("image upload failed: {0}")]
    Request(String),
    #[error("image storage returned status {0}")]
    Rejected(u16),
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("the selected time is no longer available")]
    SlotTaken,
    #[error("the selected time has already passed")]
    SlotElapsed,
    #[error("coupon can no longer be used: {0}")]
    CouponRejected(CouponRejection),
    #[error("could not check availability before booking: {0}")]
    Recheck(#[source] LookupError),
    #[error("could not save the appointment: {0}")]
    Store(#[source] StoreError),
}

/// A step guard that did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("select at least one service or jewelry item")]
    NothingSelected,
    #[error("unknown service {0}")]
    UnknownService(i64),
    #[error("jewelry item {0} is not available")]
    UnavailableJewelry(i64),
    #[error("date must be YYYY-MM-DD")]
    BadDate,
    #[error("date is in the past")]
    PastDate,
    #[error("select a date")]
    MissingDate,
    #[error("select a time")]
    MissingSlot,
    #[error("time {0} is not offered on the selected date")]
    UnknownSlot(String),
    #[error("time {0} does not leave enough free time for the selected services")]
    SlotDoesNotFit(String),
    #[error("time {0} has already passed")]
    SlotElapsed(String),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("please accept the consent form")]
    ConsentRequired,
    #[error("please sign the consent form")]
    SignatureRequired,
    #[error("image is empty or not valid base64")]
    BadImage,
    #[error("this action is not available on the current step")]
    WrongStep,
}

/// Everything a booking session operation can fail with.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("booking session not found")]
    SessionNotFound,
    #[error("{0} is already in progress")]
    InFlight(&'static str),
    #[error("booking is already confirmed")]
    Terminal,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

impl BookingError {
    /// Message suitable for showing to the customer.
    pub fn user_message(&self) -> String {
        match self {
            BookingError::Lookup(_) => "Could not load data, please try again".into(),
            BookingError::Analysis(_) => {
                "Image analysis failed, you can try again or skip this step".into()
            }
            BookingError::Submission(SubmissionError::SlotTaken) => {
                "The selected time was just taken, please choose another".into()
            }
            BookingError::Submission(SubmissionError::SlotElapsed) => {
                "The selected time has already passed, please choose another".into()
            }
            BookingError::Submission(SubmissionError::CouponRejected(reason)) => format!(
                "The coupon can no longer be used ({}). Please review the new price and submit again",
                reason
            ),
            BookingError::Submission(_) => "Could not save the booking, please try again".into(),
            other => other.to_string(),
        }
    }
}
