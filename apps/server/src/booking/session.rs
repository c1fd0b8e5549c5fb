//! One customer's walk through the booking flow.
//!
//! All mutation happens synchronously on [`BookingSession`]. Work that needs a
//! collaborator is split in two: a `begin_*` call records what was asked for
//! and hands back a ticket, and the matching `finish_*` call applies the
//! result only if the ticket still matches the session. Anything else is a
//! stale answer and is dropped.

use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Instant;
use uuid::Uuid;

use super::availability::{slot_instant, Slot};
use super::coupon::CouponRejection;
use super::error::{AnalysisError, BookingError, LookupError, SubmissionError, ValidationError};
use super::fit;
use super::pricing::{self, PriceQuote};
use super::steps::{self, FlowConfig, Step, StepIndicator};
use crate::clients::stylist::{Recommendation, StylistResult};
use crate::models::{
    Appointment, Coupon, JewelryItem, NewAppointment, PrimaryService, Service,
};

/// Duration used when only jewelry is booked.
pub const JEWELRY_ONLY_MINUTES: u32 = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub name: String,
    pub phone: String,
    /// National ID or passport number.
    pub id_number: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Photo the customer uploaded for the stylist step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub digest: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ReferenceImage {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        let digest = hex::encode(Sha256::digest(&bytes));
        Self {
            digest,
            mime: mime.into(),
            bytes,
        }
    }

    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ImageRef {
    Url(String),
    /// Raw image as a data URL, used when the upload failed.
    Inline(String),
}

/// Stylist output and add-on choices attached to a booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualPlan {
    pub reference_image: Option<ImageRef>,
    pub style_summary: Option<String>,
    pub recommendations: Vec<Recommendation>,
    pub selected_jewelry_ids: Vec<i64>,
}

/// Something the customer should be told about on the next render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Notice {
    /// The chosen time no longer fits the selection; pick again.
    SlotCleared { time: String },
    /// Selection changed, the coupon has to be applied again.
    CouponCleared { code: String },
    CouponRejected { message: String },
    /// The coupon service could not be reached.
    CouponUnverified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTicket {
    seq: u64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponTicket {
    seq: u64,
    pub code: String,
    pub base_price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisTicket {
    seq: u64,
    pub digest: String,
}

/// Everything needed to persist the booking, minus the uploaded image.
#[derive(Debug, Clone)]
pub struct SubmissionTicket {
    seq: u64,
    pub date: NaiveDate,
    pub slot_time: String,
    pub duration_min: u32,
    pub appointment: NewAppointment,
    /// Present only when jewelry was selected.
    pub plan: Option<PlanDraft>,
}

#[derive(Debug, Clone)]
pub struct PlanDraft {
    pub image: Option<ReferenceImage>,
    pub stylist: Option<StylistResult>,
    pub jewelry_ids: Vec<i64>,
}

impl PlanDraft {
    pub fn into_plan(self, reference_image: Option<ImageRef>) -> VisualPlan {
        let (style_summary, recommendations) = match self.stylist {
            Some(r) => (Some(r.style_summary), r.recommendations),
            None => (None, Vec::new()),
        };
        VisualPlan {
            reference_image,
            style_summary,
            recommendations,
            selected_jewelry_ids: self.jewelry_ids,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CouponOutcome {
    Applied(PriceQuote),
    Rejected(CouponRejection),
    Unverified,
    Stale,
}

#[derive(Debug, Default)]
struct InFlight {
    date: Option<DateTicket>,
    coupon: Option<CouponTicket>,
    analysis: Option<AnalysisTicket>,
    submission: Option<u64>,
}

#[derive(Debug)]
pub struct BookingSession {
    pub id: Uuid,
    step: Step,
    services: Vec<Service>,
    jewelry: Vec<JewelryItem>,
    date: Option<NaiveDate>,
    slots: Vec<Slot>,
    slot_time: Option<String>,
    details: CustomerDetails,
    agreed: bool,
    signature: Option<String>,
    coupon: Option<Coupon>,
    image: Option<ReferenceImage>,
    stylist: Option<StylistResult>,
    notice: Option<Notice>,
    appointment: Option<Appointment>,
    in_flight: InFlight,
    seq: u64,
    touched_at: Instant,
}

impl BookingSession {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            step: Step::SelectService,
            services: Vec::new(),
            jewelry: Vec::new(),
            date: None,
            slots: Vec::new(),
            slot_time: None,
            details: CustomerDetails::default(),
            agreed: false,
            signature: None,
            coupon: None,
            image: None,
            stylist: None,
            notice: None,
            appointment: None,
            in_flight: InFlight::default(),
            seq: 0,
            touched_at: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.touched_at = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.touched_at.elapsed()
    }

    /// Sum of service durations, or the jewelry-only default.
    pub fn total_duration(&self) -> u32 {
        let total: i64 = self.services.iter().map(|s| s.duration_min.max(0)).sum();
        if total == 0 {
            JEWELRY_ONLY_MINUTES
        } else {
            total as u32
        }
    }

    pub fn quote(&self) -> PriceQuote {
        pricing::quote(&self.services, &self.jewelry, self.coupon.as_ref())
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn ensure_editable(&self) -> Result<(), BookingError> {
        if self.step == Step::Confirmation {
            return Err(BookingError::Terminal);
        }
        if self.in_flight.submission.is_some() {
            return Err(BookingError::InFlight("submission"));
        }
        Ok(())
    }

    fn ensure_step(&self, allowed: &[Step]) -> Result<(), BookingError> {
        self.ensure_editable()?;
        if !allowed.contains(&self.step) {
            return Err(ValidationError::WrongStep.into());
        }
        Ok(())
    }

    // ── Selection ──

    pub fn set_services(&mut self, services: Vec<Service>) -> Result<(), BookingError> {
        self.ensure_step(&[Step::SelectService])?;
        if self.services != services {
            self.services = services;
            self.selection_changed();
        }
        Ok(())
    }

    pub fn set_jewelry(&mut self, items: Vec<JewelryItem>) -> Result<(), BookingError> {
        self.ensure_step(&[Step::SelectService, Step::AiStylist])?;
        if let Some(item) = items.iter().find(|j| !j.in_stock) {
            return Err(ValidationError::UnavailableJewelry(item.id).into());
        }
        if self.jewelry != items {
            self.jewelry = items;
            self.selection_changed();
        }
        Ok(())
    }

    /// A changed selection changes the base price and the duration: the
    /// coupon must be re-validated and the chosen time must still fit.
    fn selection_changed(&mut self) {
        self.in_flight.coupon = None;
        if let Some(old) = self.coupon.take() {
            self.notice = Some(Notice::CouponCleared { code: old.code });
        }
        self.revalidate_slot();
    }

    fn revalidate_slot(&mut self) {
        let Some(time) = self.slot_time.clone() else {
            return;
        };
        let still_fits = fit::position_of(&self.slots, &time)
            .is_some_and(|i| fit::fits_at(&self.slots, i, self.total_duration()));
        if !still_fits {
            self.slot_time = None;
            self.notice = Some(Notice::SlotCleared { time });
        }
    }

    // ── Date and time ──

    pub fn begin_date_lookup(
        &mut self,
        date: NaiveDate,
        today: NaiveDate,
    ) -> Result<DateTicket, BookingError> {
        self.ensure_step(&[Step::SelectDate])?;
        if date < today {
            return Err(ValidationError::PastDate.into());
        }
        self.date = Some(date);
        self.slots.clear();
        self.slot_time = None;
        let ticket = DateTicket {
            seq: self.next_seq(),
            date,
        };
        self.in_flight.date = Some(ticket.clone());
        Ok(ticket)
    }

    /// Returns `Ok(false)` when the answer is for a superseded request.
    pub fn finish_date_lookup(
        &mut self,
        ticket: &DateTicket,
        result: Result<Vec<Slot>, LookupError>,
    ) -> Result<bool, BookingError> {
        if self.in_flight.date.as_ref() != Some(ticket) || self.date != Some(ticket.date) {
            tracing::debug!("session {}: dropping stale slots for {}", self.id, ticket.date);
            return Ok(false);
        }
        self.in_flight.date = None;
        self.slots = result?;
        Ok(true)
    }

    /// `now` is the studio-local wall clock; a slot that has started is refused.
    pub fn select_slot(&mut self, time: &str, now: NaiveDateTime) -> Result<(), BookingError> {
        self.ensure_step(&[Step::SelectDate])?;
        let date = self.date.ok_or(ValidationError::MissingDate)?;
        let index = fit::position_of(&self.slots, time)
            .ok_or_else(|| ValidationError::UnknownSlot(time.to_string()))?;
        let starts = NaiveTime::parse_from_str(time, "%H:%M")
            .map_err(|_| ValidationError::UnknownSlot(time.to_string()))?;
        if date.and_time(starts) <= now {
            return Err(ValidationError::SlotElapsed(time.to_string()).into());
        }
        if !fit::fits_at(&self.slots, index, self.total_duration()) {
            return Err(ValidationError::SlotDoesNotFit(time.to_string()).into());
        }
        self.slot_time = Some(time.to_string());
        if matches!(self.notice, Some(Notice::SlotCleared { .. })) {
            self.notice = None;
        }
        Ok(())
    }

    /// Replace the grid with a fresher one, dropping the chosen time if it no
    /// longer fits.
    pub fn refresh_slots(&mut self, date: NaiveDate, slots: Vec<Slot>) {
        if self.date == Some(date) {
            self.slots = slots;
            self.revalidate_slot();
        }
    }

    // ── Details and consent ──

    pub fn set_details(&mut self, details: CustomerDetails) -> Result<(), BookingError> {
        self.ensure_step(&[Step::Details])?;
        self.details = details;
        Ok(())
    }

    pub fn set_consent(&mut self, agreed: bool, signature: Option<String>) -> Result<(), BookingError> {
        self.ensure_step(&[Step::Consent])?;
        self.agreed = agreed;
        self.signature = signature.filter(|s| !s.trim().is_empty());
        Ok(())
    }

    // ── Coupon ──

    pub fn begin_coupon_check(&mut self, code: &str) -> Result<CouponTicket, BookingError> {
        self.ensure_editable()?;
        if self.in_flight.coupon.is_some() {
            return Err(BookingError::InFlight("coupon check"));
        }
        let ticket = CouponTicket {
            seq: self.next_seq(),
            code: code.trim().to_string(),
            base_price: self.quote().base_price,
        };
        self.in_flight.coupon = Some(ticket.clone());
        Ok(ticket)
    }

    pub fn finish_coupon_check(
        &mut self,
        ticket: &CouponTicket,
        result: Result<Result<Coupon, CouponRejection>, LookupError>,
    ) -> CouponOutcome {
        if self.in_flight.coupon.as_ref() != Some(ticket)
            || self.quote().base_price != ticket.base_price
        {
            tracing::debug!("session {}: dropping stale coupon check {}", self.id, ticket.code);
            return CouponOutcome::Stale;
        }
        self.in_flight.coupon = None;
        match result {
            Ok(Ok(coupon)) => {
                self.coupon = Some(coupon);
                self.notice = None;
                CouponOutcome::Applied(self.quote())
            }
            Ok(Err(rejection)) => {
                self.coupon = None;
                self.notice = Some(Notice::CouponRejected {
                    message: rejection.to_string(),
                });
                CouponOutcome::Rejected(rejection)
            }
            Err(e) => {
                tracing::warn!("session {}: coupon lookup failed: {}", self.id, e);
                self.notice = Some(Notice::CouponUnverified);
                CouponOutcome::Unverified
            }
        }
    }

    pub fn remove_coupon(&mut self) -> Result<(), BookingError> {
        self.ensure_editable()?;
        self.coupon = None;
        self.in_flight.coupon = None;
        Ok(())
    }

    // ── Stylist ──

    pub fn begin_analysis(&mut self, image: ReferenceImage) -> Result<AnalysisTicket, BookingError> {
        self.ensure_step(&[Step::AiStylist])?;
        if self.in_flight.analysis.is_some() {
            return Err(BookingError::InFlight("image analysis"));
        }
        if image.bytes.is_empty() {
            return Err(ValidationError::BadImage.into());
        }
        let ticket = AnalysisTicket {
            seq: self.next_seq(),
            digest: image.digest.clone(),
        };
        self.image = Some(image);
        self.stylist = None;
        self.in_flight.analysis = Some(ticket.clone());
        Ok(ticket)
    }

    /// Keeps only recommendations pointing at in-stock catalog jewelry.
    pub fn finish_analysis(
        &mut self,
        ticket: &AnalysisTicket,
        result: Result<StylistResult, AnalysisError>,
        catalog: &[JewelryItem],
    ) -> Result<bool, BookingError> {
        let current = self.image.as_ref().map(|i| i.digest.as_str());
        if self.in_flight.analysis.as_ref() != Some(ticket) || current != Some(ticket.digest.as_str()) {
            tracing::debug!("session {}: dropping stale analysis", self.id);
            return Ok(false);
        }
        self.in_flight.analysis = None;
        let mut analysis = result?;
        analysis.recommendations.retain(|r| {
            catalog
                .iter()
                .any(|j| j.id == r.jewelry_id && j.in_stock)
        });
        self.stylist = Some(analysis);
        Ok(true)
    }

    // ── Navigation ──

    /// Guard for leaving the current step forwards.
    pub fn guard(&self) -> Result<(), ValidationError> {
        match self.step {
            Step::SelectService => self.guard_selection(),
            Step::AiStylist => Ok(()),
            Step::SelectDate => self.guard_schedule(),
            Step::Details => self.guard_details(),
            Step::Consent => self.guard_consent(),
            Step::Confirmation => Err(ValidationError::WrongStep),
        }
    }

    fn guard_selection(&self) -> Result<(), ValidationError> {
        if self.services.is_empty() && self.jewelry.is_empty() {
            return Err(ValidationError::NothingSelected);
        }
        Ok(())
    }

    fn guard_schedule(&self) -> Result<(), ValidationError> {
        if self.date.is_none() {
            return Err(ValidationError::MissingDate);
        }
        let time = self.slot_time.as_deref().ok_or(ValidationError::MissingSlot)?;
        let index = fit::position_of(&self.slots, time)
            .ok_or_else(|| ValidationError::UnknownSlot(time.to_string()))?;
        if !fit::fits_at(&self.slots, index, self.total_duration()) {
            return Err(ValidationError::SlotDoesNotFit(time.to_string()));
        }
        Ok(())
    }

    fn guard_details(&self) -> Result<(), ValidationError> {
        let required = [
            ("name", &self.details.name),
            ("phone", &self.details.phone),
            ("id number", &self.details.id_number),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField(field));
            }
        }
        Ok(())
    }

    fn guard_consent(&self) -> Result<(), ValidationError> {
        if !self.agreed {
            return Err(ValidationError::ConsentRequired);
        }
        if self.signature.is_none() {
            return Err(ValidationError::SignatureRequired);
        }
        Ok(())
    }

    pub fn can_continue(&self) -> bool {
        self.step != Step::Confirmation && self.guard().is_ok()
    }

    /// Move forward. Leaving Consent goes through submission instead.
    pub fn advance(&mut self, cfg: &FlowConfig) -> Result<Step, BookingError> {
        self.ensure_editable()?;
        if self.step == Step::Consent {
            return Err(ValidationError::WrongStep.into());
        }
        self.guard()?;
        self.move_to(steps::next(self.step, cfg))
    }

    /// The stylist step may always be left without doing anything.
    pub fn skip_stylist(&mut self, cfg: &FlowConfig) -> Result<Step, BookingError> {
        self.ensure_step(&[Step::AiStylist])?;
        self.move_to(steps::next(self.step, cfg))
    }

    /// Move back. Entered data is kept.
    pub fn back(&mut self, cfg: &FlowConfig) -> Result<Step, BookingError> {
        self.ensure_editable()?;
        self.move_to(steps::prev(self.step, cfg))
    }

    fn move_to(&mut self, target: Option<Step>) -> Result<Step, BookingError> {
        let target = target.ok_or(ValidationError::WrongStep)?;
        self.step = target;
        Ok(target)
    }

    // ── Submission ──

    /// Check every guard and freeze the payload. Only one submission at a time.
    pub fn begin_submission(&mut self, tz: Tz) -> Result<SubmissionTicket, BookingError> {
        self.ensure_step(&[Step::Consent])?;
        self.guard_selection()?;
        self.guard_schedule()?;
        self.guard_details()?;
        self.guard_consent()?;

        let date = self.date.ok_or(ValidationError::MissingDate)?;
        let slot_time = self.slot_time.clone().ok_or(ValidationError::MissingSlot)?;
        let start_time = NaiveTime::parse_from_str(&slot_time, "%H:%M")
            .ok()
            .and_then(|t| slot_instant(date, t, tz))
            .ok_or_else(|| ValidationError::UnknownSlot(slot_time.clone()))?;
        let duration_min = self.total_duration();
        let quote = self.quote();

        let appointment = NewAppointment {
            client_name: self.details.name.trim().to_string(),
            client_phone: self.details.phone.trim().to_string(),
            client_id_number: self.details.id_number.trim().to_string(),
            client_email: non_blank(&self.details.email),
            primary_service: self.primary_service(),
            service_label: self.service_label(),
            start_time,
            end_time: end_time(start_time, duration_min),
            notes: non_blank(&self.details.notes),
            signature: self.signature.clone().unwrap_or_default(),
            coupon_code: self.coupon.as_ref().map(|c| c.code.clone()),
            base_price: quote.base_price,
            discount_amount: quote.discount_amount,
            final_price: quote.final_price,
            visual_plan: None,
        };

        let plan = (!self.jewelry.is_empty()).then(|| PlanDraft {
            image: self.image.clone(),
            stylist: self.stylist.clone(),
            jewelry_ids: self.jewelry.iter().map(|j| j.id).collect(),
        });

        let seq = self.next_seq();
        self.in_flight.submission = Some(seq);
        // The payload is frozen; a coupon answer arriving now would not be in it.
        self.in_flight.coupon = None;
        Ok(SubmissionTicket {
            seq,
            date,
            slot_time,
            duration_min,
            appointment,
            plan,
        })
    }

    /// On failure the session stays on Consent with everything intact.
    pub fn finish_submission(
        &mut self,
        ticket: &SubmissionTicket,
        result: Result<Appointment, SubmissionError>,
    ) -> Result<Appointment, BookingError> {
        if self.in_flight.submission == Some(ticket.seq) {
            self.in_flight.submission = None;
        }
        match result {
            Ok(appointment) => {
                self.step = Step::Confirmation;
                self.notice = None;
                self.appointment = Some(appointment.clone());
                Ok(appointment)
            }
            Err(e) => {
                match &e {
                    SubmissionError::SlotTaken | SubmissionError::SlotElapsed => {
                        self.notice = Some(Notice::SlotCleared {
                            time: ticket.slot_time.clone(),
                        });
                    }
                    SubmissionError::CouponRejected(rejection) => {
                        self.coupon = None;
                        self.notice = Some(Notice::CouponRejected {
                            message: rejection.to_string(),
                        });
                    }
                    _ => {}
                }
                Err(e.into())
            }
        }
    }

    fn primary_service(&self) -> PrimaryService {
        match self.services.as_slice() {
            [] => PrimaryService::JewelryOnly,
            [only] => PrimaryService::Single(only.id),
            _ => PrimaryService::Combined,
        }
    }

    fn service_label(&self) -> String {
        let mut names: Vec<&str> = self.services.iter().map(|s| s.name.as_str()).collect();
        if names.is_empty() {
            names = self.jewelry.iter().map(|j| j.name.as_str()).collect();
        }
        names.join(" + ")
    }

    // ── View ──

    pub fn view(&self, cfg: &FlowConfig) -> SessionView {
        let duration = self.total_duration();
        let selectable = fit::selectable(&self.slots, duration);
        SessionView {
            id: self.id,
            step: self.step,
            indicator: steps::indicator(self.step, cfg),
            steps: steps::effective_steps(cfg),
            services: self.services.clone(),
            jewelry: self.jewelry.clone(),
            total_duration: duration,
            date: self.date,
            slots: self
                .slots
                .iter()
                .zip(selectable)
                .map(|(s, selectable)| SlotView {
                    time: s.time.clone(),
                    available: s.available,
                    selectable,
                })
                .collect(),
            slot_time: self.slot_time.clone(),
            details: self.details.clone(),
            agreed: self.agreed,
            has_signature: self.signature.is_some(),
            coupon_code: self.coupon.as_ref().map(|c| c.code.clone()),
            quote: self.quote(),
            stylist: self.stylist.clone(),
            has_reference_image: self.image.is_some(),
            notice: self.notice.clone(),
            can_continue: self.can_continue(),
            loading: Loading {
                availability: self.in_flight.date.is_some(),
                coupon: self.in_flight.coupon.is_some(),
                analysis: self.in_flight.analysis.is_some(),
                submission: self.in_flight.submission.is_some(),
            },
            appointment: self.appointment.clone(),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn end_time(start: DateTime<Utc>, duration_min: u32) -> DateTime<Utc> {
    start + chrono::Duration::minutes(duration_min as i64)
}

#[derive(Debug, Serialize)]
pub struct SlotView {
    pub time: String,
    pub available: bool,
    /// Free for the whole duration of the current selection.
    pub selectable: bool,
}

#[derive(Debug, Serialize)]
pub struct Loading {
    pub availability: bool,
    pub coupon: bool,
    pub analysis: bool,
    pub submission: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub step: Step,
    pub indicator: Option<StepIndicator>,
    pub steps: Vec<Step>,
    pub services: Vec<Service>,
    pub jewelry: Vec<JewelryItem>,
    pub total_duration: u32,
    pub date: Option<NaiveDate>,
    pub slots: Vec<SlotView>,
    pub slot_time: Option<String>,
    pub details: CustomerDetails,
    pub agreed: bool,
    pub has_signature: bool,
    pub coupon_code: Option<String>,
    pub quote: PriceQuote,
    pub stylist: Option<StylistResult>,
    pub has_reference_image: bool,
    pub notice: Option<Notice>,
    pub can_continue: bool,
    pub loading: Loading,
    pub appointment: Option<Appointment>,
}
