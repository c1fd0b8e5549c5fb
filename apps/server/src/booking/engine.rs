//! Server-side booking sessions and the collaborators they call out to.
//!
//! Session state lives in a [`DashMap`]. A shard lock is never held across an
//! `.await`: every collaborator call is bracketed by a `begin_*` under the lock
//! and a `finish_*` under a fresh lock once the answer is back.

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::availability::AvailabilityResolver;
use super::coupon::{self, CouponRejection};
use super::error::{BookingError, SubmissionError, ValidationError};
use super::fit;
use super::session::{
    BookingSession, CouponOutcome, CustomerDetails, ImageRef, ReferenceImage, SessionView,
    SubmissionTicket,
};
use crate::cache::{Catalog, CatalogCache};
use crate::clients::storage::ImageStorage;
use crate::clients::stylist::Stylist;
use crate::models::{Appointment, JewelryItem, Service};
use crate::store::{StoreError, StudioStore};

pub struct BookingEngine {
    store: Arc<dyn StudioStore>,
    cache: Arc<CatalogCache>,
    availability: AvailabilityResolver,
    stylist: Arc<dyn Stylist>,
    storage: Arc<dyn ImageStorage>,
    sessions: DashMap<Uuid, BookingSession>,
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn StudioStore>,
        cache: Arc<CatalogCache>,
        stylist: Arc<dyn Stylist>,
        storage: Arc<dyn ImageStorage>,
        tz: Tz,
    ) -> Self {
        let availability = AvailabilityResolver::new(store.clone(), cache.clone(), tz);
        Self {
            store,
            cache,
            availability,
            stylist,
            storage,
            sessions: DashMap::new(),
        }
    }

    pub fn availability(&self) -> &AvailabilityResolver {
        &self.availability
    }

    /// Wall-clock time at the studio right now.
    pub fn local_now(&self) -> chrono::NaiveDateTime {
        Utc::now()
            .with_timezone(&self.availability.timezone())
            .naive_local()
    }

    pub fn today(&self) -> NaiveDate {
        self.local_now().date()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    async fn catalog(&self) -> Result<Arc<Catalog>, BookingError> {
        Ok(self.cache.catalog(self.store.as_ref()).await?)
    }

    fn with_session<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut BookingSession) -> Result<T, BookingError>,
    ) -> Result<T, BookingError> {
        let mut session = self
            .sessions
            .get_mut(&id)
            .ok_or(BookingError::SessionNotFound)?;
        session.touch();
        f(&mut session)
    }

    async fn render(&self, id: Uuid) -> Result<SessionView, BookingError> {
        let cfg = self.catalog().await?.flow_config();
        self.with_session(id, |s| Ok(s.view(&cfg)))
    }

    // ── Lifecycle ──

    pub async fn create_session(&self) -> Result<SessionView, BookingError> {
        let cfg = self.catalog().await?.flow_config();
        let session = BookingSession::new(Uuid::new_v4());
        let view = session.view(&cfg);
        tracing::debug!("booking session {} opened", session.id);
        self.sessions.insert(session.id, session);
        Ok(view)
    }

    pub async fn view(&self, id: Uuid) -> Result<SessionView, BookingError> {
        self.render(id).await
    }

    /// Drop sessions untouched for longer than `ttl`. Returns how many went.
    pub fn sweep_idle(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.idle_for() < ttl);
        before.saturating_sub(self.sessions.len())
    }

    // ── Selection ──

    pub async fn select_services(&self, id: Uuid, ids: &[i64]) -> Result<SessionView, BookingError> {
        let catalog = self.catalog().await?;
        let services = resolve_services(&catalog, ids)?;
        self.with_session(id, |s| s.set_services(services))?;
        self.render(id).await
    }

    pub async fn select_jewelry(&self, id: Uuid, ids: &[i64]) -> Result<SessionView, BookingError> {
        let catalog = self.catalog().await?;
        let items = resolve_jewelry(&catalog, ids)?;
        self.with_session(id, |s| s.set_jewelry(items))?;
        self.render(id).await
    }

    // ── Date and time ──

    pub async fn pick_date(&self, id: Uuid, raw: &str) -> Result<SessionView, BookingError> {
        let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| ValidationError::BadDate)?;
        let today = self.today();
        let ticket = self.with_session(id, |s| s.begin_date_lookup(date, today))?;

        let result = self.availability.slots_for(date).await;
        if let Err(e) = &result {
            tracing::warn!("session {}: availability for {} failed: {}", id, date, e);
        }

        self.with_session(id, |s| s.finish_date_lookup(&ticket, result))?;
        self.render(id).await
    }

    pub async fn pick_slot(&self, id: Uuid, time: &str) -> Result<SessionView, BookingError> {
        let now = self.local_now();
        self.with_session(id, |s| s.select_slot(time.trim(), now))?;
        self.render(id).await
    }

    // ── Details and consent ──

    pub async fn update_details(
        &self,
        id: Uuid,
        details: CustomerDetails,
    ) -> Result<SessionView, BookingError> {
        self.with_session(id, |s| s.set_details(details))?;
        self.render(id).await
    }

    pub async fn update_consent(
        &self,
        id: Uuid,
        agreed: bool,
        signature: Option<String>,
    ) -> Result<SessionView, BookingError> {
        self.with_session(id, |s| s.set_consent(agreed, signature))?;
        self.render(id).await
    }

    // ── Coupon ──

    pub async fn apply_coupon(
        &self,
        id: Uuid,
        code: &str,
    ) -> Result<(CouponOutcome, SessionView), BookingError> {
        let ticket = self.with_session(id, |s| s.begin_coupon_check(code))?;
        let result = coupon::validate(self.store.as_ref(), &ticket.code, ticket.base_price).await;
        let outcome = self.with_session(id, |s| Ok(s.finish_coupon_check(&ticket, result)))?;
        Ok((outcome, self.render(id).await?))
    }

    pub async fn remove_coupon(&self, id: Uuid) -> Result<SessionView, BookingError> {
        self.with_session(id, |s| s.remove_coupon())?;
        self.render(id).await
    }

    // ── Stylist ──

    pub async fn analyze(&self, id: Uuid, image: ReferenceImage) -> Result<SessionView, BookingError> {
        let catalog = self.catalog().await?;
        let ticket = self.with_session(id, |s| s.begin_analysis(image.clone()))?;

        let result = self.stylist.analyze(&image, &catalog.in_stock_jewelry()).await;
        if let Err(e) = &result {
            tracing::error!("session {}: stylist analysis failed: {}", id, e);
        }

        self.with_session(id, |s| s.finish_analysis(&ticket, result, &catalog.jewelry))?;
        self.render(id).await
    }

    // ── Navigation ──

    pub async fn next(&self, id: Uuid) -> Result<SessionView, BookingError> {
        let cfg = self.catalog().await?.flow_config();
        self.with_session(id, |s| s.advance(&cfg))?;
        self.render(id).await
    }

    pub async fn skip_stylist(&self, id: Uuid) -> Result<SessionView, BookingError> {
        let cfg = self.catalog().await?.flow_config();
        self.with_session(id, |s| s.skip_stylist(&cfg))?;
        self.render(id).await
    }

    pub async fn back(&self, id: Uuid) -> Result<SessionView, BookingError> {
        let cfg = self.catalog().await?.flow_config();
        self.with_session(id, |s| s.back(&cfg))?;
        self.render(id).await
    }

    // ── Submission ──

    pub async fn submit(&self, id: Uuid) -> Result<SessionView, BookingError> {
        let tz = self.availability.timezone();
        let ticket = self.with_session(id, |s| s.begin_submission(tz))?;

        let result = self.confirm(id, &ticket).await;

        let created = self.with_session(id, |s| s.finish_submission(&ticket, result))?;
        tracing::info!(
            "Appointment {} booked for {} ({})",
            created.id,
            created.start_time,
            created.service_label
        );
        self.render(id).await
    }

    /// Re-check the time and the coupon against fresh data, then save.
    async fn confirm(
        &self,
        id: Uuid,
        ticket: &SubmissionTicket,
    ) -> Result<Appointment, SubmissionError> {
        let fresh = self
            .availability
            .slots_for(ticket.date)
            .await
            .map_err(SubmissionError::Recheck)?;
        let still_fits = fit::position_of(&fresh, &ticket.slot_time)
            .is_some_and(|i| fit::fits_at(&fresh, i, ticket.duration_min));
        if !still_fits {
            let elapsed = ticket.appointment.start_time <= Utc::now();
            tracing::info!(
                "session {}: {} {} is no longer available (elapsed: {})",
                id,
                ticket.date,
                ticket.slot_time,
                elapsed
            );
            if let Some(mut session) = self.sessions.get_mut(&id) {
                session.refresh_slots(ticket.date, fresh);
            }
            return Err(if elapsed {
                SubmissionError::SlotElapsed
            } else {
                SubmissionError::SlotTaken
            });
        }

        if let Some(code) = &ticket.appointment.coupon_code {
            let base_price = ticket.appointment.base_price;
            match coupon::validate(self.store.as_ref(), code, base_price).await {
                Ok(Ok(_)) => {}
                Ok(Err(rejection)) => {
                    tracing::info!("session {}: coupon {} dropped at submission: {}", id, code, rejection);
                    return Err(SubmissionError::CouponRejected(rejection));
                }
                Err(e) => return Err(SubmissionError::Recheck(e)),
            }
        }

        self.persist(ticket).await
    }

    async fn persist(&self, ticket: &SubmissionTicket) -> Result<Appointment, SubmissionError> {
        let mut appointment = ticket.appointment.clone();

        if let Some(draft) = ticket.plan.clone() {
            let reference = match &draft.image {
                Some(image) => Some(self.reference_for(image).await),
                None => None,
            };
            let plan = draft.into_plan(reference);
            let encoded = serde_json::to_string(&plan)
                .map_err(|e| SubmissionError::Store(StoreError::Corrupt(e.to_string())))?;
            appointment.visual_plan = Some(encoded);
        }

        self.store
            .create_appointment(&appointment)
            .await
            .map_err(|e| match e {
                StoreError::CouponUnavailable(_) => {
                    SubmissionError::CouponRejected(CouponRejection::Exhausted)
                }
                other => SubmissionError::Store(other),
            })
    }

    /// A failed upload falls back to embedding the image.
    async fn reference_for(&self, image: &ReferenceImage) -> ImageRef {
        match self.storage.upload(image).await {
            Ok(url) => ImageRef::Url(url),
            Err(e) => {
                tracing::warn!("Reference image upload failed, storing inline: {}", e);
                ImageRef::Inline(image.data_url())
            }
        }
    }
}

/// Active services by id, keeping the caller's order and dropping repeats.
fn resolve_services(catalog: &Catalog, ids: &[i64]) -> Result<Vec<Service>, ValidationError> {
    let mut out: Vec<Service> = Vec::with_capacity(ids.len());
    for &id in ids {
        if out.iter().any(|s| s.id == id) {
            continue;
        }
        let service = catalog
            .service(id)
            .ok_or(ValidationError::UnknownService(id))?;
        out.push(service.clone());
    }
    Ok(out)
}

fn resolve_jewelry(catalog: &Catalog, ids: &[i64]) -> Result<Vec<JewelryItem>, ValidationError> {
    let mut out: Vec<JewelryItem> = Vec::with_capacity(ids.len());
    for &id in ids {
        if out.iter().any(|j| j.id == id) {
            continue;
        }
        let item = catalog
            .jewelry_item(id)
            .ok_or(ValidationError::UnavailableJewelry(id))?;
        out.push(item.clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::error::{AnalysisError, UploadError};
    use crate::booking::pricing::tests::{coupon, jewelry, service};
    use crate::booking::session::{Notice, VisualPlan};
    use crate::booking::steps::{Step, StepIndicator};
    use crate::clients::stylist::{Recommendation, StylistResult};
    use crate::booking::hours::{DaySchedule, TimeRange, WorkingHours};
    use crate::models::{DiscountType, PrimaryService, StudioSettings};
    use crate::store::fake::FakeStore;
    use async_trait::async_trait;
    use chrono::{Datelike, Duration as ChronoDuration, NaiveTime, TimeZone};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeStylist;

    #[async_trait]
    impl Stylist for FakeStylist {
        async fn analyze(
            &self,
            _image: &ReferenceImage,
            catalog: &[JewelryItem],
        ) -> Result<StylistResult, AnalysisError> {
            let mut recommendations: Vec<Recommendation> = catalog
                .iter()
                .map(|j| Recommendation {
                    location: "helix".into(),
                    jewelry_id: j.id,
                    x: 0.3,
                    y: 0.2,
                    description: j.name.clone(),
                })
                .collect();
            recommendations.push(Recommendation {
                location: "tragus".into(),
                jewelry_id: 999,
                x: 0.5,
                y: 0.5,
                description: "not in the catalog".into(),
            });
            Ok(StylistResult {
                style_summary: "minimal".into(),
                recommendations,
            })
        }
    }

    struct FakeStorage {
        fail: AtomicBool,
    }

    impl FakeStorage {
        fn new(fail: bool) -> Self {
            Self {
                fail: AtomicBool::new(fail),
            }
        }
    }

    #[async_trait]
    impl ImageStorage for FakeStorage {
        async fn upload(&self, image: &ReferenceImage) -> Result<String, UploadError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(UploadError::Rejected(500));
            }
            Ok(format!("https://cdn.test/{}", image.digest))
        }
    }

    fn tz() -> Tz {
        chrono_tz::Etc::GMTMinus2
    }

    /// Next Sunday at least a week out, so it is never in the past.
    fn next_sunday() -> NaiveDate {
        let today = Utc::now().with_timezone(&tz()).date_naive() + ChronoDuration::days(7);
        let back = today.weekday().num_days_from_sunday() as i64;
        today + ChronoDuration::days(7 - back)
    }

    fn engine_with(store: Arc<FakeStore>, upload_fails: bool) -> BookingEngine {
        BookingEngine::new(
            store,
            Arc::new(CatalogCache::new()),
            Arc::new(FakeStylist),
            Arc::new(FakeStorage::new(upload_fails)),
            tz(),
        )
    }

    fn details() -> CustomerDetails {
        CustomerDetails {
            name: "Maya".into(),
            phone: "052-7654321".into(),
            id_number: "987654321".into(),
            email: Some("maya@example.com".into()),
            notes: None,
        }
    }

    fn ai_off() -> StudioSettings {
        StudioSettings {
            working_hours: WorkingHours::studio_default(),
            ai_stylist_enabled: false,
        }
    }

    async fn fill_to_consent(engine: &BookingEngine, id: Uuid, time: &str) {
        engine
            .pick_date(id, &next_sunday().format("%Y-%m-%d").to_string())
            .await
            .unwrap();
        engine.pick_slot(id, time).await.unwrap();
        engine.next(id).await.unwrap();
        engine.update_details(id, details()).await.unwrap();
        engine.next(id).await.unwrap();
        engine
            .update_consent(id, true, Some("data:image/png;base64,SIG".into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_flow_without_stylist() {
        let store = Arc::new(
            FakeStore::default()
                .with_services(vec![service(1, 150, 30)])
                .with_settings(ai_off()),
        );
        let engine = engine_with(store.clone(), false);
        let id = engine.create_session().await.unwrap().id;

        engine.select_services(id, &[1]).await.unwrap();
        let view = engine.next(id).await.unwrap();
        assert_eq!(view.step, Step::SelectDate);
        assert_eq!(view.indicator, Some(StepIndicator { position: 2, total: 4 }));

        fill_to_consent(&engine, id, "11:00").await;
        let view = engine.submit(id).await.unwrap();
        assert_eq!(view.step, Step::Confirmation);
        assert!(view.indicator.is_none());

        let saved = store.appointments.lock().unwrap()[0].clone();
        assert_eq!(saved.primary_service, PrimaryService::Single(1));
        assert_eq!(saved.final_price, 150);
        assert!(saved.visual_plan.is_none());
        let start = tz()
            .from_local_datetime(&next_sunday().and_time(NaiveTime::from_hms_opt(11, 0, 0).unwrap()))
            .unwrap();
        assert_eq!(saved.start_time, start);
        assert_eq!(saved.end_time - saved.start_time, ChronoDuration::minutes(30));
    }

    #[tokio::test]
    async fn test_confirmed_session_is_terminal() {
        let store = Arc::new(
            FakeStore::default()
                .with_services(vec![service(1, 150, 30)])
                .with_settings(ai_off()),
        );
        let engine = engine_with(store.clone(), false);
        let id = engine.create_session().await.unwrap().id;
        engine.select_services(id, &[1]).await.unwrap();
        engine.next(id).await.unwrap();
        fill_to_consent(&engine, id, "11:00").await;
        engine.submit(id).await.unwrap();

        assert!(matches!(engine.back(id).await, Err(BookingError::Terminal)));
        assert!(matches!(engine.submit(id).await, Err(BookingError::Terminal)));
        assert_eq!(store.appointments.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_combined_booking_blocks_every_slot_it_covers() {
        let store = Arc::new(
            FakeStore::default()
                .with_services(vec![service(1, 150, 45), service(2, 200, 30)])
                .with_settings(ai_off()),
        );
        let engine = engine_with(store.clone(), false);
        let id = engine.create_session().await.unwrap().id;
        engine.select_services(id, &[1, 2]).await.unwrap();
        engine.next(id).await.unwrap();
        fill_to_consent(&engine, id, "12:00").await;
        engine.submit(id).await.unwrap();

        let saved = store.appointments.lock().unwrap()[0].clone();
        assert_eq!(saved.primary_service, PrimaryService::Combined);
        assert_eq!(saved.service_label, "Service 1 + Service 2");
        assert_eq!(saved.end_time - saved.start_time, ChronoDuration::minutes(75));

        let slots = engine.availability().slots_for(next_sunday()).await.unwrap();
        let busy: Vec<&str> = slots
            .iter()
            .filter(|s| !s.available)
            .map(|s| s.time.as_str())
            .collect();
        assert_eq!(busy, vec!["12:00", "12:30", "13:00"]);
    }

    #[tokio::test]
    async fn test_slot_taken_before_submission() {
        let store = Arc::new(
            FakeStore::default()
                .with_services(vec![service(1, 150, 60)])
                .with_settings(ai_off()),
        );
        let engine = engine_with(store.clone(), false);
        let id = engine.create_session().await.unwrap().id;
        engine.select_services(id, &[1]).await.unwrap();
        engine.next(id).await.unwrap();
        fill_to_consent(&engine, id, "14:00").await;

        let taken = tz()
            .from_local_datetime(&next_sunday().and_time(NaiveTime::from_hms_opt(14, 30, 0).unwrap()))
            .unwrap()
            .with_timezone(&Utc);
        store.add_appointment(taken, taken + ChronoDuration::minutes(30));

        let err = engine.submit(id).await.unwrap_err();
        assert!(matches!(err, BookingError::Submission(SubmissionError::SlotTaken)));

        let view = engine.view(id).await.unwrap();
        assert_eq!(view.step, Step::Consent);
        assert!(view.slot_time.is_none());
        assert_eq!(view.notice, Some(Notice::SlotCleared { time: "14:00".into() }));
        assert!(!view.loading.submission);
        assert_eq!(store.appointments.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_session_for_retry() {
        let store = Arc::new(
            FakeStore::default()
                .with_services(vec![service(1, 150, 30)])
                .with_settings(ai_off()),
        );
        let engine = engine_with(store.clone(), false);
        let id = engine.create_session().await.unwrap().id;
        engine.select_services(id, &[1]).await.unwrap();
        engine.next(id).await.unwrap();
        fill_to_consent(&engine, id, "11:00").await;

        store.fail_writes(true);
        let err = engine.submit(id).await.unwrap_err();
        assert!(matches!(err, BookingError::Submission(SubmissionError::Store(_))));
        assert_eq!(engine.view(id).await.unwrap().step, Step::Consent);

        store.fail_writes(false);
        assert_eq!(engine.submit(id).await.unwrap().step, Step::Confirmation);
    }

    #[tokio::test]
    async fn test_coupon_use_is_taken_with_booking() {
        let store = Arc::new(
            FakeStore::default()
                .with_services(vec![service(1, 100, 30)])
                .with_settings(ai_off())
                .with_coupon(coupon("LUCK10", DiscountType::Percentage, 10.0)),
        );
        let engine = engine_with(store.clone(), false);
        let id = engine.create_session().await.unwrap().id;
        engine.select_services(id, &[1]).await.unwrap();

        let (outcome, view) = engine.apply_coupon(id, "luck10").await.unwrap();
        assert!(matches!(outcome, CouponOutcome::Applied(_)));
        assert_eq!(view.quote.final_price, 90);

        engine.next(id).await.unwrap();
        fill_to_consent(&engine, id, "11:00").await;
        engine.submit(id).await.unwrap();

        let saved = store.appointments.lock().unwrap()[0].clone();
        assert_eq!(saved.coupon_code.as_deref(), Some("LUCK10"));
        assert_eq!(saved.discount_amount, 10);
        assert_eq!(store.coupons.lock().unwrap()[0].used_count, 1);
    }

    fn open_all_day() -> StudioSettings {
        let days = (0..7)
            .map(|d| {
                let day = DaySchedule {
                    is_open: true,
                    ranges: vec![TimeRange { start: 0, end: 24 }],
                };
                (d.to_string(), day)
            })
            .collect::<BTreeMap<_, _>>();
        StudioSettings {
            working_hours: WorkingHours(days),
            ai_stylist_enabled: false,
        }
    }

    #[tokio::test]
    async fn test_elapsed_slot_today_is_not_selectable() {
        let store = Arc::new(
            FakeStore::default()
                .with_services(vec![service(1, 150, 30)])
                .with_settings(open_all_day()),
        );
        let engine = engine_with(store, false);
        let id = engine.create_session().await.unwrap().id;
        engine.select_services(id, &[1]).await.unwrap();
        engine.next(id).await.unwrap();

        let view = engine
            .pick_date(id, &engine.today().to_string())
            .await
            .unwrap();
        let midnight = view.slots.iter().find(|s| s.time == "00:00").unwrap();
        assert!(!midnight.available);
        assert!(!midnight.selectable);

        assert!(engine.pick_slot(id, "00:00").await.is_err());
        assert!(engine.view(id).await.unwrap().slot_time.is_none());
    }

    #[tokio::test]
    async fn test_coupon_cap_holds_across_sessions() {
        let mut once = coupon("ONCE", DiscountType::Fixed, 50.0);
        once.max_uses = 1;
        let store = Arc::new(
            FakeStore::default()
                .with_services(vec![service(1, 150, 30)])
                .with_settings(ai_off())
                .with_coupon(once),
        );
        let engine = engine_with(store.clone(), false);

        let mut ids = Vec::new();
        for time in ["11:00", "12:00"] {
            let id = engine.create_session().await.unwrap().id;
            engine.select_services(id, &[1]).await.unwrap();
            let (outcome, _) = engine.apply_coupon(id, "ONCE").await.unwrap();
            assert!(matches!(outcome, CouponOutcome::Applied(_)));
            engine.next(id).await.unwrap();
            fill_to_consent(&engine, id, time).await;
            ids.push(id);
        }

        let first = engine.submit(ids[0]).await.unwrap();
        assert_eq!(first.step, Step::Confirmation);
        assert_eq!(first.quote.final_price, 100);

        let err = engine.submit(ids[1]).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Submission(SubmissionError::CouponRejected(CouponRejection::Exhausted))
        ));
        let view = engine.view(ids[1]).await.unwrap();
        assert_eq!(view.step, Step::Consent);
        assert!(view.coupon_code.is_none());
        assert!(matches!(view.notice, Some(Notice::CouponRejected { .. })));
        assert_eq!(view.quote.final_price, 150);
        assert_eq!(store.coupons.lock().unwrap()[0].used_count, 1);
        assert_eq!(store.appointments.lock().unwrap().len(), 1);

        let second = engine.submit(ids[1]).await.unwrap();
        assert_eq!(second.step, Step::Confirmation);
        let saved = store.appointments.lock().unwrap()[1].clone();
        assert!(saved.coupon_code.is_none());
        assert_eq!(saved.final_price, 150);
    }

    #[tokio::test]
    async fn test_deactivated_coupon_dropped_at_submission() {
        let store = Arc::new(
            FakeStore::default()
                .with_services(vec![service(1, 100, 30)])
                .with_settings(ai_off())
                .with_coupon(coupon("LUCK10", DiscountType::Percentage, 10.0)),
        );
        let engine = engine_with(store.clone(), false);
        let id = engine.create_session().await.unwrap().id;
        engine.select_services(id, &[1]).await.unwrap();
        engine.apply_coupon(id, "LUCK10").await.unwrap();
        engine.next(id).await.unwrap();
        fill_to_consent(&engine, id, "11:00").await;

        store.coupons.lock().unwrap()[0].is_active = false;
        let err = engine.submit(id).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Submission(SubmissionError::CouponRejected(CouponRejection::Inactive))
        ));
        assert!(store.appointments.lock().unwrap().is_empty());
        assert_eq!(store.coupons.lock().unwrap()[0].used_count, 0);
    }

    #[tokio::test]
    async fn test_coupon_below_minimum_then_valid() {
        let mut luck = coupon("LUCK10", DiscountType::Percentage, 10.0);
        luck.min_order_amount = 50;
        let store = Arc::new(
            FakeStore::default()
                .with_services(vec![service(1, 40, 30), service(2, 100, 30)])
                .with_coupon(luck),
        );
        let engine = engine_with(store, false);
        let id = engine.create_session().await.unwrap().id;

        engine.select_services(id, &[1]).await.unwrap();
        let (outcome, view) = engine.apply_coupon(id, "LUCK10").await.unwrap();
        assert!(matches!(outcome, CouponOutcome::Rejected(_)));
        assert_eq!(view.quote.final_price, 40);

        engine.select_services(id, &[2]).await.unwrap();
        let (_, view) = engine.apply_coupon(id, "LUCK10").await.unwrap();
        assert_eq!(view.quote.discount_amount, 10);
        assert_eq!(view.quote.final_price, 90);
    }

    #[tokio::test]
    async fn test_unreachable_coupon_store_is_unverified() {
        let store = Arc::new(FakeStore::default().with_services(vec![service(1, 100, 30)]));
        let engine = engine_with(store.clone(), false);
        let id = engine.create_session().await.unwrap().id;
        engine.select_services(id, &[1]).await.unwrap();

        store.fail_reads(true);
        let (outcome, view) = engine.apply_coupon(id, "LUCK10").await.unwrap();
        assert_eq!(outcome, CouponOutcome::Unverified);
        assert_eq!(view.notice, Some(Notice::CouponUnverified));
        assert_eq!(view.quote.discount_amount, 0);
    }

    #[tokio::test]
    async fn test_unknown_service_rejected() {
        let store = Arc::new(FakeStore::default().with_services(vec![service(1, 100, 30)]));
        let engine = engine_with(store, false);
        let id = engine.create_session().await.unwrap().id;
        let err = engine.select_services(id, &[1, 7]).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Validation(ValidationError::UnknownService(7))
        ));
    }

    #[tokio::test]
    async fn test_bad_and_past_dates() {
        let store = Arc::new(
            FakeStore::default()
                .with_services(vec![service(1, 100, 30)])
                .with_settings(ai_off()),
        );
        let engine = engine_with(store, false);
        let id = engine.create_session().await.unwrap().id;
        engine.select_services(id, &[1]).await.unwrap();
        engine.next(id).await.unwrap();

        assert!(matches!(
            engine.pick_date(id, "01/03/2026").await,
            Err(BookingError::Validation(ValidationError::BadDate))
        ));
        let yesterday = engine.today() - ChronoDuration::days(1);
        assert!(matches!(
            engine.pick_date(id, &yesterday.to_string()).await,
            Err(BookingError::Validation(ValidationError::PastDate))
        ));
    }

    #[tokio::test]
    async fn test_jewelry_with_failed_upload_stores_inline_plan() {
        let store = Arc::new(
            FakeStore::default().with_jewelry(vec![jewelry(3, 60, true), jewelry(4, 80, false)]),
        );
        let engine = engine_with(store.clone(), true);
        let id = engine.create_session().await.unwrap().id;

        let view = engine.next(id).await;
        assert!(view.is_err());
        engine.select_jewelry(id, &[3]).await.unwrap();
        assert_eq!(engine.next(id).await.unwrap().step, Step::AiStylist);

        let image = ReferenceImage::new(vec![0xff, 0xd8, 0xff], "image/jpeg");
        let view = engine.analyze(id, image.clone()).await.unwrap();
        let stylist = view.stylist.unwrap();
        assert_eq!(stylist.recommendations.len(), 1);
        assert_eq!(stylist.recommendations[0].jewelry_id, 3);

        engine.next(id).await.unwrap();
        fill_to_consent(&engine, id, "11:00").await;
        engine.submit(id).await.unwrap();

        let saved = store.appointments.lock().unwrap()[0].clone();
        assert_eq!(saved.primary_service, PrimaryService::JewelryOnly);
        assert_eq!(saved.service_label, "Stud 3");
        assert_eq!(saved.end_time - saved.start_time, ChronoDuration::minutes(30));
        let plan: VisualPlan = serde_json::from_str(saved.visual_plan.as_deref().unwrap()).unwrap();
        assert_eq!(plan.reference_image, Some(ImageRef::Inline(image.data_url())));
        assert_eq!(plan.selected_jewelry_ids, vec![3]);
        assert_eq!(plan.style_summary.as_deref(), Some("minimal"));
    }

    #[tokio::test]
    async fn test_uploaded_image_is_referenced_by_url() {
        let store = Arc::new(FakeStore::default().with_jewelry(vec![jewelry(3, 60, true)]));
        let engine = engine_with(store.clone(), false);
        let id = engine.create_session().await.unwrap().id;
        engine.select_jewelry(id, &[3]).await.unwrap();
        engine.next(id).await.unwrap();
        let image = ReferenceImage::new(vec![1, 2, 3], "image/png");
        engine.analyze(id, image.clone()).await.unwrap();
        engine.next(id).await.unwrap();
        fill_to_consent(&engine, id, "11:00").await;
        engine.submit(id).await.unwrap();

        let saved = store.appointments.lock().unwrap()[0].clone();
        let plan: VisualPlan = serde_json::from_str(saved.visual_plan.as_deref().unwrap()).unwrap();
        assert_eq!(
            plan.reference_image,
            Some(ImageRef::Url(format!("https://cdn.test/{}", image.digest)))
        );
    }

    #[tokio::test]
    async fn test_out_of_stock_jewelry_rejected() {
        let store = Arc::new(FakeStore::default().with_jewelry(vec![jewelry(4, 80, false)]));
        let engine = engine_with(store, false);
        let id = engine.create_session().await.unwrap().id;
        assert!(matches!(
            engine.select_jewelry(id, &[4]).await,
            Err(BookingError::Validation(ValidationError::UnavailableJewelry(4)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let engine = engine_with(Arc::new(FakeStore::default()), false);
        assert!(matches!(
            engine.view(Uuid::new_v4()).await,
            Err(BookingError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_sweep_removes_idle_sessions() {
        let engine = engine_with(Arc::new(FakeStore::default()), false);
        engine.create_session().await.unwrap();
        engine.create_session().await.unwrap();
        assert_eq!(engine.sweep_idle(Duration::from_secs(3600)), 0);
        assert_eq!(engine.sweep_idle(Duration::ZERO), 2);
        assert_eq!(engine.session_count(), 0);
    }
}
