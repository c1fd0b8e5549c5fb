use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::LookupError;
use super::hours::WorkingHours;
use crate::cache::CatalogCache;
use crate::models::{AppointmentStatus, BookedInterval};
use crate::store::StudioStore;

/// One candidate start time on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Local wall-clock label, "HH:MM".
    pub time: String,
    pub available: bool,
}

/// Studio-local `date` + `time` as an instant.
///
/// A wall-clock time repeated by a DST fall-back resolves to its first
/// occurrence; one skipped by a spring-forward does not exist.
pub fn slot_instant(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// First and last millisecond of `date` in studio-local time.
pub fn day_bounds(date: NaiveDate, tz: Tz) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = tz
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()?;
    let end = tz
        .from_local_datetime(&date.and_time(NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?))
        .latest()?;
    Some((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

/// Mark every candidate slot of `date` busy when it starts inside a live
/// booking or has already started by `now`.
///
/// Bookings are half-open: a slot starting exactly at a booking's end is free.
pub fn resolve_slots(
    date: NaiveDate,
    hours: &WorkingHours,
    bookings: &[BookedInterval],
    tz: Tz,
    now: DateTime<Utc>,
) -> Vec<Slot> {
    let live: Vec<&BookedInterval> = bookings
        .iter()
        .filter(|b| b.status != AppointmentStatus::Cancelled)
        .collect();

    hours
        .slot_times(date)
        .into_iter()
        .filter_map(|time| {
            let at = slot_instant(date, time, tz)?;
            let busy = at <= now || live.iter().any(|b| b.start_time <= at && at < b.end_time);
            Some(Slot {
                time: time.format("%H:%M").to_string(),
                available: !busy,
            })
        })
        .collect()
}

/// Loads working hours and the day's bookings and resolves the slot grid.
#[derive(Clone)]
pub struct AvailabilityResolver {
    store: Arc<dyn StudioStore>,
    cache: Arc<CatalogCache>,
    tz: Tz,
}

impl AvailabilityResolver {
    pub fn new(store: Arc<dyn StudioStore>, cache: Arc<CatalogCache>, tz: Tz) -> Self {
        Self { store, cache, tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Slot grid for `date` as of right now.
    pub async fn slots_for(&self, date: NaiveDate) -> Result<Vec<Slot>, LookupError> {
        let catalog = self.cache.catalog(self.store.as_ref()).await?;
        let Some((from, to)) = day_bounds(date, self.tz) else {
            return Ok(Vec::new());
        };
        let bookings = self.store.bookings_between(from, to).await?;
        tracing::debug!(
            "availability {}: {} live bookings",
            date,
            bookings.len()
        );
        Ok(resolve_slots(
            date,
            &catalog.settings.working_hours,
            &bookings,
            self.tz,
            Utc::now(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::hours::{DaySchedule, TimeRange};
    use std::collections::BTreeMap;

    /// UTC+2 all year round.
    fn tz() -> Tz {
        chrono_tz::Etc::GMTMinus2
    }

    /// Long before any test date, so nothing counts as elapsed.
    fn long_ago() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn sunday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn sunday_hours(start: u8, end: u8) -> WorkingHours {
        let mut days = BTreeMap::new();
        days.insert(
            "0".to_string(),
            DaySchedule {
                is_open: true,
                ranges: vec![TimeRange { start, end }],
            },
        );
        WorkingHours(days)
    }

    fn at(time: &str) -> DateTime<Utc> {
        let time = NaiveTime::parse_from_str(time, "%H:%M").unwrap();
        slot_instant(sunday(), time, tz()).unwrap()
    }

    fn booking(start: &str, end: &str, status: AppointmentStatus) -> BookedInterval {
        BookedInterval {
            start_time: at(start),
            end_time: at(end),
            status,
        }
    }

    fn busy_times(slots: &[Slot]) -> Vec<&str> {
        slots
            .iter()
            .filter(|s| !s.available)
            .map(|s| s.time.as_str())
            .collect()
    }

    #[test]
    fn test_half_hour_booking_blocks_only_its_slot() {
        let bookings = vec![booking("13:00", "13:30", AppointmentStatus::Confirmed)];
        let slots = resolve_slots(sunday(), &sunday_hours(11, 20), &bookings, tz(), long_ago());

        assert_eq!(slots.len(), 18);
        assert_eq!(busy_times(&slots), vec!["13:00"]);
        let free = |t: &str| slots.iter().find(|s| s.time == t).unwrap().available;
        assert!(free("12:30"));
        assert!(free("13:30"));
    }

    #[test]
    fn test_long_booking_blocks_every_covered_slot() {
        let bookings = vec![booking("14:00", "15:15", AppointmentStatus::Pending)];
        let slots = resolve_slots(sunday(), &sunday_hours(11, 20), &bookings, tz(), long_ago());
        assert_eq!(busy_times(&slots), vec!["14:00", "14:30", "15:00"]);
    }

    #[test]
    fn test_cancelled_bookings_are_ignored() {
        let bookings = vec![booking("12:00", "13:00", AppointmentStatus::Cancelled)];
        let slots = resolve_slots(sunday(), &sunday_hours(11, 20), &bookings, tz(), long_ago());
        assert!(busy_times(&slots).is_empty());
    }

    #[test]
    fn test_no_bookings_all_free() {
        let slots = resolve_slots(sunday(), &sunday_hours(11, 13), &[], tz(), long_ago());
        assert_eq!(slots.len(), 4);
        assert!(slots.iter().all(|s| s.available));
    }

    #[test]
    fn test_closed_day_resolves_empty() {
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert!(resolve_slots(monday, &sunday_hours(11, 20), &[], tz(), long_ago()).is_empty());
    }

    #[test]
    fn test_elapsed_slots_are_unavailable() {
        let now = at("12:00") + chrono::Duration::minutes(10);
        let slots = resolve_slots(sunday(), &sunday_hours(11, 14), &[], tz(), now);
        assert_eq!(slots.len(), 6);
        assert_eq!(busy_times(&slots), vec!["11:00", "11:30", "12:00"]);
    }

    #[test]
    fn test_slot_starting_now_is_unavailable() {
        let slots = resolve_slots(sunday(), &sunday_hours(11, 12), &[], tz(), at("11:30"));
        assert_eq!(busy_times(&slots), vec!["11:00", "11:30"]);
    }

    #[test]
    fn test_day_bounds_follow_studio_zone() {
        let (from, to) = day_bounds(sunday(), tz()).unwrap();
        assert_eq!(from.to_rfc3339(), "2026-02-28T22:00:00+00:00");
        assert_eq!(
            to.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            "2026-03-01T21:59:59.999"
        );
    }

    #[test]
    fn test_day_bounds_across_spring_forward() {
        let switch_day = NaiveDate::from_ymd_opt(2026, 3, 29).unwrap();
        let (from, to) = day_bounds(switch_day, chrono_tz::Europe::Berlin).unwrap();
        assert_eq!(from.to_rfc3339(), "2026-03-28T23:00:00+00:00");
        assert_eq!(
            to.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            "2026-03-29T21:59:59.999"
        );
    }

    #[test]
    fn test_slot_instants_follow_dst() {
        let berlin = chrono_tz::Europe::Berlin;
        let eleven = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        let winter = slot_instant(NaiveDate::from_ymd_opt(2026, 3, 22).unwrap(), eleven, berlin);
        let summer = slot_instant(NaiveDate::from_ymd_opt(2026, 3, 29).unwrap(), eleven, berlin);
        assert_eq!(winter.unwrap().to_rfc3339(), "2026-03-22T10:00:00+00:00");
        assert_eq!(summer.unwrap().to_rfc3339(), "2026-03-29T09:00:00+00:00");
    }

    #[test]
    fn test_skipped_wall_clock_time_has_no_slot() {
        let switch_day = NaiveDate::from_ymd_opt(2026, 3, 29).unwrap();
        let skipped = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        assert!(slot_instant(switch_day, skipped, chrono_tz::Europe::Berlin).is_none());
    }
}
