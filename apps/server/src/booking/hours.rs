//! Weekly working hours and the slot start-times they produce.

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::ConfigurationError;
use super::fit::SLOT_MINUTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Opening hour, 0..=23.
    pub start: u8,
    /// Closing hour (exclusive), 1..=24.
    pub end: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DaySchedule {
    pub is_open: bool,
    #[serde(default)]
    pub ranges: Vec<TimeRange>,
}

/// Schedule keyed by weekday, "0" = Sunday .. "6" = Saturday.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkingHours(pub BTreeMap<String, DaySchedule>);

impl WorkingHours {
    /// Sunday–Thursday 11:00–20:00, Friday 10:00–14:00, Saturday closed.
    pub fn studio_default() -> Self {
        let mut days = BTreeMap::new();
        for day in 0..=4 {
            days.insert(
                day.to_string(),
                DaySchedule {
                    is_open: true,
                    ranges: vec![TimeRange { start: 11, end: 20 }],
                },
            );
        }
        days.insert(
            "5".into(),
            DaySchedule {
                is_open: true,
                ranges: vec![TimeRange { start: 10, end: 14 }],
            },
        );
        days.insert("6".into(), DaySchedule::default());
        Self(days)
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DaySchedule> {
        let key = date.weekday().num_days_from_sunday().to_string();
        self.0.get(&key)
    }

    /// Candidate slot start-times for `date`, range by range.
    ///
    /// A closed day, a missing day and a malformed day all yield no slots.
    pub fn slot_times(&self, date: NaiveDate) -> Vec<NaiveTime> {
        let Some(day) = self.day(date) else {
            return Vec::new();
        };
        if !day.is_open {
            return Vec::new();
        }
        if let Err(e) = validate_day(&weekday_key(date), day) {
            tracing::warn!("treating {} as closed: {}", date, e);
            return Vec::new();
        }

        let per_hour = 60 / SLOT_MINUTES;
        let mut times = Vec::new();
        for range in &day.ranges {
            for hour in range.start..range.end {
                for step in 0..per_hour {
                    if let Some(t) = NaiveTime::from_hms_opt(hour as u32, step * SLOT_MINUTES, 0) {
                        times.push(t);
                    }
                }
            }
        }
        times
    }

    /// Reject unknown weekday keys, empty or out-of-bounds ranges and overlaps.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (key, day) in &self.0 {
            match key.parse::<u8>() {
                Ok(n) if n <= 6 => {}
                _ => return Err(ConfigurationError::UnknownWeekday(key.clone())),
            }
            validate_day(key, day)?;
        }
        Ok(())
    }
}

fn weekday_key(date: NaiveDate) -> String {
    date.weekday().num_days_from_sunday().to_string()
}

fn validate_day(key: &str, day: &DaySchedule) -> Result<(), ConfigurationError> {
    let mut previous_end = 0u8;
    for range in &day.ranges {
        if range.start >= range.end || range.end > 24 {
            return Err(ConfigurationError::InvalidRange {
                weekday: key.to_string(),
                start: range.start,
                end: range.end,
            });
        }
        if range.start < previous_end {
            return Err(ConfigurationError::Overlap {
                weekday: key.to_string(),
            });
        }
        previous_end = range.end;
    }
    Ok(())
}
