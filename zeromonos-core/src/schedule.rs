//! Operating-hours grid and the advisory slot availability index.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::ports::{BookingError, BookingStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Configured operating-hours grid and per-day limits.
///
/// Slot times and dates are wall-clock values in `timezone`.
pub struct ScheduleConfig {
    /// Start of the first slot.
    pub opening: NaiveTime,
    /// No slot starts at or after this time.
    pub closing: NaiveTime,
    /// Width of each slot.
    pub slot_minutes: u32,
    /// Days on which collections happen.
    pub operating_days: Vec<Weekday>,
    /// Maximum active bookings per municipality and day.
    pub daily_capacity: Option<usize>,
    /// Zone the grid is expressed in.
    pub timezone: Tz,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            opening: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            closing: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            slot_minutes: 60,
            operating_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            daily_capacity: Some(10),
            timezone: Tz::Europe__Lisbon,
        }
    }
}

impl ScheduleConfig {
    /// Check that the grid yields at least one slot.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] for a zero slot width or an empty window.
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.slot_minutes == 0 {
            return Err(BookingError::validation("slot width must be positive"));
        }
        if self.opening >= self.closing {
            return Err(BookingError::validation(
                "opening time must be before closing time",
            ));
        }
        if self.daily_capacity == Some(0) {
            return Err(BookingError::validation("daily capacity must be positive"));
        }
        Ok(())
    }

    /// Candidate slot starts for an operating day, ascending.
    #[must_use]
    pub fn candidate_slots(&self) -> Vec<NaiveTime> {
        if self.slot_minutes == 0 {
            return Vec::new();
        }
        let step = Duration::minutes(i64::from(self.slot_minutes));
        let mut slots = Vec::new();
        let mut current = self.opening;
        while current < self.closing {
            slots.push(current);
            let (next, wrapped_days) = current.overflowing_add_signed(step);
            if wrapped_days != 0 {
                break;
            }
            current = next;
        }
        slots
    }

    /// Whether collections happen on `date`.
    #[must_use]
    pub fn is_operating_day(&self, date: NaiveDate) -> bool {
        self.operating_days.contains(&date.weekday())
    }

    /// `instant` as a wall-clock time in the grid's zone.
    #[must_use]
    pub fn local_time(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&self.timezone)
    }

    /// Whether `time` is the start of a grid slot.
    #[must_use]
    pub fn is_slot(&self, time: NaiveTime) -> bool {
        self.candidate_slots().contains(&time)
    }
}

/// Computes free slots from the grid minus slots held by active bookings.
///
/// The answer is advisory: a slot listed here can still be lost to a concurrent
/// creation, which the store reports as a slot conflict.
pub struct SlotAvailabilityIndex {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    config: ScheduleConfig,
}

impl SlotAvailabilityIndex {
    /// Create an index over `store` using the given grid.
    #[must_use]
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>, config: ScheduleConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Grid configuration in use.
    #[must_use]
    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Free slot starts for `(municipality, date)`, ascending.
    ///
    /// Non-operating days and fully booked days yield an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] for a blank municipality or a past date, and
    /// store errors unchanged.
    pub async fn available_slots(
        &self,
        municipality: &str,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, BookingError> {
        let municipality = municipality.trim();
        if municipality.is_empty() {
            return Err(BookingError::validation("municipality is required"));
        }
        let now = self.config.local_time(self.clock.now());
        let today = now.date_naive();
        if date < today {
            return Err(BookingError::validation(format!("{date} is in the past")));
        }
        if !self.config.is_operating_day(date) {
            return Ok(Vec::new());
        }

        let held: HashSet<NaiveTime> = self
            .store
            .held_slots(municipality, date)
            .await?
            .into_iter()
            .collect();

        let slots: Vec<NaiveTime> = self
            .config
            .candidate_slots()
            .into_iter()
            .filter(|slot| date > today || *slot > now.time())
            .filter(|slot| !held.contains(slot))
            .collect();

        debug!(
            municipality,
            date = %date,
            free = slots.len(),
            held = held.len(),
            "Computed slot availability"
        );
        Ok(slots)
    }

    /// Validate a requested slot against the grid and the clock.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] for past dates, non-operating days, times off
    /// the grid and slots that already started.
    pub fn check_requested_slot(&self, date: NaiveDate, time: NaiveTime) -> Result<(), BookingError> {
        let now = self.config.local_time(self.clock.now());
        let today = now.date_naive();
        if date < today {
            return Err(BookingError::validation("cannot book past dates"));
        }
        if !self.config.is_operating_day(date) {
            return Err(BookingError::validation(format!(
                "no collections on {}",
                date.weekday()
            )));
        }
        if !self.config.is_slot(time) {
            return Err(BookingError::validation(format!(
                "{} is not a collection slot between {} and {}",
                time.format("%H:%M"),
                self.config.opening.format("%H:%M"),
                self.config.closing.format("%H:%M")
            )));
        }
        if date == today && time <= now.time() {
            return Err(BookingError::validation("slot has already started"));
        }
        Ok(())
    }
}
