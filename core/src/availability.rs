//! Tutor availability records and weekly load counters.
//!
//! A tutor's availability for a month lives in one [`TutorAvailabilityRecord`].
//! Each published day holds its full, chronologically ordered slot list; a day
//! without published slots is absent from the record rather than stored empty.

use crate::error::BookingError;
use crate::grid::{DeliveryMode, DeliveryModes, GridTime, TimeRange};
use crate::store::DocId;
use crate::types::TutorId;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Slots and days
// ============================================================================

/// Availability of one grid point for one tutor on one day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Grid point
    pub time: GridTime,
    /// Accepts in-person sessions
    pub allows_in_person: bool,
    /// Accepts online sessions
    pub allows_online: bool,
    /// Consumed by a booking
    pub booked: bool,
}

impl TimeSlot {
    /// An unbooked slot accepting `modes`.
    #[must_use]
    pub const fn open(time: GridTime, modes: DeliveryModes) -> Self {
        Self {
            time,
            allows_in_person: modes.in_person,
            allows_online: modes.online,
            booked: false,
        }
    }

    /// Whether the slot accepts `mode`.
    #[must_use]
    pub const fn supports(&self, mode: DeliveryMode) -> bool {
        match mode {
            DeliveryMode::InPerson => self.allows_in_person,
            DeliveryMode::Online => self.allows_online,
        }
    }

    /// Whether the slot can be booked for `mode`.
    #[must_use]
    pub const fn is_available_for(&self, mode: DeliveryMode) -> bool {
        !self.booked && self.supports(mode)
    }
}

/// All published slots of one day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAvailability {
    /// The day
    pub day: NaiveDate,
    /// Slots in chronological order, one per grid point
    pub slots: Vec<TimeSlot>,
}

impl DayAvailability {
    /// Build a day, sorting slots and keeping the first entry per grid point.
    #[must_use]
    pub fn new(day: NaiveDate, mut slots: Vec<TimeSlot>) -> Self {
        slots.sort_by_key(|slot| slot.time);
        slots.dedup_by_key(|slot| slot.time);
        Self { day, slots }
    }

    /// The slot at `time`, if published.
    #[must_use]
    pub fn slot(&self, time: GridTime) -> Option<&TimeSlot> {
        self.slots
            .binary_search_by_key(&time, |slot| slot.time)
            .ok()
            .and_then(|index| self.slots.get(index))
    }

    /// Whether every grid point in `range` is published, unbooked and supports `mode`.
    #[must_use]
    pub fn covers(&self, range: &TimeRange, mode: DeliveryMode) -> bool {
        range
            .points()
            .all(|point| self.slot(point).is_some_and(|slot| slot.is_available_for(mode)))
    }

    /// Mark every slot in `range` booked.
    ///
    /// Nothing is modified unless the whole range is currently covered.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::StaleAvailabilityWrite`] if any point is missing,
    /// already booked or does not support `mode`.
    pub fn book(
        &mut self,
        tutor_id: &TutorId,
        range: &TimeRange,
        mode: DeliveryMode,
    ) -> Result<(), BookingError> {
        if !self.covers(range, mode) {
            return Err(BookingError::StaleAvailabilityWrite {
                tutor_id: tutor_id.clone(),
                day: self.day,
            });
        }
        for slot in &mut self.slots {
            if range.start() <= slot.time && slot.time < range.end() {
                slot.booked = true;
            }
        }
        Ok(())
    }

    /// Times of slots that are booked.
    pub fn booked_times(&self) -> impl Iterator<Item = GridTime> + '_ {
        self.slots
            .iter()
            .filter(|slot| slot.booked)
            .map(|slot| slot.time)
    }
}

// ============================================================================
// MonthKey
// ============================================================================

/// A calendar month, serialized as `"YYYY-MM"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    /// The month containing `day`.
    #[must_use]
    pub fn of(day: NaiveDate) -> Self {
        Self {
            year: day.year(),
            month: day.month(),
        }
    }

    /// Year.
    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    /// Month number, 1-based.
    #[must_use]
    pub const fn month(&self) -> u32 {
        self.month
    }

    /// Whether `day` falls in this month.
    #[must_use]
    pub fn contains(&self, day: NaiveDate) -> bool {
        Self::of(day) == *self
    }
}

impl FromStr for MonthKey {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || BookingError::MalformedRecord(format!("invalid month key: {s}"));
        let (year, month) = s.split_once('-').ok_or_else(malformed)?;
        let year: i32 = year.parse().map_err(|_| malformed())?;
        let month: u32 = month.parse().map_err(|_| malformed())?;
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(Self::of)
            .ok_or_else(malformed)
    }
}

impl TryFrom<String> for MonthKey {
    type Error = BookingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonthKey> for String {
    fn from(value: MonthKey) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// ============================================================================
// TutorAvailabilityRecord
// ============================================================================

/// One tutor's published availability for one month.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorAvailabilityRecord {
    /// Owner
    pub tutor_id: TutorId,
    /// Month covered
    pub month: MonthKey,
    /// Slot lists keyed by day; never holds an empty list
    #[serde(default)]
    days: BTreeMap<NaiveDate, Vec<TimeSlot>>,
}

impl TutorAvailabilityRecord {
    /// An empty record, as seen before the first save of the month.
    #[must_use]
    pub const fn empty(tutor_id: TutorId, month: MonthKey) -> Self {
        Self {
            tutor_id,
            month,
            days: BTreeMap::new(),
        }
    }

    /// Storage id of the record of `tutor_id` for `month`: `"{month}_{tutor}"`.
    #[must_use]
    pub fn doc_id(tutor_id: &TutorId, month: MonthKey) -> DocId {
        DocId::new(format!("{month}_{tutor_id}"))
    }

    /// Availability of `day`, if any slots are published.
    #[must_use]
    pub fn day(&self, day: NaiveDate) -> Option<DayAvailability> {
        self.days
            .get(&day)
            .map(|slots| DayAvailability::new(day, slots.clone()))
    }

    /// All published days, in order.
    pub fn days(&self) -> impl Iterator<Item = DayAvailability> + '_ {
        self.days
            .iter()
            .map(|(day, slots)| DayAvailability::new(*day, slots.clone()))
    }

    /// Replace the whole slot list of a day. An empty list removes the day.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::MalformedRecord`] if the day is outside this record's month.
    pub fn put_day(&mut self, day: DayAvailability) -> Result<(), BookingError> {
        if !self.month.contains(day.day) {
            return Err(BookingError::MalformedRecord(format!(
                "day {} does not belong to month {}",
                day.day, self.month
            )));
        }
        let day = DayAvailability::new(day.day, day.slots);
        if day.slots.is_empty() {
            self.days.remove(&day.day);
        } else {
            self.days.insert(day.day, day.slots);
        }
        Ok(())
    }
}

// ============================================================================
// Weekly load
// ============================================================================

/// Week-of-month ordinal of `day`, 1-based.
///
/// Weeks start on Monday and never cross into the neighbouring month: the days
/// of the month before its first Monday form week 1. A month therefore spans
/// weeks 1 through 5, or 6 when a long month starts late in the week.
#[must_use]
pub fn week_index(day: NaiveDate) -> u8 {
    let first = day.with_day(1).unwrap_or(day);
    let offset = first.weekday().num_days_from_monday();
    #[allow(clippy::cast_possible_truncation)] // at most 6
    let index = ((day.day0() + offset) / 7 + 1) as u8;
    index
}

/// Booked-session counts of one tutor per week of one month.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyLoadCounter {
    /// Tutor counted
    pub tutor_id: TutorId,
    /// Month counted
    pub month: MonthKey,
    /// Week index to session count
    #[serde(default)]
    per_week: BTreeMap<u8, u32>,
}

impl WeeklyLoadCounter {
    /// A counter with no sessions.
    #[must_use]
    pub const fn empty(tutor_id: TutorId, month: MonthKey) -> Self {
        Self {
            tutor_id,
            month,
            per_week: BTreeMap::new(),
        }
    }

    /// Storage id of the counter of `tutor_id` for `month`: `"{tutor}_{month}"`.
    #[must_use]
    pub fn doc_id(tutor_id: &TutorId, month: MonthKey) -> DocId {
        DocId::new(format!("{tutor_id}_{month}"))
    }

    /// Sessions booked in `week`; missing weeks count as zero.
    #[must_use]
    pub fn sessions_in_week(&self, week: u8) -> u32 {
        self.per_week.get(&week).copied().unwrap_or(0)
    }

    /// Sessions booked in the week containing `day`.
    #[must_use]
    pub fn sessions_on_week_of(&self, day: NaiveDate) -> u32 {
        self.sessions_in_week(week_index(day))
    }

    /// Count one more session in the week containing `day`.
    pub fn record_session(&mut self, day: NaiveDate) {
        let count = self.per_week.entry(week_index(day)).or_insert(0);
        *count = count.saturating_add(1);
    }
}
