//! The fixed 30-minute availability grid.
//!
//! Every slot a tutor publishes and every range a student requests is expressed
//! in [`GridTime`] values: clock times aligned to a half hour. A [`SlotGrid`]
//! narrows that down to the daily window the platform accepts bookings in.

use crate::error::BookingError;
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width of one grid unit, in minutes.
pub const GRID_STEP_MINUTES: u16 = 30;

const MINUTES_PER_DAY: u16 = 24 * 60;

// ============================================================================
// GridTime
// ============================================================================

/// A clock time aligned to the 30-minute grid (`HH:00` or `HH:30`).
///
/// Serialized as `"HH:MM"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GridTime(u16);

impl GridTime {
    /// Build a grid time from an hour and minute.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidGridAlignment`] if the minute is not `0` or `30`
    /// or the hour is out of range.
    pub fn new(hour: u8, minute: u8) -> Result<Self, BookingError> {
        let minutes = u16::from(hour) * 60 + u16::from(minute);
        if hour >= 24 || minute >= 60 || minutes % GRID_STEP_MINUTES != 0 {
            return Err(BookingError::InvalidGridAlignment {
                time: format!("{hour:02}:{minute:02}"),
            });
        }
        Ok(Self(minutes))
    }

    /// Trusted constructor for values already known to be aligned.
    pub(crate) const fn from_minutes(minutes: u16) -> Self {
        Self(minutes)
    }

    /// Minutes since midnight.
    #[must_use]
    pub const fn minutes(self) -> u16 {
        self.0
    }

    /// Hour component.
    #[must_use]
    pub const fn hour(self) -> u16 {
        self.0 / 60
    }

    /// Minute component (`0` or `30`).
    #[must_use]
    pub const fn minute(self) -> u16 {
        self.0 % 60
    }

    /// The next grid point, or `None` past the end of the day.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        let next = self.0 + GRID_STEP_MINUTES;
        if next >= MINUTES_PER_DAY {
            None
        } else {
            Some(Self(next))
        }
    }
}

impl TryFrom<NaiveTime> for GridTime {
    type Error = BookingError;

    fn try_from(time: NaiveTime) -> Result<Self, Self::Error> {
        if time.second() != 0 || time.nanosecond() != 0 {
            return Err(BookingError::InvalidGridAlignment {
                time: time.format("%H:%M:%S").to_string(),
            });
        }
        #[allow(clippy::cast_possible_truncation)] // hour < 24, minute < 60
        Self::new(time.hour() as u8, time.minute() as u8)
    }
}

impl FromStr for GridTime {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let time = NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| {
            BookingError::InvalidGridAlignment {
                time: s.to_string(),
            }
        })?;
        Self::try_from(time)
    }
}

impl TryFrom<String> for GridTime {
    type Error = BookingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GridTime> for String {
    fn from(value: GridTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for GridTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

// ============================================================================
// TimeRange
// ============================================================================

/// A half-open range `[start, end)` covering one or more grid units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    start: GridTime,
    end: GridTime,
}

#[derive(Deserialize)]
struct RawTimeRange {
    start: GridTime,
    end: GridTime,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = BookingError;

    fn try_from(raw: RawTimeRange) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl TimeRange {
    /// Create a range. `end` must be strictly after `start`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidTimeRange`] if `end <= start`.
    pub fn new(start: GridTime, end: GridTime) -> Result<Self, BookingError> {
        if end <= start {
            return Err(BookingError::InvalidTimeRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// First covered grid point.
    #[must_use]
    pub const fn start(&self) -> GridTime {
        self.start
    }

    /// Exclusive end.
    #[must_use]
    pub const fn end(&self) -> GridTime {
        self.end
    }

    /// Number of grid units covered.
    #[must_use]
    pub const fn units(&self) -> u16 {
        (self.end.0 - self.start.0) / GRID_STEP_MINUTES
    }

    /// Every grid point in `[start, end)`, in order.
    pub fn points(&self) -> impl Iterator<Item = GridTime> + use<> {
        let end = self.end.0;
        (self.start.0..end)
            .step_by(usize::from(GRID_STEP_MINUTES))
            .map(GridTime)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ============================================================================
// SlotGrid
// ============================================================================

/// The daily window of bookable grid points, `open..=close`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotGrid {
    open: GridTime,
    close: GridTime,
}

impl SlotGrid {
    /// The platform's standard window: 09:00 through 21:30.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            open: GridTime::from_minutes(9 * 60),
            close: GridTime::from_minutes(21 * 60 + 30),
        }
    }

    /// Create a grid whose last bookable point is `close`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidTimeRange`] if `close` is before `open`.
    pub fn new(open: GridTime, close: GridTime) -> Result<Self, BookingError> {
        if close < open {
            return Err(BookingError::InvalidTimeRange {
                start: open,
                end: close,
            });
        }
        Ok(Self { open, close })
    }

    /// First grid point of the day.
    #[must_use]
    pub const fn open(&self) -> GridTime {
        self.open
    }

    /// Last grid point of the day (inclusive).
    #[must_use]
    pub const fn close(&self) -> GridTime {
        self.close
    }

    /// The universe of valid slot times, in order.
    #[must_use]
    pub fn points(&self) -> Vec<GridTime> {
        (self.open.0..=self.close.0)
            .step_by(usize::from(GRID_STEP_MINUTES))
            .map(GridTime)
            .collect()
    }

    /// Whether `time` is one of this grid's points.
    #[must_use]
    pub fn contains(&self, time: GridTime) -> bool {
        self.open <= time && time <= self.close
    }

    /// Resolve an arbitrary clock time to a grid point.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidGridAlignment`] if the time is not aligned
    /// or falls outside the daily window.
    pub fn align(&self, time: NaiveTime) -> Result<GridTime, BookingError> {
        let grid_time = GridTime::try_from(time)?;
        if !self.contains(grid_time) {
            return Err(BookingError::InvalidGridAlignment {
                time: grid_time.to_string(),
            });
        }
        Ok(grid_time)
    }

    /// Check that every point a range covers lies on this grid.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidGridAlignment`] naming the first offending point.
    pub fn validate_range(&self, range: &TimeRange) -> Result<(), BookingError> {
        match range.points().find(|point| !self.contains(*point)) {
            Some(point) => Err(BookingError::InvalidGridAlignment {
                time: point.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl Default for SlotGrid {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// Delivery modes
// ============================================================================

/// How a session is delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Student and tutor meet in person
    InPerson,
    /// Session runs over video
    Online,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InPerson => write!(f, "In person"),
            Self::Online => write!(f, "Online"),
        }
    }
}

/// The set of delivery modes a tutor or slot accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryModes {
    /// In-person sessions accepted
    pub in_person: bool,
    /// Online sessions accepted
    pub online: bool,
}

impl DeliveryModes {
    /// Both modes.
    #[must_use]
    pub const fn both() -> Self {
        Self {
            in_person: true,
            online: true,
        }
    }

    /// Online only.
    #[must_use]
    pub const fn online_only() -> Self {
        Self {
            in_person: false,
            online: true,
        }
    }

    /// In person only.
    #[must_use]
    pub const fn in_person_only() -> Self {
        Self {
            in_person: true,
            online: false,
        }
    }

    /// Whether `mode` is accepted.
    #[must_use]
    pub const fn supports(&self, mode: DeliveryMode) -> bool {
        match mode {
            DeliveryMode::InPerson => self.in_person,
            DeliveryMode::Online => self.online,
        }
    }
}

impl Default for DeliveryModes {
    fn default() -> Self {
        Self::both()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;

    fn t(s: &str) -> GridTime {
        s.parse().unwrap()
    }

    #[test]
    fn test_standard_grid_has_26_points() {
        let grid = SlotGrid::standard();
        let points = grid.points();
        assert_eq!(points.len(), 26);
        assert_eq!(points.first(), Some(&t("09:00")));
        assert_eq!(points.last(), Some(&t("21:30")));
    }

    #[test]
    fn test_grid_time_rejects_quarter_hours() {
        assert!(matches!(
            "09:15".parse::<GridTime>(),
            Err(BookingError::InvalidGridAlignment { .. })
        ));
        assert!(GridTime::new(9, 45).is_err());
        assert!(GridTime::new(24, 0).is_err());
    }

    #[test]
    fn test_grid_time_serializes_as_clock_string() {
        let json = serde_json::to_string(&t("09:30")).unwrap();
        assert_eq!(json, "\"09:30\"");
        let back: GridTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t("09:30"));
        assert!(serde_json::from_str::<GridTime>("\"09:10\"").is_err());
    }

    #[test]
    fn test_range_points_are_half_open() {
        let range = TimeRange::new(t("10:00"), t("11:00")).unwrap();
        let points: Vec<_> = range.points().collect();
        assert_eq!(points, vec![t("10:00"), t("10:30")]);
        assert_eq!(range.units(), 2);
    }

    #[test]
    fn test_empty_or_inverted_range_is_rejected() {
        assert!(TimeRange::new(t("10:00"), t("10:00")).is_err());
        assert!(TimeRange::new(t("11:00"), t("10:00")).is_err());
        assert!(serde_json::from_str::<TimeRange>(r#"{"start":"11:00","end":"10:00"}"#).is_err());
    }

    #[test]
    fn test_range_may_end_after_last_point() {
        let grid = SlotGrid::standard();
        let range = TimeRange::new(t("21:30"), t("22:00")).unwrap();
        assert!(grid.validate_range(&range).is_ok());

        let outside = TimeRange::new(t("21:30"), t("22:30")).unwrap();
        assert!(grid.validate_range(&outside).is_err());
    }

    #[test]
    fn test_align_rejects_points_outside_window() {
        let grid = SlotGrid::standard();
        let early = NaiveTime::from_hms_opt(8, 30, 0).unwrap();
        assert!(grid.align(early).is_err());
        let ok = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        assert_eq!(grid.align(ok).unwrap(), t("09:30"));
    }

    proptest! {
        #[test]
        fn prop_unaligned_minutes_never_align(
            hour in 0u32..24,
            minute in 0u32..60,
            second in 0u32..60,
        ) {
            prop_assume!(minute % 30 != 0 || second != 0);
            let time = NaiveTime::from_hms_opt(hour, minute, second).unwrap();
            prop_assert!(SlotGrid::standard().align(time).is_err());
        }

        #[test]
        fn prop_range_covers_units(start in 0u16..40, len in 1u16..8) {
            let start = GridTime::from_minutes(start * 30);
            let end = GridTime::from_minutes(start.minutes() + len * 30);
            let range = TimeRange::new(start, end).unwrap();
            prop_assert_eq!(range.points().count(), usize::from(len));
        }
    }
}
