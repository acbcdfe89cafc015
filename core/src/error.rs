//! Error taxonomy for booking operations.

use crate::grid::GridTime;
use crate::store::StoreError;
use crate::types::{SubjectKey, UserId};
use chrono::NaiveDate;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by the availability editor, the matcher and the committer.
///
/// An empty match is not an error: matching returns an empty set and the
/// booking facade reports it as an outcome.
#[derive(Error, Debug)]
pub enum BookingError {
    /// Input time is not on the 30-minute grid or falls outside the daily window.
    #[error("Time {time} is not on the availability grid")]
    InvalidGridAlignment {
        /// The offending time as supplied
        time: String,
    },

    /// A range whose end is not after its start.
    #[error("Invalid time range {start}-{end}")]
    InvalidTimeRange {
        /// Requested start
        start: GridTime,
        /// Requested end
        end: GridTime,
    },

    /// The editor was asked to unpublish a slot that already holds a booking.
    #[error("Slot {time} on {day} is already booked")]
    SlotAlreadyBooked {
        /// Day of the slot
        day: NaiveDate,
        /// Slot time
        time: GridTime,
    },

    /// Stored slot state no longer matches what the caller read.
    #[error("Availability of tutor {tutor_id} on {day} changed since it was read")]
    StaleAvailabilityWrite {
        /// Tutor whose availability changed
        tutor_id: UserId,
        /// Affected day
        day: NaiveDate,
    },

    /// The tutor no longer offers the requested subject.
    #[error("Tutor {tutor_id} has no price for {subject}")]
    PriceNotFound {
        /// Tutor queried
        tutor_id: UserId,
        /// Offering that could not be resolved
        subject: SubjectKey,
    },

    /// Unknown user id.
    #[error("No such user: {0}")]
    NoSuchUser(UserId),

    /// A stored record could not be decoded into its typed shape.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Optimistic concurrency check failed and retries were exhausted.
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Transport or backend failure.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// An editor operation that needs a selected day was called before `select_day`.
    #[error("No day selected")]
    NoDaySelected,
}

impl BookingError {
    /// Whether re-running the whole operation from a fresh read may succeed.
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification(_) | Self::StaleAvailabilityWrite { .. }
        )
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrencyConflict { .. } => {
                Self::ConcurrentModification(err.to_string())
            }
            StoreError::Serialization(msg) => Self::MalformedRecord(msg),
            StoreError::NotFound { .. }
            | StoreError::InvalidUpdate(_)
            | StoreError::Unavailable(_) => Self::StoreUnavailable(err.to_string()),
        }
    }
}

/// Result alias for booking operations.
pub type Result<T> = std::result::Result<T, BookingError>;

/// Boxed future returned by dyn-compatible booking ports.
pub type BookingFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;
