//! # Tutor Booking Core
//!
//! Types and ports for the tutor availability and booking engine.
//!
//! - [`grid`]: the fixed 30-minute grid, time ranges and delivery modes
//! - [`availability`]: slots, days, monthly availability records, weekly load counters
//! - [`types`]: identifiers, offerings, appointments, notifications, outbox entries
//! - [`store`]: the versioned [`DocumentStore`](store::DocumentStore) port
//! - [`ports`]: user directory, email dispatcher, clock and id ports
//! - [`error`]: the [`BookingError`] taxonomy
//!
//! The engine logic lives in `tutor-booking-engine`; this crate has no I/O.

pub mod availability;
pub mod error;
pub mod grid;
pub mod ports;
pub mod store;
pub mod types;

pub use availability::{
    DayAvailability, MonthKey, TimeSlot, TutorAvailabilityRecord, WeeklyLoadCounter, week_index,
};
pub use error::{BookingError, BookingFuture, Result};
pub use grid::{DeliveryMode, DeliveryModes, GridTime, SlotGrid, TimeRange};
pub use ports::{
    Clock, DispatchError, EmailDispatcher, IdGenerator, RandomIds, SystemClock, UserDirectory,
};
pub use store::{
    Applied, Collection, DocId, Document, DocumentStore, FieldDelta, StoreError, StoreFuture,
    Version, Versioned, Write, WriteKind,
};
pub use types::{
    Appointment, AppointmentId, AppointmentStatus, Notification, NotificationId,
    NotificationKind, OutboxEntry, OutboxEntryId, OutboxStatus, Price, PriceRange,
    Role, SessionEvent, StudentId, SubjectKey, SubjectOffering, TutorId, TutorListing, User,
    UserId, UserRecord,
};
