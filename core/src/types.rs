//! Domain types shared by the booking engine.

use crate::grid::{DeliveryMode, DeliveryModes, TimeRange};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier assigned to a user by the auth provider.
///
/// Ordered lexicographically; the load balancer relies on this to break ties.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a raw id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A user acting as tutor.
pub type TutorId = UserId;

/// A user acting as student.
pub type StudentId = UserId;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an appointment
    AppointmentId
);
uuid_id!(
    /// Unique identifier for a notification
    NotificationId
);
uuid_id!(
    /// Unique identifier for a pending email in the outbox
    OutboxEntryId
);

// ============================================================================
// Offerings
// ============================================================================

/// Session price in minor currency units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(u32);

impl Price {
    /// Create a price from minor units.
    #[must_use]
    pub const fn new(minor_units: u32) -> Self {
        Self(minor_units)
    }

    /// Minor units.
    #[must_use]
    pub const fn minor_units(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Inclusive price filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    /// Lowest acceptable price
    pub min: Price,
    /// Highest acceptable price
    pub max: Price,
}

impl PriceRange {
    /// Create a range. An inverted range matches nothing.
    #[must_use]
    pub const fn new(min: Price, max: Price) -> Self {
        Self { min, max }
    }

    /// Any price.
    #[must_use]
    pub const fn any() -> Self {
        Self::new(Price(0), Price(u32::MAX))
    }

    /// Whether `price` lies within the bounds.
    #[must_use]
    pub fn contains(&self, price: Price) -> bool {
        self.min <= price && price <= self.max
    }
}

/// The matching key of an offering: subject, grade and specialization.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    /// Subject name
    pub subject: String,
    /// Grade level
    pub grade: String,
    /// Specialization within the subject
    pub specialization: String,
}

impl SubjectKey {
    /// Create a key.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        grade: impl Into<String>,
        specialization: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            grade: grade.into(),
            specialization: specialization.into(),
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.subject, self.grade, self.specialization)
    }
}

/// One subject a tutor teaches, at a price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectOffering {
    /// What is taught
    #[serde(flatten)]
    pub key: SubjectKey,
    /// Price per session
    pub price: Price,
}

// ============================================================================
// Directory views
// ============================================================================

/// Contact details of a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: UserId,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Email address
    pub email: String,
}

impl User {
    /// Name shown to the other participant.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// An active tutor and what they offer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TutorListing {
    /// Tutor id
    pub tutor_id: TutorId,
    /// Modes the tutor teaches in
    pub delivery_modes: DeliveryModes,
    /// Well-formed offerings
    pub offerings: Vec<SubjectOffering>,
}

impl TutorListing {
    /// Price of the offering matching `key`, if offered.
    #[must_use]
    pub fn price_for(&self, key: &SubjectKey) -> Option<Price> {
        self.offerings
            .iter()
            .find(|offering| &offering.key == key)
            .map(|offering| offering.price)
    }
}

// ============================================================================
// Appointments and notifications
// ============================================================================

/// Lifecycle status of an appointment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    /// Slots consumed, session scheduled
    Booked,
}

/// A committed session between a student and a tutor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Appointment id
    pub id: AppointmentId,
    /// Booking student
    pub student_id: StudentId,
    /// Booked tutor
    pub tutor_id: TutorId,
    /// Subject taught
    pub offering: SubjectKey,
    /// Price resolved at commit time
    pub price: Price,
    /// Session day
    pub day: NaiveDate,
    /// Session time range
    pub range: TimeRange,
    /// Delivery mode
    pub mode: DeliveryMode,
    /// Free-text comments from the student
    pub comments: String,
    /// Status
    pub status: AppointmentStatus,
    /// When the booking was committed
    pub created_at: DateTime<Utc>,
}

/// Notification category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Session lifecycle notification
    Session,
}

/// What happened to the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A session was booked
    Booked,
}

/// In-app notification for one participant of a booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification id
    pub id: NotificationId,
    /// Who sees it
    pub recipient_user_id: UserId,
    /// Category
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Event within the category
    pub sub_event: SessionEvent,
    /// Appointment the notification refers to
    pub appointment_id: AppointmentId,
    /// Session day
    pub day: NaiveDate,
    /// Session time range
    pub range: TimeRange,
    /// Display name of the other participant
    pub counterparty_name: String,
    /// Subject taught
    pub offering: SubjectKey,
    /// Session price
    pub price: Price,
    /// Delivery mode
    pub mode: DeliveryMode,
    /// Student comments
    pub comments: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Outbox
// ============================================================================

/// Delivery state of an outbox entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting for the dispatcher
    Pending,
    /// Delivered to every recipient
    Sent,
    /// Gave up after the maximum number of attempts
    Failed,
}

/// An email written in the same transaction as its appointment and sent later.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Entry id
    pub id: OutboxEntryId,
    /// Appointment that produced the email
    pub appointment_id: AppointmentId,
    /// Users to send to
    pub recipients: Vec<UserId>,
    /// Subject line
    pub subject_line: String,
    /// HTML body
    pub html_body: String,
    /// Delivery state
    pub status: OutboxStatus,
    /// Delivery attempts so far
    pub attempts: u32,
    /// Last delivery error, if any
    pub last_error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Stored user shape
// ============================================================================

/// Role of a user account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Books sessions
    Student,
    /// Publishes availability and teaches
    Tutor,
}

/// A `users` document as stored.
///
/// Offerings stay untyped here so that one malformed entry can be skipped
/// without rejecting the whole profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Account role
    pub role: Role,
    /// Whether the account is active
    #[serde(default)]
    pub active: bool,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Email address
    pub email: String,
    /// Modes a tutor teaches in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_modes: Option<DeliveryModes>,
    /// Raw subject offerings
    #[serde(default)]
    pub offerings: Vec<serde_json::Value>,
}
