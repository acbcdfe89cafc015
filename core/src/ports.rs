//! Ports to the collaborators the engine does not own: the user directory,
//! the email dispatcher, the clock and the id source.
//!
//! Each port is a dyn-compatible trait so the engine can hold it as
//! `Arc<dyn Port>`; tests swap in deterministic implementations from
//! `tutor-booking-testing`.

use crate::error::BookingFuture;
use crate::types::{SubjectKey, TutorListing, User, UserId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Read access to users and tutor profiles.
pub trait UserDirectory: Send + Sync {
    /// Active tutors offering `key` at any price.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::StoreUnavailable` on backend failure.
    fn active_tutors_by_subject(&self, key: &SubjectKey) -> BookingFuture<'_, Vec<TutorListing>>;

    /// The current listing of one tutor, active or not.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::NoSuchUser` if the id is unknown or not a tutor.
    fn tutor_listing(&self, tutor_id: &UserId) -> BookingFuture<'_, TutorListing>;

    /// Contact details of a user.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::NoSuchUser` if the id is unknown.
    fn get_user(&self, user_id: &UserId) -> BookingFuture<'_, User>;
}

/// Email delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Email dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// Sends one email to one user. Delivery mechanics are the implementor's concern.
pub trait EmailDispatcher: Send + Sync {
    /// Send an HTML email.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the message could not be handed off.
    fn send(
        &self,
        to: &UserId,
        subject_line: &str,
        html_body: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>>;
}

/// Clock trait for time-based operations.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of ids for appointments, notifications and outbox entries.
pub trait IdGenerator: Send + Sync {
    /// A fresh, unique id.
    fn next_id(&self) -> Uuid;
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}
