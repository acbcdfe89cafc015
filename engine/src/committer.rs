//! Booking committer.
//!
//! A commit has two phases:
//!
//! 1. **Read**: resolve both users, resolve the tutor's current price for the
//!    offering, load the availability record and the weekly counter with their
//!    versions, and book the requested range on an in-memory copy of the day.
//! 2. **Write**: one [`DocumentStore::transact`] batch, every document guarded
//!    by the version it was read at (or by absence for new documents):
//!
//! | Collection      | Write                                         |
//! |-----------------|-----------------------------------------------|
//! | `session_load`  | `per_week.{week}` incremented by one          |
//! | `availability`  | month record with the day's slots booked      |
//! | `appointments`  | the new appointment                           |
//! | `notifications` | one for the student, one for the tutor        |
//! | `outbox`        | one pending confirmation email for both users |
//!
//! Nothing is written unless all of it lands. A lost version check re-runs the
//! whole commit from the read phase; slots found already booked during the
//! read phase end the commit with `StaleAvailabilityWrite` so the caller can
//! re-match.

use crate::adapter::AvailabilityStore;
use crate::retry::{RetryPolicy, retry_with_predicate};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tutor_booking_core::{
    Appointment, AppointmentId, AppointmentStatus, BookingError, Clock, Collection, DeliveryMode,
    DocId, DocumentStore, IdGenerator, MonthKey, Notification, NotificationId, NotificationKind,
    OutboxEntry, OutboxEntryId, OutboxStatus, Result, SessionEvent, StudentId, SubjectKey,
    TimeRange, TutorId, User, UserDirectory, UserId, Version, Write,
};

/// Everything needed to book one session with a chosen tutor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRequest {
    /// Booking student
    pub student_id: StudentId,
    /// Chosen tutor
    pub tutor_id: TutorId,
    /// Session day
    pub day: NaiveDate,
    /// Session range
    pub range: TimeRange,
    /// Offering booked
    pub offering: SubjectKey,
    /// Delivery mode
    pub mode: DeliveryMode,
    /// Free-text comments
    pub comments: String,
}

/// Commits bookings atomically.
#[derive(Clone)]
pub struct BookingCommitter {
    store: Arc<dyn DocumentStore>,
    adapter: AvailabilityStore,
    directory: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry: RetryPolicy,
}

impl BookingCommitter {
    /// Create a committer.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        directory: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            adapter: AvailabilityStore::new(Arc::clone(&store)),
            store,
            directory,
            clock,
            ids,
            retry,
        }
    }

    /// Book `request.range` with `request.tutor_id`.
    ///
    /// # Errors
    ///
    /// - `NoSuchUser` if either participant is unknown
    /// - `PriceNotFound` if the tutor no longer offers the subject
    /// - `StaleAvailabilityWrite` if any slot of the range is missing, booked
    ///   or no longer accepts the mode
    /// - `ConcurrentModification` if version checks kept failing after retries
    /// - `StoreUnavailable` / `MalformedRecord` from the store
    #[tracing::instrument(
        skip(self, request),
        fields(
            student_id = %request.student_id,
            tutor_id = %request.tutor_id,
            day = %request.day,
            range = %request.range,
        )
    )]
    pub async fn commit(&self, request: &CommitRequest) -> Result<Appointment> {
        let result = retry_with_predicate(
            self.retry,
            move || self.attempt(request),
            |err| {
                let conflict = matches!(err, BookingError::ConcurrentModification(_));
                if conflict {
                    metrics::counter!("booking.conflicts").increment(1);
                }
                conflict
            },
        )
        .await;

        match &result {
            Ok(appointment) => {
                metrics::counter!("booking.committed").increment(1);
                tracing::info!(appointment_id = %appointment.id, "booking committed");
            }
            Err(err @ BookingError::StaleAvailabilityWrite { .. }) => {
                metrics::counter!("booking.stale").increment(1);
                tracing::warn!(error = %err, "slots taken before commit");
            }
            Err(err) => tracing::warn!(error = %err, "booking commit failed"),
        }
        result
    }

    async fn attempt(&self, request: &CommitRequest) -> Result<Appointment> {
        // Read phase
        let student = self.directory.get_user(&request.student_id).await?;
        let tutor = self.directory.get_user(&request.tutor_id).await?;
        let price = self
            .directory
            .tutor_listing(&request.tutor_id)
            .await?
            .price_for(&request.offering)
            .ok_or_else(|| BookingError::PriceNotFound {
                tutor_id: request.tutor_id.clone(),
                subject: request.offering.clone(),
            })?;

        let month = MonthKey::of(request.day);
        let mut record = self.adapter.load_record(&request.tutor_id, month).await?;
        let counter = self.adapter.load_counter(&request.tutor_id, month).await?;

        let mut day = record
            .value
            .day(request.day)
            .ok_or_else(|| BookingError::StaleAvailabilityWrite {
                tutor_id: request.tutor_id.clone(),
                day: request.day,
            })?;
        day.book(&request.tutor_id, &request.range, request.mode)?;
        record.value.put_day(day)?;

        // Write phase
        let now = self.clock.now();
        let appointment = Appointment {
            id: AppointmentId::from_uuid(self.ids.next_id()),
            student_id: request.student_id.clone(),
            tutor_id: request.tutor_id.clone(),
            offering: request.offering.clone(),
            price,
            day: request.day,
            range: request.range,
            mode: request.mode,
            comments: request.comments.clone(),
            status: AppointmentStatus::Booked,
            created_at: now,
        };
        let for_student = self.notification(&appointment, &student.id, &tutor, now);
        let for_tutor = self.notification(&appointment, &tutor.id, &student, now);
        let email = self.confirmation_email(&appointment, &student, &tutor, now);

        let writes = vec![
            AvailabilityStore::counter_write(&counter, request.day)?,
            AvailabilityStore::record_write(&record.value, record.version)?,
            new_document(Collection::Appointments, appointment.id.to_string(), &appointment)?,
            new_document(Collection::Notifications, for_student.id.to_string(), &for_student)?,
            new_document(Collection::Notifications, for_tutor.id.to_string(), &for_tutor)?,
            new_document(Collection::Outbox, email.id.to_string(), &email)?,
        ];
        self.store.transact(writes).await?;
        Ok(appointment)
    }

    fn notification(
        &self,
        appointment: &Appointment,
        recipient: &UserId,
        counterparty: &User,
        now: DateTime<Utc>,
    ) -> Notification {
        Notification {
            id: NotificationId::from_uuid(self.ids.next_id()),
            recipient_user_id: recipient.clone(),
            kind: NotificationKind::Session,
            sub_event: SessionEvent::Booked,
            appointment_id: appointment.id,
            day: appointment.day,
            range: appointment.range,
            counterparty_name: counterparty.display_name(),
            offering: appointment.offering.clone(),
            price: appointment.price,
            mode: appointment.mode,
            comments: appointment.comments.clone(),
            created_at: now,
        }
    }

    fn confirmation_email(
        &self,
        appointment: &Appointment,
        student: &User,
        tutor: &User,
        now: DateTime<Utc>,
    ) -> OutboxEntry {
        OutboxEntry {
            id: OutboxEntryId::from_uuid(self.ids.next_id()),
            appointment_id: appointment.id,
            recipients: vec![student.id.clone(), tutor.id.clone()],
            subject_line: format!("Session booked: {}", appointment.offering.subject),
            html_body: confirmation_body(appointment, student, tutor),
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
        }
    }
}

fn new_document<T: serde::Serialize>(
    collection: Collection,
    id: String,
    value: &T,
) -> Result<Write> {
    Ok(Write::set(collection, DocId::new(id), value, Some(Version::ABSENT))?)
}

fn confirmation_body(appointment: &Appointment, student: &User, tutor: &User) -> String {
    let comments = if appointment.comments.is_empty() {
        String::new()
    } else {
        format!("<p>Comments: {}</p>", escape(&appointment.comments))
    };
    format!(
        "<h1>Session booked</h1>\
         <p>{student} and {tutor} have a {subject} session ({grade}, {specialization}).</p>\
         <p>{day}, {range} &middot; {mode} &middot; {price}</p>{comments}",
        student = escape(&student.display_name()),
        tutor = escape(&tutor.display_name()),
        subject = escape(&appointment.offering.subject),
        grade = escape(&appointment.offering.grade),
        specialization = escape(&appointment.offering.specialization),
        day = appointment.day.format("%A %-d %B %Y"),
        range = appointment.range,
        mode = appointment.mode,
        price = appointment.price,
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
