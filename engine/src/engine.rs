//! Booking facade: search, book and edit availability through one handle.

use crate::adapter::AvailabilityStore;
use crate::balancer::pick_least_loaded;
use crate::candidates::{CandidateQuery, find_candidates};
use crate::committer::{BookingCommitter, CommitRequest};
use crate::config::Config;
use crate::directory::DocumentDirectory;
use crate::editor::AvailabilityEditor;
use crate::matcher::match_contiguous;
use crate::notifications::notifications_for;
use crate::outbox::{DrainReport, OutboxDispatcher};
use crate::retry::{RetryPolicy, retry_with_predicate};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tutor_booking_core::{
    Appointment, BookingError, Clock, DeliveryMode, DocumentStore, EmailDispatcher, IdGenerator,
    Notification, PriceRange, RandomIds, Result, SlotGrid, StudentId, SubjectKey, SystemClock,
    TimeRange, TutorId, UserDirectory, UserId,
};

/// A student's request for one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingRequest {
    /// Subject, grade and specialization
    pub subject: SubjectKey,
    /// Acceptable price, inclusive
    pub price_range: PriceRange,
    /// Delivery mode
    pub mode: DeliveryMode,
    /// Session day
    pub day: NaiveDate,
    /// Session range
    pub range: TimeRange,
    /// Free-text comments for the tutor
    pub comments: String,
}

impl BookingRequest {
    fn query(&self) -> CandidateQuery {
        CandidateQuery {
            subject: self.subject.clone(),
            price_range: self.price_range,
            mode: self.mode,
        }
    }
}

/// How a booking attempt ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingOutcome {
    /// A tutor was chosen and the session committed
    Booked(Appointment),
    /// No candidate covers the requested range
    NoTutorAvailable,
}

/// The booking engine.
#[derive(Clone)]
pub struct BookingEngine {
    adapter: AvailabilityStore,
    directory: Arc<dyn UserDirectory>,
    committer: BookingCommitter,
    outbox: OutboxDispatcher,
    grid: SlotGrid,
    retry: RetryPolicy,
}

impl BookingEngine {
    /// Start building an engine over `store`, sending email through `mailer`.
    #[must_use]
    pub fn builder(
        store: Arc<dyn DocumentStore>,
        mailer: Arc<dyn EmailDispatcher>,
    ) -> BookingEngineBuilder {
        BookingEngineBuilder {
            store,
            mailer,
            directory: None,
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIds),
            grid: SlotGrid::standard(),
            retry: RetryPolicy::default(),
            outbox_batch_size: 50,
            outbox_max_attempts: 5,
        }
    }

    /// The daily booking window.
    #[must_use]
    pub const fn grid(&self) -> SlotGrid {
        self.grid
    }

    /// Tutors that can take `request`: catalog match first, then contiguous
    /// availability.
    ///
    /// # Errors
    ///
    /// `InvalidGridAlignment` if the range leaves the daily window, or store
    /// and directory failures.
    #[tracing::instrument(
        skip(self, request),
        fields(day = %request.day, range = %request.range, mode = %request.mode)
    )]
    pub async fn search(&self, request: &BookingRequest) -> Result<BTreeSet<TutorId>> {
        self.grid.validate_range(&request.range)?;
        let candidates = find_candidates(self.directory.as_ref(), &request.query()).await?;
        if candidates.is_empty() {
            return Ok(candidates);
        }
        match_contiguous(
            &self.adapter,
            request.day,
            &request.range,
            request.mode,
            &candidates,
        )
        .await
    }

    /// Find the least loaded available tutor and book them.
    ///
    /// Contention (slots taken or versions moved since the match) restarts the
    /// whole search. After a successful commit the outbox is drained on a
    /// background task, so the outcome never waits on email delivery.
    ///
    /// # Errors
    ///
    /// Any commit error other than contention, or contention that outlasts
    /// the retry policy.
    #[tracing::instrument(
        skip(self, student_id, request),
        fields(student_id = %student_id, day = %request.day, range = %request.range)
    )]
    pub async fn book(
        &self,
        student_id: &StudentId,
        request: &BookingRequest,
    ) -> Result<BookingOutcome> {
        let outcome = retry_with_predicate(
            self.retry,
            move || self.book_once(student_id, request),
            BookingError::is_contention,
        )
        .await?;

        match &outcome {
            BookingOutcome::Booked(appointment) => self.drain_in_background(appointment),
            BookingOutcome::NoTutorAvailable => {
                metrics::counter!("booking.no_match").increment(1);
                tracing::info!("no tutor available");
            }
        }
        Ok(outcome)
    }

    fn drain_in_background(&self, appointment: &Appointment) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                appointment_id = %appointment.id,
                "no runtime, outbox left for the next drain"
            );
            return;
        };
        let outbox = self.outbox.clone();
        let appointment_id = appointment.id;
        runtime.spawn(async move {
            match outbox.drain().await {
                Ok(report) => tracing::debug!(
                    %appointment_id,
                    sent = report.sent,
                    retrying = report.retrying,
                    failed = report.failed,
                    "outbox drained"
                ),
                Err(err) => tracing::warn!(%appointment_id, error = %err, "outbox drain failed"),
            }
        });
    }

    async fn book_once(
        &self,
        student_id: &StudentId,
        request: &BookingRequest,
    ) -> Result<BookingOutcome> {
        let matched = self.search(request).await?;
        let Some(tutor_id) = pick_least_loaded(&self.adapter, &matched, request.day).await? else {
            return Ok(BookingOutcome::NoTutorAvailable);
        };
        tracing::debug!(tutor_id = %tutor_id, matched = matched.len(), "tutor picked");

        let appointment = self
            .committer
            .commit(&CommitRequest {
                student_id: student_id.clone(),
                tutor_id,
                day: request.day,
                range: request.range,
                offering: request.subject.clone(),
                mode: request.mode,
                comments: request.comments.clone(),
            })
            .await?;
        Ok(BookingOutcome::Booked(appointment))
    }

    /// An availability editor for `tutor_id`.
    #[must_use]
    pub fn editor(&self, tutor_id: TutorId) -> AvailabilityEditor {
        AvailabilityEditor::new(tutor_id, self.adapter.clone(), self.grid)
    }

    /// Deliver pending confirmation emails.
    ///
    /// # Errors
    ///
    /// See [`OutboxDispatcher::drain`].
    pub async fn drain_outbox(&self) -> Result<DrainReport> {
        self.outbox.drain().await
    }

    /// Notifications of `user_id`, newest first.
    ///
    /// # Errors
    ///
    /// See [`notifications_for`].
    pub async fn notifications(&self, user_id: &UserId) -> Result<Vec<Notification>> {
        notifications_for(self.adapter.store().as_ref(), user_id).await
    }
}

/// Builder for [`BookingEngine`].
pub struct BookingEngineBuilder {
    store: Arc<dyn DocumentStore>,
    mailer: Arc<dyn EmailDispatcher>,
    directory: Option<Arc<dyn UserDirectory>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    grid: SlotGrid,
    retry: RetryPolicy,
    outbox_batch_size: usize,
    outbox_max_attempts: u32,
}

impl BookingEngineBuilder {
    /// Apply grid, retry and outbox settings from `config`.
    ///
    /// # Errors
    ///
    /// Returns the grid validation error if the configured window is invalid.
    pub fn config(mut self, config: &Config) -> Result<Self> {
        self.grid = config.slot_grid()?;
        self.retry = config.retry_policy();
        self.outbox_batch_size = config.outbox.batch_size;
        self.outbox_max_attempts = config.outbox.max_attempts;
        Ok(self)
    }

    /// Use another user directory instead of the `users` collection.
    #[must_use]
    pub fn directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Use another clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use another id source.
    #[must_use]
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Set the daily window.
    #[must_use]
    pub const fn grid(mut self, grid: SlotGrid) -> Self {
        self.grid = grid;
        self
    }

    /// Set the retry policy for commits and re-matching.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the engine.
    #[must_use]
    pub fn build(self) -> BookingEngine {
        let directory: Arc<dyn UserDirectory> = match self.directory {
            Some(directory) => directory,
            None => Arc::new(DocumentDirectory::new(Arc::clone(&self.store))),
        };
        BookingEngine {
            adapter: AvailabilityStore::new(Arc::clone(&self.store)),
            committer: BookingCommitter::new(
                Arc::clone(&self.store),
                Arc::clone(&directory),
                self.clock,
                self.ids,
                self.retry,
            ),
            outbox: OutboxDispatcher::new(
                Arc::clone(&self.store),
                self.mailer,
                self.outbox_batch_size,
                self.outbox_max_attempts,
            ),
            directory,
            grid: self.grid,
            retry: self.retry,
        }
    }
}
