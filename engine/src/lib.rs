//! # Tutor Booking Engine
//!
//! Matches students to tutors and commits bookings without double-booking.
//!
//! ## Flow
//!
//! ```text
//! BookingRequest
//!     │
//!     ▼
//! find_candidates ── catalog: subject, grade, specialization, price, mode
//!     │
//!     ▼
//! match_contiguous ── every 30-minute point of the range free in that mode
//!     │
//!     ▼
//! pick_least_loaded ── fewest sessions in the week, ties by tutor id
//!     │
//!     ▼
//! BookingCommitter ── one versioned transaction: slots, counter,
//!     │                appointment, two notifications, outbox entry
//!     ▼
//! OutboxDispatcher ── confirmation email to both participants
//! ```
//!
//! Tutors maintain their slots through [`AvailabilityEditor`]; both the editor
//! and the committer rewrite a day's slot list whole and guard the write with
//! the version they read.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tutor_booking_engine::{BookingEngine, LogMailer};
//! use tutor_booking_testing::InMemoryDocumentStore;
//!
//! let store = Arc::new(InMemoryDocumentStore::new());
//! let engine = BookingEngine::builder(store, Arc::new(LogMailer)).build();
//! assert_eq!(engine.grid().points().len(), 26);
//! ```

pub mod adapter;
pub mod balancer;
pub mod candidates;
pub mod committer;
pub mod config;
pub mod directory;
pub mod editor;
pub mod engine;
pub mod matcher;
pub mod notifications;
pub mod outbox;
pub mod retry;

pub use adapter::AvailabilityStore;
pub use balancer::{least_loaded, pick_least_loaded};
pub use candidates::{CandidateQuery, find_candidates, is_candidate};
pub use committer::{BookingCommitter, CommitRequest};
pub use config::Config;
pub use directory::DocumentDirectory;
pub use editor::{AvailabilityEditor, EditorState};
pub use engine::{BookingEngine, BookingEngineBuilder, BookingOutcome, BookingRequest};
pub use matcher::{covers, match_contiguous};
pub use notifications::notifications_for;
pub use outbox::{DrainReport, LogMailer, OutboxDispatcher};
pub use retry::{RetryPolicy, retry_with_predicate};
