//! # Tutor Booking Testing
//!
//! Testing utilities for the tutor booking engine.
//!
//! This crate provides:
//! - [`InMemoryDocumentStore`]: versioned, transactional, with fault injection
//! - Deterministic ports: [`FixedClock`], [`SequentialIds`], [`RecordingMailer`]
//! - Fixtures that seed users, availability and load counters
//!
//! ## Example
//!
//! ```
//! use tutor_booking_core::DeliveryModes;
//! use tutor_booking_testing::{
//!     InMemoryDocumentStore, TutorFixture, date, open_slots, seed_availability,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryDocumentStore::new();
//! let tutor = TutorFixture::new("tutor-a").seed(&store).await?;
//! let slots = open_slots("09:00", "11:00", DeliveryModes::both());
//! seed_availability(&store, &tutor, date(2024, 5, 6), slots).await?;
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod mocks;
pub mod store;

// Re-export commonly used items
pub use fixtures::{
    StudentFixture, TutorFixture, date, open_slots, range, seed_availability, seed_load, time,
};
pub use mocks::{FixedClock, RecordingMailer, SentEmail, SequentialIds, test_clock};
pub use store::InMemoryDocumentStore;
