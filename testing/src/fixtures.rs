//! Builders that seed users, availability and load counters.
//!
//! Fixtures write the same document shapes the engine reads, through the
//! [`DocumentStore`] trait, so they work against any backend.

#![allow(clippy::expect_used)] // literal times and dates in tests
#![allow(clippy::missing_panics_doc)]

use chrono::NaiveDate;
use serde_json::{Value, json};
use tutor_booking_core::{
    BookingError, Collection, DayAvailability, DeliveryModes, DocId, DocumentStore, GridTime,
    MonthKey, Role, SubjectKey, TimeRange, TimeSlot, TutorAvailabilityRecord, TutorId, UserId,
    UserRecord, Version, WeeklyLoadCounter, Write,
};

/// Calendar date from literals.
#[must_use]
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid fixture date")
}

/// Grid time from `"HH:MM"`.
#[must_use]
pub fn time(s: &str) -> GridTime {
    s.parse().expect("fixture time on the grid")
}

/// Range from `"HH:MM"` literals.
#[must_use]
pub fn range(start: &str, end: &str) -> TimeRange {
    TimeRange::new(time(start), time(end)).expect("fixture range is ordered")
}

/// Unbooked slots for every grid point in `[start, end)`.
#[must_use]
pub fn open_slots(start: &str, end: &str, modes: DeliveryModes) -> Vec<TimeSlot> {
    range(start, end)
        .points()
        .map(|point| TimeSlot::open(point, modes))
        .collect()
}

/// A tutor profile under construction.
#[derive(Clone, Debug)]
pub struct TutorFixture {
    id: UserId,
    record: UserRecord,
}

impl TutorFixture {
    /// An active tutor teaching in both modes with no offerings.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: UserId::from(id),
            record: UserRecord {
                role: Role::Tutor,
                active: true,
                first_name: "Tutor".to_string(),
                last_name: id.to_string(),
                email: format!("{id}@example.com"),
                delivery_modes: Some(DeliveryModes::both()),
                offerings: Vec::new(),
            },
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn named(mut self, first: &str, last: &str) -> Self {
        self.record.first_name = first.to_string();
        self.record.last_name = last.to_string();
        self
    }

    /// Add an offering priced in minor units.
    #[must_use]
    pub fn offering(mut self, key: &SubjectKey, price: u32) -> Self {
        self.record.offerings.push(json!({
            "subject": key.subject,
            "grade": key.grade,
            "specialization": key.specialization,
            "price": price,
        }));
        self
    }

    /// Add an offering body verbatim, well-formed or not.
    #[must_use]
    pub fn raw_offering(mut self, offering: Value) -> Self {
        self.record.offerings.push(offering);
        self
    }

    /// Set the tutor-level delivery modes.
    #[must_use]
    pub const fn modes(mut self, modes: DeliveryModes) -> Self {
        self.record.delivery_modes = Some(modes);
        self
    }

    /// Mark the account inactive.
    #[must_use]
    pub const fn inactive(mut self) -> Self {
        self.record.active = false;
        self
    }

    /// The tutor's id.
    #[must_use]
    pub fn id(&self) -> TutorId {
        self.id.clone()
    }

    /// The document body.
    #[must_use]
    pub fn record(&self) -> &UserRecord {
        &self.record
    }

    /// Write the profile to `store`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn seed(&self, store: &dyn DocumentStore) -> Result<TutorId, BookingError> {
        seed_user(store, &self.id, &self.record).await?;
        Ok(self.id())
    }
}

/// A student account.
#[derive(Clone, Debug)]
pub struct StudentFixture {
    id: UserId,
    record: UserRecord,
}

impl StudentFixture {
    /// An active student.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: UserId::from(id),
            record: UserRecord {
                role: Role::Student,
                active: true,
                first_name: "Student".to_string(),
                last_name: id.to_string(),
                email: format!("{id}@example.com"),
                delivery_modes: None,
                offerings: Vec::new(),
            },
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn named(mut self, first: &str, last: &str) -> Self {
        self.record.first_name = first.to_string();
        self.record.last_name = last.to_string();
        self
    }

    /// Write the account to `store`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn seed(&self, store: &dyn DocumentStore) -> Result<UserId, BookingError> {
        seed_user(store, &self.id, &self.record).await?;
        Ok(self.id.clone())
    }
}

async fn seed_user(
    store: &dyn DocumentStore,
    id: &UserId,
    record: &UserRecord,
) -> Result<Version, BookingError> {
    let write = Write::set(Collection::Users, DocId::new(id.as_str()), record, None)?;
    let versions = store.transact(vec![write]).await?;
    Ok(versions.first().copied().unwrap_or(Version::ABSENT))
}

/// Publish `slots` for `tutor_id` on `day`, keeping the rest of the month.
///
/// # Errors
///
/// Propagates store failures and malformed stored records.
pub async fn seed_availability(
    store: &dyn DocumentStore,
    tutor_id: &TutorId,
    day: NaiveDate,
    slots: Vec<TimeSlot>,
) -> Result<Version, BookingError> {
    let month = MonthKey::of(day);
    let id = TutorAvailabilityRecord::doc_id(tutor_id, month);
    let (mut record, version) = match store.get(Collection::Availability, &id).await? {
        Some(doc) => (doc.decode::<TutorAvailabilityRecord>()?, doc.version),
        None => (TutorAvailabilityRecord::empty(tutor_id.clone(), month), Version::ABSENT),
    };
    record.put_day(DayAvailability::new(day, slots))?;
    let write = Write::set(Collection::Availability, id, &record, Some(version))?;
    let versions = store.transact(vec![write]).await?;
    Ok(versions.first().copied().unwrap_or(Version::ABSENT))
}

/// Record `sessions` bookings for `tutor_id` in the week containing `day`.
///
/// # Errors
///
/// Propagates store failures and malformed stored counters.
pub async fn seed_load(
    store: &dyn DocumentStore,
    tutor_id: &TutorId,
    day: NaiveDate,
    sessions: u32,
) -> Result<Version, BookingError> {
    let month = MonthKey::of(day);
    let id = WeeklyLoadCounter::doc_id(tutor_id, month);
    let (mut counter, version) = match store.get(Collection::SessionLoad, &id).await? {
        Some(doc) => (doc.decode::<WeeklyLoadCounter>()?, doc.version),
        None => (WeeklyLoadCounter::empty(tutor_id.clone(), month), Version::ABSENT),
    };
    for _ in 0..sessions {
        counter.record_session(day);
    }
    let write = Write::set(Collection::SessionLoad, id, &counter, Some(version))?;
    let versions = store.transact(vec![write]).await?;
    Ok(versions.first().copied().unwrap_or(Version::ABSENT))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::InMemoryDocumentStore;
    use tutor_booking_core::DeliveryMode;

    #[tokio::test]
    async fn test_seed_availability_merges_days() {
        let store = InMemoryDocumentStore::new();
        let tutor = TutorId::from("t1");
        let monday = open_slots("09:00", "10:00", DeliveryModes::both());
        seed_availability(&store, &tutor, date(2024, 5, 6), monday)
            .await
            .unwrap();
        let tuesday = open_slots("14:00", "15:00", DeliveryModes::online_only());
        let v2 = seed_availability(&store, &tutor, date(2024, 5, 7), tuesday)
            .await
            .unwrap();
        assert_eq!(v2, Version::new(2));

        let id = TutorAvailabilityRecord::doc_id(&tutor, MonthKey::of(date(2024, 5, 1)));
        assert_eq!(id.as_str(), "2024-05_t1");
        let record: TutorAvailabilityRecord = store
            .get(Collection::Availability, &id)
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(record.days().count(), 2);
        let tuesday = record.day(date(2024, 5, 7)).unwrap();
        assert!(tuesday.covers(&range("14:00", "15:00"), DeliveryMode::Online));
        assert!(!tuesday.covers(&range("14:00", "15:00"), DeliveryMode::InPerson));
    }

    #[tokio::test]
    async fn test_seed_load_counts_week() {
        let store = InMemoryDocumentStore::new();
        let tutor = TutorId::from("t1");
        seed_load(&store, &tutor, date(2024, 5, 8), 3).await.unwrap();
        let id = WeeklyLoadCounter::doc_id(&tutor, MonthKey::of(date(2024, 5, 8)));
        assert_eq!(id.as_str(), "t1_2024-05");
        let counter: WeeklyLoadCounter = store
            .get(Collection::SessionLoad, &id)
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(counter.sessions_on_week_of(date(2024, 5, 8)), 3);
    }

    #[tokio::test]
    async fn test_tutor_fixture_document_shape() {
        let store = InMemoryDocumentStore::new();
        let key = SubjectKey::new("Math", "10", "Algebra");
        let id = TutorFixture::new("t9").offering(&key, 4500).seed(&store).await.unwrap();
        let doc = store.get(Collection::Users, &DocId::new(id.as_str())).await.unwrap().unwrap();
        assert_eq!(doc.value["role"], "tutor");
        assert_eq!(doc.value["offerings"][0]["price"], 4500);
    }
}
