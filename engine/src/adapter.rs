//! Availability store adapter.
//!
//! Reads and writes the two shared mutable documents of the engine: a tutor's
//! monthly [`TutorAvailabilityRecord`] and their [`WeeklyLoadCounter`]. Every
//! read returns the version it saw so writers can make their writes
//! conditional on it. Records are rewritten whole; a day's slot list is never
//! patched slot by slot.

use chrono::NaiveDate;
use std::sync::Arc;
use tutor_booking_core::{
    Collection, DayAvailability, DocumentStore, FieldDelta, MonthKey, Result,
    TutorAvailabilityRecord, TutorId, Version, Versioned, WeeklyLoadCounter, Write, week_index,
};

/// Typed access to availability records and load counters.
#[derive(Clone)]
pub struct AvailabilityStore {
    store: Arc<dyn DocumentStore>,
}

impl AvailabilityStore {
    /// Wrap a document store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// The underlying document store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Load the record of `tutor_id` for `month`.
    ///
    /// A month never saved yields an empty record at [`Version::ABSENT`].
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` on backend failure, `MalformedRecord` if the stored
    /// document does not decode.
    pub async fn load_record(
        &self,
        tutor_id: &TutorId,
        month: MonthKey,
    ) -> Result<Versioned<TutorAvailabilityRecord>> {
        let id = TutorAvailabilityRecord::doc_id(tutor_id, month);
        match self.store.get(Collection::Availability, &id).await? {
            Some(doc) => Ok(Versioned {
                value: doc.decode()?,
                version: doc.version,
            }),
            None => Ok(Versioned {
                value: TutorAvailabilityRecord::empty(tutor_id.clone(), month),
                version: Version::ABSENT,
            }),
        }
    }

    /// Load one day of `tutor_id`'s availability.
    ///
    /// # Errors
    ///
    /// See [`AvailabilityStore::load_record`].
    pub async fn load_day(
        &self,
        tutor_id: &TutorId,
        day: NaiveDate,
    ) -> Result<Option<DayAvailability>> {
        let record = self.load_record(tutor_id, MonthKey::of(day)).await?;
        Ok(record.value.day(day))
    }

    /// Write `record` if the stored version is still `expected`.
    ///
    /// # Errors
    ///
    /// `ConcurrentModification` if the record changed since it was read.
    pub async fn save_record(
        &self,
        record: &TutorAvailabilityRecord,
        expected: Version,
    ) -> Result<Version> {
        let versions = self
            .store
            .transact(vec![Self::record_write(record, expected)?])
            .await?;
        tracing::debug!(
            tutor_id = %record.tutor_id,
            month = %record.month,
            expected = %expected,
            "availability record saved"
        );
        Ok(versions.first().copied().unwrap_or(expected))
    }

    /// Load the weekly load counter of `tutor_id` for `month`.
    ///
    /// A missing counter reads as all zeros at [`Version::ABSENT`].
    ///
    /// # Errors
    ///
    /// See [`AvailabilityStore::load_record`].
    pub async fn load_counter(
        &self,
        tutor_id: &TutorId,
        month: MonthKey,
    ) -> Result<Versioned<WeeklyLoadCounter>> {
        let id = WeeklyLoadCounter::doc_id(tutor_id, month);
        match self.store.get(Collection::SessionLoad, &id).await? {
            Some(doc) => Ok(Versioned {
                value: doc.decode()?,
                version: doc.version,
            }),
            None => Ok(Versioned {
                value: WeeklyLoadCounter::empty(tutor_id.clone(), month),
                version: Version::ABSENT,
            }),
        }
    }

    /// Staged whole-record write, conditional on `expected`.
    ///
    /// # Errors
    ///
    /// `MalformedRecord` if the record cannot be serialized.
    pub fn record_write(record: &TutorAvailabilityRecord, expected: Version) -> Result<Write> {
        let id = TutorAvailabilityRecord::doc_id(&record.tutor_id, record.month);
        Ok(Write::set(Collection::Availability, id, record, Some(expected))?)
    }

    /// Staged write adding one session to the week containing `day`.
    ///
    /// An existing counter is incremented in place; a missing one is created.
    ///
    /// # Errors
    ///
    /// `MalformedRecord` if a new counter cannot be serialized.
    pub fn counter_write(counter: &Versioned<WeeklyLoadCounter>, day: NaiveDate) -> Result<Write> {
        let id = WeeklyLoadCounter::doc_id(&counter.value.tutor_id, counter.value.month);
        if counter.version == Version::ABSENT {
            let mut fresh = counter.value.clone();
            fresh.record_session(day);
            return Ok(Write::set(Collection::SessionLoad, id, &fresh, Some(Version::ABSENT))?);
        }
        Ok(Write::update(
            Collection::SessionLoad,
            id,
            vec![FieldDelta::increment(format!("per_week.{}", week_index(day)), 1)],
            Some(counter.version),
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tutor_booking_core::{BookingError, DeliveryModes};
    use tutor_booking_testing::{InMemoryDocumentStore, date, open_slots, seed_availability};

    fn adapter() -> (InMemoryDocumentStore, AvailabilityStore) {
        let store = InMemoryDocumentStore::new();
        let adapter = AvailabilityStore::new(Arc::new(store.clone()));
        (store, adapter)
    }

    #[tokio::test]
    async fn test_missing_month_is_empty_and_absent() {
        let (_, adapter) = adapter();
        let tutor = TutorId::from("t1");
        let record = adapter.load_record(&tutor, MonthKey::of(date(2024, 5, 1))).await.unwrap();
        assert_eq!(record.version, Version::ABSENT);
        assert_eq!(record.value.days().count(), 0);
        assert!(adapter.load_day(&tutor, date(2024, 5, 6)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_is_conditional() {
        let (store, adapter) = adapter();
        let tutor = TutorId::from("t1");
        let day = date(2024, 5, 6);
        seed_availability(&store, &tutor, day, open_slots("09:00", "10:00", DeliveryModes::both()))
            .await
            .unwrap();

        let read = adapter.load_record(&tutor, MonthKey::of(day)).await.unwrap();
        let v2 = adapter.save_record(&read.value, read.version).await.unwrap();
        assert_eq!(v2, Version::new(2));

        let stale = adapter.save_record(&read.value, read.version).await;
        assert!(matches!(stale, Err(BookingError::ConcurrentModification(_))));
    }

    #[tokio::test]
    async fn test_counter_write_creates_then_increments() {
        let (store, adapter) = adapter();
        let tutor = TutorId::from("t1");
        let day = date(2024, 5, 8);
        let month = MonthKey::of(day);

        for _ in 0..2 {
            let counter = adapter.load_counter(&tutor, month).await.unwrap();
            let write = AvailabilityStore::counter_write(&counter, day).unwrap();
            store.transact(vec![write]).await.unwrap();
        }

        let counter = adapter.load_counter(&tutor, month).await.unwrap();
        assert_eq!(counter.version, Version::new(2));
        assert_eq!(counter.value.sessions_on_week_of(day), 2);
        assert_eq!(counter.value.sessions_in_week(1), 0);
    }

    #[tokio::test]
    async fn test_malformed_record_surfaces() {
        let (store, adapter) = adapter();
        let tutor = TutorId::from("t1");
        let month = MonthKey::of(date(2024, 5, 1));
        store
            .set(
                Collection::Availability,
                &TutorAvailabilityRecord::doc_id(&tutor, month),
                serde_json::json!({"tutor_id": "t1", "month": "May"}),
                None,
            )
            .await
            .unwrap();
        let result = adapter.load_record(&tutor, month).await;
        assert!(matches!(result, Err(BookingError::MalformedRecord(_))));
    }
}
