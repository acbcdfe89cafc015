//! Availability matcher.
//!
//! A candidate matches a request only when every grid point of the requested
//! range is published for the day, unbooked, and accepts the requested mode.
//! Partial coverage never matches; the engine does not propose truncated
//! sessions.

use crate::adapter::AvailabilityStore;
use chrono::NaiveDate;
use futures::future::join_all;
use std::collections::BTreeSet;
use tutor_booking_core::{DayAvailability, DeliveryMode, Result, TimeRange, TutorId};

/// Whether `day` offers an unbroken, unbooked run covering `range` in `mode`.
#[must_use]
pub fn covers(day: Option<&DayAvailability>, range: &TimeRange, mode: DeliveryMode) -> bool {
    day.is_some_and(|day| day.covers(range, mode))
}

/// Candidates whose availability on `day` fully covers `range` in `mode`.
///
/// Records are fetched concurrently, one read per candidate. An empty result
/// means no tutor is available; it is not an error.
///
/// # Errors
///
/// Any store failure aborts the match rather than silently dropping the
/// affected candidate.
#[tracing::instrument(skip(adapter, candidates), fields(candidates = candidates.len()))]
pub async fn match_contiguous(
    adapter: &AvailabilityStore,
    day: NaiveDate,
    range: &TimeRange,
    mode: DeliveryMode,
    candidates: &BTreeSet<TutorId>,
) -> Result<BTreeSet<TutorId>> {
    let lookups = candidates.iter().map(|tutor_id| async move {
        let available = adapter.load_day(tutor_id, day).await?;
        Ok::<_, tutor_booking_core::BookingError>((tutor_id, available))
    });

    let mut matched = BTreeSet::new();
    for lookup in join_all(lookups).await {
        let (tutor_id, available) = lookup?;
        if covers(available.as_ref(), range, mode) {
            matched.insert(tutor_id.clone());
        } else {
            tracing::trace!(tutor_id = %tutor_id, "range not covered");
        }
    }
    tracing::debug!(matched = matched.len(), "contiguous match complete");
    Ok(matched)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tutor_booking_core::{BookingError, DeliveryModes, TimeSlot};
    use tutor_booking_testing::{
        InMemoryDocumentStore, date, open_slots, range, seed_availability, time,
    };

    async fn seeded(tutors: &[(&str, &[&str])]) -> (InMemoryDocumentStore, AvailabilityStore) {
        let store = InMemoryDocumentStore::new();
        for (tutor, times) in tutors {
            let slots = times
                .iter()
                .flat_map(|t| open_slots(t, &next(t), DeliveryModes::online_only()))
                .collect();
            seed_availability(&store, &TutorId::from(*tutor), date(2024, 5, 6), slots)
                .await
                .unwrap();
        }
        let adapter = AvailabilityStore::new(Arc::new(store.clone()));
        (store, adapter)
    }

    fn next(t: &str) -> String {
        time(t).next().unwrap().to_string()
    }

    fn ids(names: &[&str]) -> BTreeSet<TutorId> {
        names.iter().map(|n| TutorId::from(*n)).collect()
    }

    #[tokio::test]
    async fn test_requires_every_point_in_range() {
        let (_, adapter) = seeded(&[
            ("full", &["10:00", "10:30"][..]),
            ("gap", &["10:00"][..]),
            ("late", &["10:30", "11:00"][..]),
        ])
        .await;

        let matched = match_contiguous(
            &adapter,
            date(2024, 5, 6),
            &range("10:00", "11:00"),
            DeliveryMode::Online,
            &ids(&["full", "gap", "late", "unpublished"]),
        )
        .await
        .unwrap();
        assert_eq!(matched, ids(&["full"]));
    }

    #[tokio::test]
    async fn test_mode_must_be_supported() {
        let (_, adapter) = seeded(&[("online", &["09:00"][..])]).await;
        let matched = match_contiguous(
            &adapter,
            date(2024, 5, 6),
            &range("09:00", "09:30"),
            DeliveryMode::InPerson,
            &ids(&["online"]),
        )
        .await
        .unwrap();
        assert!(matched.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let (store, adapter) = seeded(&[("a", &["09:00"][..])]).await;
        store.fail_next(1);
        let result = match_contiguous(
            &adapter,
            date(2024, 5, 6),
            &range("09:00", "09:30"),
            DeliveryMode::Online,
            &ids(&["a"]),
        )
        .await;
        assert!(matches!(result, Err(BookingError::StoreUnavailable(_))));
    }

    #[test]
    fn test_covers_missing_day() {
        assert!(!covers(None, &range("09:00", "09:30"), DeliveryMode::Online));
    }

    fn morning_with_booked(index: usize) -> Vec<TimeSlot> {
        let mut slots = open_slots("09:00", "11:00", DeliveryModes::both());
        slots[index].booked = true;
        slots
    }

    #[tokio::test]
    async fn test_booked_slot_is_never_matched_in_any_mode() {
        let store = InMemoryDocumentStore::new();
        let tutor = TutorId::from("t1");
        seed_availability(&store, &tutor, date(2024, 5, 6), morning_with_booked(2))
            .await
            .unwrap();
        let adapter = AvailabilityStore::new(Arc::new(store));

        for mode in [DeliveryMode::Online, DeliveryMode::InPerson] {
            let across = match_contiguous(
                &adapter,
                date(2024, 5, 6),
                &range("09:00", "11:00"),
                mode,
                &ids(&["t1"]),
            )
            .await
            .unwrap();
            assert!(across.is_empty(), "{mode} matched over a booked slot");

            let before = match_contiguous(
                &adapter,
                date(2024, 5, 6),
                &range("09:00", "10:00"),
                mode,
                &ids(&["t1"]),
            )
            .await
            .unwrap();
            assert_eq!(before, ids(&["t1"]));
        }
    }

    proptest! {
        #[test]
        fn prop_any_booked_point_blocks_the_range(index in 0usize..4, online in any::<bool>()) {
            let mode = if online { DeliveryMode::Online } else { DeliveryMode::InPerson };
            let day = DayAvailability::new(date(2024, 5, 6), morning_with_booked(index));
            prop_assert!(!covers(Some(&day), &range("09:00", "11:00"), mode));

            let booked_at = time("09:00").minutes() + 30 * u16::try_from(index).unwrap();
            let run = range("09:00", "11:00")
                .points()
                .take_while(|point| point.minutes() < booked_at)
                .last();
            if let Some(last) = run {
                let free = TimeRange::new(time("09:00"), last.next().unwrap()).unwrap();
                prop_assert!(covers(Some(&day), &free, mode));
            }
        }
    }
}
