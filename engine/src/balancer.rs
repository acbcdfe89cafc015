//! Load balancer: prefer the matched tutor with the fewest sessions that week.

use crate::adapter::AvailabilityStore;
use chrono::NaiveDate;
use futures::future::try_join_all;
use std::collections::BTreeSet;
use tutor_booking_core::{MonthKey, Result, TutorId, week_index};

/// The tutor with the lowest load; ties go to the smallest id.
///
/// `None` only for an empty input.
#[must_use]
pub fn least_loaded<I>(loads: I) -> Option<TutorId>
where
    I: IntoIterator<Item = (TutorId, u32)>,
{
    loads
        .into_iter()
        .min_by(|(a_id, a_load), (b_id, b_load)| a_load.cmp(b_load).then_with(|| a_id.cmp(b_id)))
        .map(|(tutor_id, _)| tutor_id)
}

/// Among `matched`, the tutor with the fewest booked sessions in the week of `day`.
///
/// Missing counters count as zero.
///
/// # Errors
///
/// Propagates store failures.
#[tracing::instrument(
    skip(adapter, matched),
    fields(matched = matched.len(), week = week_index(day))
)]
pub async fn pick_least_loaded(
    adapter: &AvailabilityStore,
    matched: &BTreeSet<TutorId>,
    day: NaiveDate,
) -> Result<Option<TutorId>> {
    let month = MonthKey::of(day);
    let loads = try_join_all(matched.iter().map(|tutor_id| async move {
        let counter = adapter.load_counter(tutor_id, month).await?;
        let load = counter.value.sessions_on_week_of(day);
        Ok::<_, tutor_booking_core::BookingError>((tutor_id.clone(), load))
    }))
    .await?;

    for (tutor_id, load) in &loads {
        tracing::trace!(tutor_id = %tutor_id, load, "weekly load");
    }
    Ok(least_loaded(loads))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tutor_booking_testing::{InMemoryDocumentStore, date, seed_load};

    #[tokio::test]
    async fn test_picks_lower_weekly_load() {
        let store = InMemoryDocumentStore::new();
        let day = date(2024, 5, 8);
        seed_load(&store, &TutorId::from("A"), day, 3).await.unwrap();
        seed_load(&store, &TutorId::from("B"), day, 1).await.unwrap();
        // Sessions in another week of the month do not count
        seed_load(&store, &TutorId::from("B"), date(2024, 5, 20), 9).await.unwrap();

        let adapter = AvailabilityStore::new(Arc::new(store));
        let matched: BTreeSet<TutorId> = ["A", "B"].into_iter().map(TutorId::from).collect();
        let picked = pick_least_loaded(&adapter, &matched, day).await.unwrap();
        assert_eq!(picked, Some(TutorId::from("B")));
    }

    #[tokio::test]
    async fn test_missing_counter_is_zero() {
        let store = InMemoryDocumentStore::new();
        let day = date(2024, 5, 8);
        seed_load(&store, &TutorId::from("A"), day, 1).await.unwrap();

        let adapter = AvailabilityStore::new(Arc::new(store));
        let matched: BTreeSet<TutorId> = ["A", "Z"].into_iter().map(TutorId::from).collect();
        let picked = pick_least_loaded(&adapter, &matched, day).await.unwrap();
        assert_eq!(picked, Some(TutorId::from("Z")));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(least_loaded(Vec::new()), None);
    }

    proptest! {
        #[test]
        fn prop_result_is_minimal_and_order_independent(
            loads in proptest::collection::btree_map("[a-e]{1,3}", 0u32..5, 1..8)
        ) {
            let forward: Vec<(TutorId, u32)> =
                loads.iter().map(|(id, load)| (TutorId::new(id.clone()), *load)).collect();
            let mut reversed = forward.clone();
            reversed.reverse();

            let picked = least_loaded(forward.clone()).unwrap();
            prop_assert_eq!(Some(picked.clone()), least_loaded(reversed));

            let min = loads.values().min().copied().unwrap();
            let expected = loads
                .iter()
                .find(|(_, load)| **load == min)
                .map(|(id, _)| TutorId::new(id.clone()));
            prop_assert_eq!(Some(picked), expected);
        }
    }
}
