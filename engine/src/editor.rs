//! Tutor-facing availability editor.
//!
//! The editor holds one day's selection in memory while the tutor toggles
//! grid points, then persists the day as a whole.
//!
//! ```text
//! Viewing ──toggle_slot / begin_edit──▶ Editing
//!    ▲                                     │
//!    └────────────── save / cancel ────────┘
//! ```
//!
//! Saving re-reads the stored day first. If a booking consumed any slot after
//! the day was loaded, the save is refused with `StaleAvailabilityWrite` and
//! nothing is written; the tutor must reload. Booked slots always survive a
//! save, and unchanged selected slots keep their stored delivery modes.

use crate::adapter::AvailabilityStore;
use chrono::{NaiveDate, NaiveTime};
use std::collections::{BTreeMap, BTreeSet};
use tutor_booking_core::{
    BookingError, DayAvailability, DeliveryModes, GridTime, MonthKey, Result, SlotGrid, TimeSlot,
    TutorId,
};

/// Editor state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditorState {
    /// Showing the saved selection
    Viewing,
    /// Selection has been changed or edit mode was entered
    Editing,
}

/// Edits one tutor's availability, one day at a time.
pub struct AvailabilityEditor {
    tutor_id: TutorId,
    adapter: AvailabilityStore,
    grid: SlotGrid,
    modes: DeliveryModes,
    state: EditorState,
    day: Option<NaiveDate>,
    loaded: BTreeMap<GridTime, TimeSlot>,
    selection: BTreeSet<GridTime>,
}

impl AvailabilityEditor {
    /// An editor for `tutor_id`. New slots accept both delivery modes until
    /// [`AvailabilityEditor::set_delivery_modes`] says otherwise.
    #[must_use]
    pub fn new(tutor_id: TutorId, adapter: AvailabilityStore, grid: SlotGrid) -> Self {
        Self {
            tutor_id,
            adapter,
            grid,
            modes: DeliveryModes::both(),
            state: EditorState::Viewing,
            day: None,
            loaded: BTreeMap::new(),
            selection: BTreeSet::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> EditorState {
        self.state
    }

    /// The day being edited.
    #[must_use]
    pub const fn selected_day(&self) -> Option<NaiveDate> {
        self.day
    }

    /// The editable selection.
    #[must_use]
    pub const fn selection(&self) -> &BTreeSet<GridTime> {
        &self.selection
    }

    /// Modes applied to slots published from now on.
    pub fn set_delivery_modes(&mut self, modes: DeliveryModes) {
        self.modes = modes;
    }

    /// Load the saved selection of `day`; an unpublished day yields an empty set.
    ///
    /// Discards any unsaved edits.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    #[tracing::instrument(skip(self), fields(tutor_id = %self.tutor_id))]
    pub async fn select_day(&mut self, day: NaiveDate) -> Result<&BTreeSet<GridTime>> {
        let stored = self.adapter.load_day(&self.tutor_id, day).await?;
        self.loaded = stored
            .map(|d| d.slots.into_iter().map(|slot| (slot.time, slot)).collect())
            .unwrap_or_default();
        self.selection = self.loaded.keys().copied().collect();
        self.day = Some(day);
        self.state = EditorState::Viewing;
        Ok(&self.selection)
    }

    /// Enter edit mode without changing the selection.
    ///
    /// # Errors
    ///
    /// `NoDaySelected` before [`AvailabilityEditor::select_day`].
    pub fn begin_edit(&mut self) -> Result<()> {
        if self.day.is_none() {
            return Err(BookingError::NoDaySelected);
        }
        self.state = EditorState::Editing;
        Ok(())
    }

    /// Flip membership of `time` in the selection. Returns whether it is now selected.
    ///
    /// # Errors
    ///
    /// - `NoDaySelected` before [`AvailabilityEditor::select_day`]
    /// - `InvalidGridAlignment` if `time` is not a point of the grid
    /// - `SlotAlreadyBooked` if the slot at `time` holds a booking
    pub fn toggle_slot(&mut self, time: NaiveTime) -> Result<bool> {
        let day = self.day.ok_or(BookingError::NoDaySelected)?;
        let time = self.grid.align(time)?;
        if self.loaded.get(&time).is_some_and(|slot| slot.booked) {
            return Err(BookingError::SlotAlreadyBooked { day, time });
        }

        let selected = if self.selection.remove(&time) {
            false
        } else {
            self.selection.insert(time);
            true
        };
        self.state = EditorState::Editing;
        Ok(selected)
    }

    /// Persist the selection for the selected day.
    ///
    /// An empty result removes the day from the month record.
    ///
    /// # Errors
    ///
    /// - `NoDaySelected` before [`AvailabilityEditor::select_day`]
    /// - `StaleAvailabilityWrite` if a slot was booked since the day was loaded,
    ///   or the record changed between the re-read and the write
    /// - store failures
    #[tracing::instrument(skip(self), fields(tutor_id = %self.tutor_id, day = ?self.day))]
    pub async fn save(&mut self) -> Result<()> {
        let day = self.day.ok_or(BookingError::NoDaySelected)?;
        let mut record = self.adapter.load_record(&self.tutor_id, MonthKey::of(day)).await?;
        let stored: BTreeMap<GridTime, TimeSlot> = record
            .value
            .day(day)
            .map(|d| d.slots.into_iter().map(|slot| (slot.time, slot)).collect())
            .unwrap_or_default();

        let newly_booked = stored
            .values()
            .filter(|slot| slot.booked)
            .any(|slot| !self.loaded.get(&slot.time).is_some_and(|seen| seen.booked));
        if newly_booked {
            tracing::warn!("slots were booked while editing, refusing to overwrite");
            metrics::counter!("booking.stale").increment(1);
            return Err(self.stale(day));
        }

        let slots: Vec<TimeSlot> = stored
            .values()
            .filter(|slot| slot.booked)
            .copied()
            .chain(
                self.selection
                    .iter()
                    .filter(|time| self.grid.contains(**time))
                    .filter(|time| !stored.get(time).is_some_and(|slot| slot.booked))
                    .map(|time| {
                        stored
                            .get(time)
                            .copied()
                            .unwrap_or_else(|| TimeSlot::open(*time, self.modes))
                    }),
            )
            .collect();

        record.value.put_day(DayAvailability::new(day, slots))?;
        match self.adapter.save_record(&record.value, record.version).await {
            Ok(_) => {}
            Err(BookingError::ConcurrentModification(_)) => return Err(self.stale(day)),
            Err(err) => return Err(err),
        }

        tracing::info!(slots = self.selection.len(), "availability saved");
        self.loaded = record
            .value
            .day(day)
            .map(|d| d.slots.into_iter().map(|slot| (slot.time, slot)).collect())
            .unwrap_or_default();
        self.selection = self.loaded.keys().copied().collect();
        self.state = EditorState::Viewing;
        Ok(())
    }

    /// Discard edits and reload the saved selection.
    ///
    /// # Errors
    ///
    /// `NoDaySelected` before [`AvailabilityEditor::select_day`], or store failures.
    pub async fn cancel(&mut self) -> Result<()> {
        let day = self.day.ok_or(BookingError::NoDaySelected)?;
        self.select_day(day).await?;
        Ok(())
    }

    fn stale(&self, day: NaiveDate) -> BookingError {
        BookingError::StaleAvailabilityWrite {
            tutor_id: self.tutor_id.clone(),
            day,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;
    use tutor_booking_core::{DeliveryMode, TimeRange};
    use tutor_booking_testing::{InMemoryDocumentStore, date, open_slots, seed_availability, time};

    fn clock(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn editor(store: &InMemoryDocumentStore) -> AvailabilityEditor {
        AvailabilityEditor::new(
            TutorId::from("t1"),
            AvailabilityStore::new(Arc::new(store.clone())),
            SlotGrid::standard(),
        )
    }

    #[tokio::test]
    async fn test_toggle_requires_selected_day() {
        let store = InMemoryDocumentStore::new();
        let mut editor = editor(&store);
        assert!(matches!(editor.toggle_slot(clock("09:00")), Err(BookingError::NoDaySelected)));
        assert!(matches!(editor.begin_edit(), Err(BookingError::NoDaySelected)));
    }

    #[tokio::test]
    async fn test_toggle_rejects_off_grid_times() {
        let store = InMemoryDocumentStore::new();
        let mut editor = editor(&store);
        editor.select_day(date(2024, 5, 6)).await.unwrap();

        for t in ["09:15", "08:30", "22:00"] {
            let result = editor.toggle_slot(clock(t));
            assert!(matches!(result, Err(BookingError::InvalidGridAlignment { .. })), "{t}");
        }
        assert_eq!(editor.state(), EditorState::Viewing);
    }

    #[tokio::test]
    async fn test_state_machine() {
        let store = InMemoryDocumentStore::new();
        let mut editor = editor(&store);
        editor.select_day(date(2024, 5, 6)).await.unwrap();
        assert_eq!(editor.state(), EditorState::Viewing);

        assert!(editor.toggle_slot(clock("09:00")).unwrap());
        assert_eq!(editor.state(), EditorState::Editing);
        editor.cancel().await.unwrap();
        assert_eq!(editor.state(), EditorState::Viewing);
        assert!(editor.selection().is_empty());

        editor.begin_edit().unwrap();
        assert_eq!(editor.state(), EditorState::Editing);
        editor.save().await.unwrap();
        assert_eq!(editor.state(), EditorState::Viewing);
    }

    #[tokio::test]
    async fn test_save_then_reload_round_trips() {
        let store = InMemoryDocumentStore::new();
        let day = date(2024, 5, 6);
        let mut editor = editor(&store);
        editor.set_delivery_modes(DeliveryModes::online_only());
        editor.select_day(day).await.unwrap();
        for t in ["09:00", "09:30", "14:00"] {
            editor.toggle_slot(clock(t)).unwrap();
        }
        let expected = editor.selection().clone();
        editor.save().await.unwrap();

        let mut other = self::editor(&store);
        assert_eq!(other.select_day(day).await.unwrap(), &expected);

        let adapter = AvailabilityStore::new(Arc::new(store.clone()));
        let stored = adapter.load_day(&TutorId::from("t1"), day).await.unwrap().unwrap();
        let hour = TimeRange::new(time("09:00"), time("10:00")).unwrap();
        assert!(stored.covers(&hour, DeliveryMode::Online));
        assert!(!stored.covers(&hour, DeliveryMode::InPerson));
    }

    #[tokio::test]
    async fn test_empty_selection_removes_day() {
        let store = InMemoryDocumentStore::new();
        let tutor = TutorId::from("t1");
        let day = date(2024, 5, 6);
        seed_availability(&store, &tutor, day, open_slots("09:00", "10:00", DeliveryModes::both()))
            .await
            .unwrap();

        let mut editor = editor(&store);
        editor.select_day(day).await.unwrap();
        editor.toggle_slot(clock("09:00")).unwrap();
        editor.toggle_slot(clock("09:30")).unwrap();
        editor.save().await.unwrap();

        let adapter = AvailabilityStore::new(Arc::new(store.clone()));
        let record = adapter.load_record(&tutor, MonthKey::of(day)).await.unwrap();
        assert!(record.value.day(day).is_none());
    }

    #[tokio::test]
    async fn test_booked_slot_cannot_be_toggled() {
        let store = InMemoryDocumentStore::new();
        let tutor = TutorId::from("t1");
        let day = date(2024, 5, 6);
        let mut slots = open_slots("09:00", "10:00", DeliveryModes::both());
        slots[0].booked = true;
        seed_availability(&store, &tutor, day, slots).await.unwrap();

        let mut editor = editor(&store);
        editor.select_day(day).await.unwrap();
        let result = editor.toggle_slot(clock("09:00"));
        assert!(matches!(result, Err(BookingError::SlotAlreadyBooked { .. })));
    }

    #[tokio::test]
    async fn test_booking_during_edit_is_stale() {
        let store = InMemoryDocumentStore::new();
        let tutor = TutorId::from("t1");
        let day = date(2024, 5, 6);
        seed_availability(&store, &tutor, day, open_slots("09:00", "10:00", DeliveryModes::both()))
            .await
            .unwrap();

        let mut editor = editor(&store);
        editor.select_day(day).await.unwrap();
        editor.toggle_slot(clock("11:00")).unwrap();

        let mut booked = open_slots("09:00", "10:00", DeliveryModes::both());
        booked[1].booked = true;
        seed_availability(&store, &tutor, day, booked).await.unwrap();

        let result = editor.save().await;
        assert!(matches!(result, Err(BookingError::StaleAvailabilityWrite { .. })));

        let adapter = AvailabilityStore::new(Arc::new(store.clone()));
        let stored = adapter.load_day(&tutor, day).await.unwrap().unwrap();
        assert!(stored.slot(time("11:00")).is_none());
        assert!(stored.slot(time("09:30")).unwrap().booked);
    }
}
