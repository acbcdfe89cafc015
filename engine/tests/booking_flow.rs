//! End-to-end booking flows over the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::NaiveTime;
use proptest::prelude::*;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tutor_booking_core::{
    BookingError, Collection, DeliveryMode, DeliveryModes, DispatchError, DocumentStore,
    EmailDispatcher, GridTime, MonthKey, OutboxEntry, Price, PriceRange, StudentId, SubjectKey,
    TutorId, UserId,
};
use tutor_booking_engine::{AvailabilityStore, BookingEngine, BookingOutcome, BookingRequest};
use tutor_booking_testing::{
    InMemoryDocumentStore, RecordingMailer, SequentialIds, StudentFixture, TutorFixture, date,
    open_slots, range, seed_availability, seed_load, test_clock, time,
};

struct Harness {
    store: InMemoryDocumentStore,
    mailer: RecordingMailer,
    engine: BookingEngine,
}

fn harness() -> Harness {
    let store = InMemoryDocumentStore::new();
    let mailer = RecordingMailer::new();
    let engine = BookingEngine::builder(Arc::new(store.clone()), Arc::new(mailer.clone()))
        .clock(Arc::new(test_clock()))
        .ids(Arc::new(SequentialIds::new()))
        .build();
    Harness {
        store,
        mailer,
        engine,
    }
}

fn algebra() -> SubjectKey {
    SubjectKey::new("Math", "10", "Algebra")
}

fn request(start: &str, end: &str, mode: DeliveryMode) -> BookingRequest {
    BookingRequest {
        subject: algebra(),
        price_range: PriceRange::new(Price::new(2000), Price::new(5000)),
        mode,
        day: date(2024, 5, 6),
        range: range(start, end),
        comments: String::new(),
    }
}

async fn seed_tutor(store: &InMemoryDocumentStore, id: &str, start: &str, end: &str) -> TutorId {
    let tutor = TutorFixture::new(id)
        .offering(&algebra(), 4000)
        .seed(store)
        .await
        .unwrap();
    seed_availability(
        store,
        &tutor,
        date(2024, 5, 6),
        open_slots(start, end, DeliveryModes::both()),
    )
    .await
    .unwrap();
    tutor
}

/// A mailer whose sends never complete.
struct HangingMailer;

impl EmailDispatcher for HangingMailer {
    fn send(
        &self,
        _to: &UserId,
        _subject_line: &str,
        _html_body: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
        Box::pin(std::future::pending())
    }
}

/// Poll `done` until it holds, giving background tasks a chance to run.
async fn wait_for(done: impl Fn() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(done(), "condition not reached in time");
}

async fn outbox_attempts(store: &InMemoryDocumentStore) -> u32 {
    let entries = store.list(Collection::Outbox).await.unwrap();
    let entry: OutboxEntry = entries[0].1.decode().unwrap();
    entry.attempts
}

fn booked_tutor(outcome: &BookingOutcome) -> TutorId {
    match outcome {
        BookingOutcome::Booked(appointment) => appointment.tutor_id.clone(),
        BookingOutcome::NoTutorAvailable => TutorId::from("<none>"),
    }
}

#[tokio::test]
async fn test_booking_flips_exactly_the_requested_slots() {
    let h = harness();
    let student = StudentFixture::new("s1").seed(&h.store).await.unwrap();
    let tutor = seed_tutor(&h.store, "t1", "09:00", "10:30").await;

    let outcome = h
        .engine
        .book(&student, &request("09:00", "10:00", DeliveryMode::Online))
        .await
        .unwrap();
    assert_eq!(booked_tutor(&outcome), tutor);

    let adapter = AvailabilityStore::new(Arc::new(h.store.clone()));
    let day = adapter
        .load_day(&tutor, date(2024, 5, 6))
        .await
        .unwrap()
        .unwrap();
    let booked: Vec<GridTime> = day.booked_times().collect();
    assert_eq!(booked, vec![time("09:00"), time("09:30")]);
    assert!(!day.slot(time("10:00")).unwrap().booked);

    let counter = adapter
        .load_counter(&tutor, MonthKey::of(date(2024, 5, 6)))
        .await
        .unwrap();
    assert_eq!(counter.value.sessions_on_week_of(date(2024, 5, 6)), 1);

    assert_eq!(h.store.count(Collection::Appointments), 1);
    assert_eq!(h.store.count(Collection::Notifications), 2);
}

#[tokio::test]
async fn test_least_loaded_tutor_wins() {
    let h = harness();
    let student = StudentFixture::new("s1").seed(&h.store).await.unwrap();
    let busy = seed_tutor(&h.store, "tutor-a", "09:00", "12:00").await;
    let quiet = seed_tutor(&h.store, "tutor-b", "09:00", "12:00").await;
    seed_load(&h.store, &busy, date(2024, 5, 7), 3).await.unwrap();
    seed_load(&h.store, &quiet, date(2024, 5, 8), 1).await.unwrap();

    let outcome = h
        .engine
        .book(&student, &request("10:00", "11:00", DeliveryMode::InPerson))
        .await
        .unwrap();
    assert_eq!(booked_tutor(&outcome), quiet);
}

#[tokio::test]
async fn test_gap_in_range_excludes_tutor() {
    let h = harness();
    let student = StudentFixture::new("s1").seed(&h.store).await.unwrap();
    let tutor = TutorFixture::new("t1")
        .offering(&algebra(), 4000)
        .seed(&h.store)
        .await
        .unwrap();
    let mut slots = open_slots("09:00", "10:00", DeliveryModes::both());
    slots.extend(open_slots("10:30", "11:00", DeliveryModes::both()));
    seed_availability(&h.store, &tutor, date(2024, 5, 6), slots)
        .await
        .unwrap();

    let req = request("09:00", "11:00", DeliveryMode::Online);
    assert!(h.engine.search(&req).await.unwrap().is_empty());
    assert_eq!(
        h.engine.book(&student, &req).await.unwrap(),
        BookingOutcome::NoTutorAvailable
    );
    assert_eq!(h.store.count(Collection::Appointments), 0);
}

#[tokio::test]
async fn test_editor_round_trip() {
    let h = harness();
    let tutor = TutorFixture::new("t1").seed(&h.store).await.unwrap();

    let mut editor = h.engine.editor(tutor.clone());
    assert!(editor.select_day(date(2024, 5, 6)).await.unwrap().is_empty());
    editor.begin_edit().unwrap();
    for t in ["09:00", "09:30", "14:00"] {
        let clock = NaiveTime::parse_from_str(t, "%H:%M").unwrap();
        assert!(editor.toggle_slot(clock).unwrap());
    }
    editor.save().await.unwrap();

    let mut fresh = h.engine.editor(tutor);
    let selection: Vec<GridTime> = fresh
        .select_day(date(2024, 5, 6))
        .await
        .unwrap()
        .iter()
        .copied()
        .collect();
    assert_eq!(selection, vec![time("09:00"), time("09:30"), time("14:00")]);
}

#[tokio::test]
async fn test_editor_refuses_to_overwrite_a_new_booking() {
    let h = harness();
    let student = StudentFixture::new("s1").seed(&h.store).await.unwrap();
    let tutor = seed_tutor(&h.store, "t1", "09:00", "11:00").await;

    let mut editor = h.engine.editor(tutor);
    editor.select_day(date(2024, 5, 6)).await.unwrap();
    editor
        .toggle_slot(NaiveTime::from_hms_opt(9, 0, 0).unwrap())
        .unwrap();

    h.engine
        .book(&student, &request("09:00", "10:00", DeliveryMode::Online))
        .await
        .unwrap();

    let err = editor.save().await.unwrap_err();
    assert!(matches!(err, BookingError::StaleAvailabilityWrite { .. }));
}

#[tokio::test]
async fn test_two_students_racing_for_one_slot() {
    let h = harness();
    let first = StudentFixture::new("s1").seed(&h.store).await.unwrap();
    let second = StudentFixture::new("s2").seed(&h.store).await.unwrap();
    seed_tutor(&h.store, "t1", "09:00", "10:00").await;

    let spawn = |student: StudentId| {
        let engine = h.engine.clone();
        tokio::spawn(async move {
            engine
                .book(&student, &request("09:00", "10:00", DeliveryMode::Online))
                .await
        })
    };
    let (a, b) = tokio::join!(spawn(first), spawn(second));
    let outcomes = [a.unwrap().unwrap(), b.unwrap().unwrap()];

    let booked = outcomes
        .iter()
        .filter(|o| matches!(o, BookingOutcome::Booked(_)))
        .count();
    assert_eq!(booked, 1);
    assert!(outcomes.contains(&BookingOutcome::NoTutorAvailable));
    assert_eq!(h.store.count(Collection::Appointments), 1);
}

#[tokio::test]
async fn test_confirmation_mail_reaches_both_participants() {
    let h = harness();
    let student = StudentFixture::new("s1")
        .named("Sam", "Lee")
        .seed(&h.store)
        .await
        .unwrap();
    seed_tutor(&h.store, "t1", "09:00", "10:00").await;

    h.engine
        .book(&student, &request("09:00", "10:00", DeliveryMode::Online))
        .await
        .unwrap();

    wait_for(|| h.mailer.sent().len() == 2).await;
    let sent = h.mailer.sent();
    let recipients: Vec<&str> = sent.iter().map(|mail| mail.to.as_str()).collect();
    assert_eq!(recipients, vec!["s1", "t1"]);
    assert!(sent.iter().all(|mail| mail.subject_line.contains("Math")));

    let notifications = h.engine.notifications(&student).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].counterparty_name, "Tutor t1");
}

#[tokio::test]
async fn test_failed_mail_does_not_undo_booking() {
    let h = harness();
    let student = StudentFixture::new("s1").seed(&h.store).await.unwrap();
    seed_tutor(&h.store, "t1", "09:00", "10:00").await;
    h.mailer.set_failing(true);

    let outcome = h
        .engine
        .book(&student, &request("09:00", "10:00", DeliveryMode::Online))
        .await
        .unwrap();
    assert!(matches!(outcome, BookingOutcome::Booked(_)));

    for _ in 0..400 {
        if outbox_attempts(&h.store).await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(outbox_attempts(&h.store).await, 1);
    assert!(h.mailer.sent().is_empty());

    h.mailer.set_failing(false);
    let report = h.engine.drain_outbox().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(h.mailer.sent().len(), 2);
}

#[tokio::test]
async fn test_hung_mailer_does_not_delay_booking() {
    let store = InMemoryDocumentStore::new();
    let engine = BookingEngine::builder(Arc::new(store.clone()), Arc::new(HangingMailer))
        .clock(Arc::new(test_clock()))
        .ids(Arc::new(SequentialIds::new()))
        .build();
    let student = StudentFixture::new("s1").seed(&store).await.unwrap();
    seed_tutor(&store, "t1", "09:00", "10:00").await;

    let outcome = tokio::time::timeout(
        Duration::from_secs(2),
        engine.book(&student, &request("09:00", "10:00", DeliveryMode::Online)),
    )
    .await
    .expect("booking must not wait on email delivery")
    .unwrap();

    assert!(matches!(outcome, BookingOutcome::Booked(_)));
    assert_eq!(store.count(Collection::Appointments), 1);
}

#[tokio::test]
async fn test_range_outside_window_is_rejected() {
    let h = harness();
    let err = h
        .engine
        .search(&request("21:00", "22:30", DeliveryMode::Online))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidGridAlignment { .. }));
}

proptest! {
    #[test]
    fn prop_editor_accepts_only_grid_points(hour in 0u32..24, minute in 0u32..60) {
        let engine = BookingEngine::builder(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(RecordingMailer::new()),
        )
        .build();
        let mut editor = engine.editor(TutorId::from("t1"));
        tokio_test::block_on(editor.select_day(date(2024, 5, 6))).unwrap();

        let clock = NaiveTime::from_hms_opt(hour, minute, 0).unwrap();
        let on_grid = engine
            .grid()
            .points()
            .iter()
            .any(|p| u32::from(p.hour()) == hour && u32::from(p.minute()) == minute);
        let result = editor.toggle_slot(clock);
        prop_assert_eq!(result.is_ok(), on_grid);
        if !on_grid {
            let is_alignment_error =
                matches!(result, Err(BookingError::InvalidGridAlignment { .. }));
            prop_assert!(is_alignment_error);
        }
    }
}

#[test]
fn test_store_is_shared_by_engine_clones() {
    let h = harness();
    let clone = h.engine.clone();
    tokio_test::block_on(async {
        let student = StudentFixture::new("s1").seed(&h.store).await.unwrap();
        seed_tutor(&h.store, "t1", "09:00", "10:00").await;
        clone
            .book(&student, &request("09:00", "10:00", DeliveryMode::Online))
            .await
            .unwrap();
        let appointments = h.store.list(Collection::Appointments).await.unwrap();
        assert_eq!(appointments.len(), 1);
    });
}
