//! Deterministic stand-ins for the engine's ports.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::future::Future;
use std::pin::Pin;
use tutor_booking_core::{Clock, DispatchError, EmailDispatcher, IdGenerator, UserId};
use uuid::Uuid;

/// Fixed clock for deterministic tests
///
/// Always returns the same time, making tests reproducible.
///
/// # Example
///
/// ```
/// use tutor_booking_testing::FixedClock;
/// use tutor_booking_core::Clock;
/// use chrono::Utc;
///
/// let clock = FixedClock::new(Utc::now());
/// assert_eq!(clock.now(), clock.now());
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Create a default fixed clock for tests (2024-05-01 08:00:00 UTC)
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which cannot happen.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

/// Predictable ids: `00000000-0000-0000-0000-000000000001`, `...02`, and so on.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    /// Start at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> Uuid {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Uuid::from_u64_pair(0, n)
    }
}

/// An email captured by [`RecordingMailer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentEmail {
    /// Recipient
    pub to: UserId,
    /// Subject line
    pub subject_line: String,
    /// HTML body
    pub html_body: String,
}

#[derive(Debug, Default)]
struct MailerState {
    sent: Vec<SentEmail>,
    failing: bool,
}

/// Email dispatcher that records instead of sending.
///
/// Cloning shares the recorded mail, so a test can keep one handle while the
/// engine owns another.
#[derive(Clone, Debug, Default)]
pub struct RecordingMailer {
    state: Arc<Mutex<MailerState>>,
}

impl RecordingMailer {
    /// A mailer that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every send until switched back.
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.failing = failing;
        }
    }

    /// Emails accepted so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentEmail> {
        self.state
            .lock()
            .map(|state| state.sent.clone())
            .unwrap_or_default()
    }
}

impl EmailDispatcher for RecordingMailer {
    fn send(
        &self,
        to: &UserId,
        subject_line: &str,
        html_body: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
        let result = match self.state.lock() {
            Ok(mut state) if !state.failing => {
                state.sent.push(SentEmail {
                    to: to.clone(),
                    subject_line: subject_line.to_string(),
                    html_body: html_body.to_string(),
                });
                Ok(())
            }
            Ok(_) => Err(DispatchError(format!("mailbox of {to} rejected the message"))),
            Err(_) => Err(DispatchError("mailer lock poisoned".to_string())),
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn test_sequential_ids_are_distinct_and_ordered() {
        let ids = SequentialIds::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert!(a < b);
        assert_eq!(a, Uuid::from_u64_pair(0, 1));
    }

    #[tokio::test]
    async fn test_recording_mailer_failure_mode() {
        let mailer = RecordingMailer::new();
        let to = UserId::from("s1");
        mailer.send(&to, "hi", "<p>hi</p>").await.unwrap();
        mailer.set_failing(true);
        assert!(mailer.send(&to, "again", "").await.is_err());
        assert_eq!(mailer.sent().len(), 1);
    }
}
