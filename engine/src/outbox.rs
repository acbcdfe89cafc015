//! Outbox dispatcher.
//!
//! Confirmation emails are written to the `outbox` collection in the same
//! transaction as their appointment and delivered afterwards by
//! [`OutboxDispatcher::drain`]. Delivery is at-least-once: an entry that
//! failed for one recipient is re-sent to all of them on the next drain.
//! Dispatch failures never touch the appointment.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tutor_booking_core::{
    Collection, DispatchError, DocId, DocumentStore, EmailDispatcher, FieldDelta, OutboxEntry,
    OutboxStatus, Result, UserId, Version,
};

/// Outcome of one drain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries delivered to every recipient
    pub sent: usize,
    /// Entries that failed and stay pending
    pub retrying: usize,
    /// Entries that hit the attempt limit
    pub failed: usize,
}

/// Delivers pending outbox entries.
#[derive(Clone)]
pub struct OutboxDispatcher {
    store: Arc<dyn DocumentStore>,
    mailer: Arc<dyn EmailDispatcher>,
    batch_size: usize,
    max_attempts: u32,
}

impl OutboxDispatcher {
    /// Create a dispatcher handling up to `batch_size` entries per drain and
    /// giving up on an entry after `max_attempts` failed deliveries.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        mailer: Arc<dyn EmailDispatcher>,
        batch_size: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            mailer,
            batch_size,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Deliver the oldest pending entries.
    ///
    /// An entry whose status update loses a version check was handled by a
    /// concurrent drain and is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error only if the outbox cannot be listed; per-entry
    /// failures are recorded on the entry.
    #[tracing::instrument(skip(self))]
    pub async fn drain(&self) -> Result<DrainReport> {
        let mut pending: Vec<(DocId, Version, OutboxEntry)> = self
            .store
            .list(Collection::Outbox)
            .await?
            .into_iter()
            .filter_map(|(id, doc)| match doc.decode::<OutboxEntry>() {
                Ok(entry) => Some((id, doc.version, entry)),
                Err(err) => {
                    tracing::warn!(id = %id, error = %err, "skipping malformed outbox entry");
                    None
                }
            })
            .filter(|(_, _, entry)| entry.status == OutboxStatus::Pending)
            .collect();
        pending.sort_by(|(_, _, a), (_, _, b)| {
            a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
        });
        pending.truncate(self.batch_size);

        let mut report = DrainReport::default();
        for (id, version, entry) in pending {
            let outcome = self.deliver(&entry).await;
            let attempts = entry.attempts.saturating_add(1);
            let deltas = match &outcome {
                Ok(()) => vec![
                    FieldDelta::set("status", "sent"),
                    FieldDelta::set("attempts", attempts),
                    FieldDelta::remove("last_error"),
                ],
                Err(err) if attempts >= self.max_attempts => vec![
                    FieldDelta::set("status", "failed"),
                    FieldDelta::set("attempts", attempts),
                    FieldDelta::set("last_error", err.to_string()),
                ],
                Err(err) => vec![
                    FieldDelta::set("attempts", attempts),
                    FieldDelta::set("last_error", err.to_string()),
                ],
            };

            let updated = self
                .store
                .update(Collection::Outbox, &id, deltas, Some(version))
                .await;
            if let Err(err) = updated {
                tracing::warn!(id = %id, error = %err, "outbox entry changed during drain");
                continue;
            }

            match outcome {
                Ok(()) => {
                    metrics::counter!("outbox.sent").increment(1);
                    report.sent += 1;
                }
                Err(err) if attempts >= self.max_attempts => {
                    metrics::counter!("outbox.failed").increment(1);
                    tracing::error!(id = %id, attempts, error = %err, "giving up on email");
                    report.failed += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        id = %id,
                        attempts,
                        error = %err,
                        "email delivery failed, will retry"
                    );
                    report.retrying += 1;
                }
            }
        }
        Ok(report)
    }

    async fn deliver(&self, entry: &OutboxEntry) -> std::result::Result<(), DispatchError> {
        for recipient in &entry.recipients {
            self.mailer
                .send(recipient, &entry.subject_line, &entry.html_body)
                .await?;
            tracing::debug!(to = %recipient, appointment_id = %entry.appointment_id, "email sent");
        }
        Ok(())
    }
}

/// Email dispatcher that writes each message to the log instead of sending it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMailer;

impl EmailDispatcher for LogMailer {
    fn send(
        &self,
        to: &UserId,
        subject_line: &str,
        html_body: &str,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), DispatchError>> + Send + '_>> {
        tracing::info!(to = %to, subject = subject_line, bytes = html_body.len(), "email");
        Box::pin(async { Ok(()) })
    }
}
