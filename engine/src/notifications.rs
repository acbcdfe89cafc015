//! Notification queries.

use tutor_booking_core::{Collection, DocumentStore, Notification, Result, UserId};

/// Notifications addressed to `user_id`, newest first.
///
/// # Errors
///
/// `StoreUnavailable` on backend failure, `MalformedRecord` if a stored
/// notification does not decode.
pub async fn notifications_for(
    store: &dyn DocumentStore,
    user_id: &UserId,
) -> Result<Vec<Notification>> {
    let mut notifications = Vec::new();
    for (_, doc) in store.list(Collection::Notifications).await? {
        let notification: Notification = doc.decode()?;
        if &notification.recipient_user_id == user_id {
            notifications.push(notification);
        }
    }
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    Ok(notifications)
}
