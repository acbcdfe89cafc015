//! User directory backed by the `users` collection.
//!
//! Offerings are validated one by one: a malformed offering is logged and
//! skipped so the rest of the profile stays usable, while a user document that
//! does not decode at all is reported as `MalformedRecord`.

use std::sync::Arc;
use tutor_booking_core::{
    BookingError, BookingFuture, Collection, DocId, DocumentStore, Result, Role, SubjectKey,
    SubjectOffering, TutorListing, User, UserDirectory, UserId, UserRecord,
};

/// [`UserDirectory`] over any [`DocumentStore`].
#[derive(Clone)]
pub struct DocumentDirectory {
    store: Arc<dyn DocumentStore>,
}

impl DocumentDirectory {
    /// Wrap a document store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn load(&self, user_id: &UserId) -> Result<UserRecord> {
        let doc = self
            .store
            .get(Collection::Users, &DocId::new(user_id.as_str()))
            .await?
            .ok_or_else(|| BookingError::NoSuchUser(user_id.clone()))?;
        doc.decode().map_err(|err| {
            tracing::warn!(user_id = %user_id, error = %err, "malformed user record");
            BookingError::MalformedRecord(format!("user {user_id}: {err}"))
        })
    }
}

/// Typed offerings of a user record, skipping malformed entries.
fn offerings(user_id: &UserId, record: &UserRecord) -> Vec<SubjectOffering> {
    record
        .offerings
        .iter()
        .filter_map(|raw| match serde_json::from_value::<SubjectOffering>(raw.clone()) {
            Ok(offering) => Some(offering),
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "skipping malformed offering");
                None
            }
        })
        .collect()
}

fn listing(user_id: &UserId, record: &UserRecord) -> TutorListing {
    TutorListing {
        tutor_id: user_id.clone(),
        delivery_modes: record.delivery_modes.unwrap_or_default(),
        offerings: offerings(user_id, record),
    }
}

impl UserDirectory for DocumentDirectory {
    fn active_tutors_by_subject(&self, key: &SubjectKey) -> BookingFuture<'_, Vec<TutorListing>> {
        let key = key.clone();
        Box::pin(async move {
            let documents = self.store.list(Collection::Users).await?;
            let mut tutors = Vec::new();
            for (id, doc) in documents {
                let user_id = UserId::new(id.as_str());
                let record: UserRecord = match doc.decode() {
                    Ok(record) => record,
                    Err(err) => {
                        tracing::warn!(
                            user_id = %user_id,
                            error = %err,
                            "skipping malformed user record"
                        );
                        continue;
                    }
                };
                if record.role != Role::Tutor || !record.active {
                    continue;
                }
                let listing = listing(&user_id, &record);
                if listing.offerings.iter().any(|offering| offering.key == key) {
                    tutors.push(listing);
                }
            }
            tracing::debug!(subject = %key, tutors = tutors.len(), "active tutors for subject");
            Ok(tutors)
        })
    }

    fn tutor_listing(&self, tutor_id: &UserId) -> BookingFuture<'_, TutorListing> {
        let tutor_id = tutor_id.clone();
        Box::pin(async move {
            let record = self.load(&tutor_id).await?;
            if record.role != Role::Tutor {
                return Err(BookingError::NoSuchUser(tutor_id));
            }
            Ok(listing(&tutor_id, &record))
        })
    }

    fn get_user(&self, user_id: &UserId) -> BookingFuture<'_, User> {
        let user_id = user_id.clone();
        Box::pin(async move {
            let record = self.load(&user_id).await?;
            Ok(User {
                id: user_id,
                first_name: record.first_name,
                last_name: record.last_name,
                email: record.email,
            })
        })
    }
}
