//! In-memory document store for fast, deterministic tests.
//!
//! Writes go through [`Write::apply`], so preconditions and field deltas
//! behave exactly as they do against Postgres. A transaction checks every
//! precondition against a scratch copy before touching shared state.
//!
//! Two fault hooks let tests reproduce the races the engine must survive:
//!
//! - [`InMemoryDocumentStore::fail_next`]: the next `n` calls fail with
//!   [`StoreError::Unavailable`]
//! - [`InMemoryDocumentStore::interleave_before_next_transact`]: writes applied
//!   just before the next transaction, as if another client committed between
//!   the caller's read and its write

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tutor_booking_core::{
    Applied, Collection, DocId, Document, DocumentStore, StoreError, StoreFuture, Version, Write,
};

type Documents = BTreeMap<(Collection, DocId), Document>;

#[derive(Debug, Default)]
struct Inner {
    documents: Documents,
    failures_pending: usize,
    interleaved: Vec<Vec<Write>>,
    transactions: usize,
}

/// In-memory versioned document store.
///
/// Cloning shares the underlying state.
///
/// # Example
///
/// ```
/// use tutor_booking_core::{Collection, DocId, DocumentStore, Version};
/// use tutor_booking_testing::InMemoryDocumentStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryDocumentStore::new();
/// let id = DocId::new("u1");
/// let v1 = store.set(Collection::Users, &id, serde_json::json!({}), Some(Version::ABSENT)).await?;
/// assert_eq!(v1, Version::new(1));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryDocumentStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` store calls fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, n: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures_pending = n;
        }
    }

    /// Apply `writes` atomically right before the next transaction runs.
    ///
    /// Calling this several times queues one interleaving per transaction.
    pub fn interleave_before_next_transact(&self, writes: Vec<Write>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.interleaved.push(writes);
        }
    }

    /// Number of transactions that reached the store, failed ones included.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.transactions)
    }

    /// Number of documents in `collection`.
    #[must_use]
    pub fn count(&self, collection: Collection) -> usize {
        self.inner.lock().map_or(0, |inner| {
            inner
                .documents
                .keys()
                .filter(|(c, _)| *c == collection)
                .count()
        })
    }

    /// Remove every document and reset the fault hooks.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner = Inner::default();
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))?;
        if inner.failures_pending > 0 {
            inner.failures_pending -= 1;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(inner)
    }
}

/// Apply `writes` to `documents` all-or-nothing.
fn apply_all(documents: &mut Documents, writes: &[Write]) -> Result<Vec<Version>, StoreError> {
    let mut staged = documents.clone();
    let mut versions = Vec::with_capacity(writes.len());
    for write in writes {
        let key = (write.collection, write.id.clone());
        match write.apply(staged.get(&key))? {
            Applied::Put(doc) => {
                versions.push(doc.version);
                staged.insert(key, doc);
            }
            Applied::Removed => {
                versions.push(Version::ABSENT);
                staged.remove(&key);
            }
        }
    }
    *documents = staged;
    Ok(versions)
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, collection: Collection, id: &DocId) -> StoreFuture<'_, Option<Document>> {
        let result = self
            .lock()
            .map(|inner| inner.documents.get(&(collection, id.clone())).cloned());
        Box::pin(async move { result })
    }

    fn list(&self, collection: Collection) -> StoreFuture<'_, Vec<(DocId, Document)>> {
        let result = self.lock().map(|inner| {
            inner
                .documents
                .iter()
                .filter(|((c, _), _)| *c == collection)
                .map(|((_, id), doc)| (id.clone(), doc.clone()))
                .collect()
        });
        Box::pin(async move { result })
    }

    fn transact(&self, writes: Vec<Write>) -> StoreFuture<'_, Vec<Version>> {
        let result = self.lock().and_then(|mut inner| {
            inner.transactions += 1;
            if !inner.interleaved.is_empty() {
                let interloper = inner.interleaved.remove(0);
                tracing::debug!(writes = interloper.len(), "applying interleaved writes");
                apply_all(&mut inner.documents, &interloper)?;
            }
            apply_all(&mut inner.documents, &writes)
        });
        Box::pin(async move { result })
    }
}
