//! Document store abstraction with optimistic concurrency.
//!
//! The booking engine persists everything as JSON documents addressed by
//! `(collection, id)`. Every document carries a [`Version`] that increases by
//! one per write; callers may make any write conditional on the version they
//! read. [`DocumentStore::transact`] applies several conditional writes
//! atomically, which is how a booking commits its slots, load counter,
//! appointment, notifications and outbox entry together.
//!
//! # Implementations
//!
//! - `PostgresDocumentStore` (in `tutor-booking-postgres`): JSONB rows, row locks
//! - `InMemoryDocumentStore` (in `tutor-booking-testing`): fast, deterministic tests
//!
//! Both apply writes through [`Write::apply`], so precondition and field-delta
//! semantics are identical.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

// ============================================================================
// Addressing
// ============================================================================

/// Logical collections used by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    /// Monthly tutor availability, id `"{month}_{tutor}"`
    Availability,
    /// Weekly load counters, id `"{tutor}_{month}"`
    SessionLoad,
    /// Committed appointments
    Appointments,
    /// Per-participant notifications
    Notifications,
    /// Pending emails
    Outbox,
    /// User directory
    Users,
}

impl Collection {
    /// Storage name of the collection.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Availability => "availability",
            Self::SessionLoad => "session_load",
            Self::Appointments => "appointments",
            Self::Notifications => "notifications",
            Self::Outbox => "outbox",
            Self::Users => "users",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document id within a collection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocId(String);

impl DocId {
    /// Wrap a raw id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Document version. `Version::ABSENT` (0) stands for a document that does not exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    /// Version of a document that does not exist.
    pub const ABSENT: Self = Self(0);

    /// Create a version.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The version after one more write.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Documents
// ============================================================================

/// A stored JSON value with its version.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    /// Document body
    pub value: Value,
    /// Current version, never `ABSENT`
    pub version: Version,
}

impl Document {
    /// Decode the body into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// A typed value paired with the version it was read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    /// The value
    pub value: T,
    /// Version it was read at (`ABSENT` if synthesized)
    pub version: Version,
}

// ============================================================================
// Writes
// ============================================================================

/// A change to one field, addressed by a dotted path (`"status"`, `"per_week.2"`).
#[derive(Clone, Debug, PartialEq)]
pub enum FieldDelta {
    /// Replace (or create) the field
    Set {
        /// Dotted path
        path: String,
        /// New value
        value: Value,
    },
    /// Add to an integer field; a missing field counts as zero
    Increment {
        /// Dotted path
        path: String,
        /// Amount to add
        by: i64,
    },
    /// Remove the field if present
    Remove {
        /// Dotted path
        path: String,
    },
}

impl FieldDelta {
    /// Set `path` to `value`.
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Add `by` to `path`.
    pub fn increment(path: impl Into<String>, by: i64) -> Self {
        Self::Increment {
            path: path.into(),
            by,
        }
    }

    /// Remove `path`.
    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }
}

/// What a write does to its document.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteKind {
    /// Replace the whole body
    Set(Value),
    /// Apply field deltas to an existing body
    Update(Vec<FieldDelta>),
    /// Remove the document
    Delete,
}

/// One conditional write.
///
/// `expected = Some(v)` requires the stored version to be `v` (`Version::ABSENT`
/// requires the document not to exist); `None` writes unconditionally.
#[derive(Clone, Debug, PartialEq)]
pub struct Write {
    /// Target collection
    pub collection: Collection,
    /// Target document
    pub id: DocId,
    /// Required current version
    pub expected: Option<Version>,
    /// The change
    pub kind: WriteKind,
}

/// Result of applying a [`Write`] to the current state of its document.
#[derive(Clone, Debug, PartialEq)]
pub enum Applied {
    /// The document now holds this body and version
    Put(Document),
    /// The document no longer exists
    Removed,
}

impl Write {
    /// Replace a document with the serialized `value`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if `value` cannot be serialized.
    pub fn set<T: Serialize>(
        collection: Collection,
        id: DocId,
        value: &T,
        expected: Option<Version>,
    ) -> Result<Self, StoreError> {
        let value =
            serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self {
            collection,
            id,
            expected,
            kind: WriteKind::Set(value),
        })
    }

    /// Apply field deltas to an existing document.
    #[must_use]
    pub const fn update(
        collection: Collection,
        id: DocId,
        deltas: Vec<FieldDelta>,
        expected: Option<Version>,
    ) -> Self {
        Self {
            collection,
            id,
            expected,
            kind: WriteKind::Update(deltas),
        }
    }

    /// Delete a document.
    #[must_use]
    pub const fn delete(collection: Collection, id: DocId, expected: Option<Version>) -> Self {
        Self {
            collection,
            id,
            expected,
            kind: WriteKind::Delete,
        }
    }

    /// Apply this write to `current`, checking the version precondition.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConcurrencyConflict`] if the precondition fails
    /// - [`StoreError::NotFound`] if an update targets a missing document
    /// - [`StoreError::InvalidUpdate`] if a delta cannot be applied
    pub fn apply(&self, current: Option<&Document>) -> Result<Applied, StoreError> {
        let actual = current.map_or(Version::ABSENT, |doc| doc.version);
        match self.expected {
            Some(expected) if expected != actual => {
                return Err(StoreError::ConcurrencyConflict {
                    collection: self.collection,
                    id: self.id.clone(),
                    expected,
                    actual,
                });
            }
            _ => {}
        }

        match &self.kind {
            WriteKind::Set(value) => Ok(Applied::Put(Document {
                value: value.clone(),
                version: actual.next(),
            })),
            WriteKind::Update(deltas) => {
                let Some(current) = current else {
                    return Err(StoreError::NotFound {
                        collection: self.collection,
                        id: self.id.clone(),
                    });
                };
                let mut value = current.value.clone();
                apply_deltas(&mut value, deltas)?;
                Ok(Applied::Put(Document {
                    value,
                    version: actual.next(),
                }))
            }
            WriteKind::Delete => Ok(Applied::Removed),
        }
    }
}

/// Apply field deltas to a JSON object in order.
///
/// # Errors
///
/// Returns [`StoreError::InvalidUpdate`] if a path crosses a non-object value
/// or an increment targets a non-integer.
pub fn apply_deltas(target: &mut Value, deltas: &[FieldDelta]) -> Result<(), StoreError> {
    for delta in deltas {
        match delta {
            FieldDelta::Set { path, value } => {
                let (parent, leaf) = parent_object(target, path)?;
                parent.insert(leaf, value.clone());
            }
            FieldDelta::Increment { path, by } => {
                let (parent, leaf) = parent_object(target, path)?;
                let current = match parent.get(&leaf) {
                    None | Some(Value::Null) => 0,
                    Some(value) => value.as_i64().ok_or_else(|| {
                        StoreError::InvalidUpdate(format!("{path} is not an integer"))
                    })?,
                };
                let next = current.checked_add(*by).ok_or_else(|| {
                    StoreError::InvalidUpdate(format!("{path} overflowed"))
                })?;
                parent.insert(leaf, Value::from(next));
            }
            FieldDelta::Remove { path } => {
                let (parent, leaf) = parent_object(target, path)?;
                parent.remove(&leaf);
            }
        }
    }
    Ok(())
}

/// Walk to the object holding the last path segment, creating empty objects on the way.
fn parent_object<'a>(
    target: &'a mut Value,
    path: &str,
) -> Result<(&'a mut Map<String, Value>, String), StoreError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = match segments.pop() {
        Some(leaf) if !leaf.is_empty() => leaf.to_string(),
        _ => return Err(StoreError::InvalidUpdate(format!("empty path: {path:?}"))),
    };

    let mut node = target;
    for segment in segments {
        let Value::Object(map) = node else {
            return Err(StoreError::InvalidUpdate(format!(
                "{path}: {segment} is not inside an object"
            )));
        };
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    match node {
        Value::Object(map) => Ok((map, leaf)),
        _ => Err(StoreError::InvalidUpdate(format!(
            "{path}: parent of {leaf} is not an object"
        ))),
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during document store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Optimistic concurrency conflict: the stored version differs from the expected one.
    #[error(
        "Concurrency conflict on {collection}/{id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// Collection of the document
        collection: Collection,
        /// Document id
        id: DocId,
        /// Version the caller expected
        expected: Version,
        /// Version found in the store
        actual: Version,
    },

    /// An update targeted a document that does not exist.
    #[error("Document not found: {collection}/{id}")]
    NotFound {
        /// Collection of the document
        collection: Collection,
        /// Document id
        id: DocId,
    },

    /// A field delta could not be applied.
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend or transport failure.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future returned by [`DocumentStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

// ============================================================================
// DocumentStore
// ============================================================================

/// Key-value document store with per-document versions.
///
/// # Dyn Compatibility
///
/// Methods return [`StoreFuture`] instead of using `async fn` so the store can
/// be shared as `Arc<dyn DocumentStore>` across the engine's components.
pub trait DocumentStore: Send + Sync {
    /// Fetch a document. A missing document is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on backend failure.
    fn get(&self, collection: Collection, id: &DocId) -> StoreFuture<'_, Option<Document>>;

    /// List every document of a collection, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on backend failure.
    fn list(&self, collection: Collection) -> StoreFuture<'_, Vec<(DocId, Document)>>;

    /// Apply writes atomically: either every precondition holds and every write
    /// lands, or nothing changes. Returns the resulting version per write
    /// (`Version::ABSENT` for deletes).
    ///
    /// # Errors
    ///
    /// Returns the first failing write's error (typically
    /// [`StoreError::ConcurrencyConflict`]) or [`StoreError::Unavailable`].
    fn transact(&self, writes: Vec<Write>) -> StoreFuture<'_, Vec<Version>>;

    /// Replace a document.
    ///
    /// # Errors
    ///
    /// See [`DocumentStore::transact`].
    fn set(
        &self,
        collection: Collection,
        id: &DocId,
        value: Value,
        expected: Option<Version>,
    ) -> StoreFuture<'_, Version> {
        let write = Write {
            collection,
            id: id.clone(),
            expected,
            kind: WriteKind::Set(value),
        };
        single(self.transact(vec![write]))
    }

    /// Apply field deltas to an existing document.
    ///
    /// # Errors
    ///
    /// See [`DocumentStore::transact`].
    fn update(
        &self,
        collection: Collection,
        id: &DocId,
        deltas: Vec<FieldDelta>,
        expected: Option<Version>,
    ) -> StoreFuture<'_, Version> {
        single(self.transact(vec![Write::update(collection, id.clone(), deltas, expected)]))
    }

    /// Delete a document.
    ///
    /// # Errors
    ///
    /// See [`DocumentStore::transact`].
    fn delete(
        &self,
        collection: Collection,
        id: &DocId,
        expected: Option<Version>,
    ) -> StoreFuture<'_, ()> {
        let pending = self.transact(vec![Write::delete(collection, id.clone(), expected)]);
        Box::pin(async move {
            pending.await?;
            Ok(())
        })
    }
}

fn single(pending: StoreFuture<'_, Vec<Version>>) -> StoreFuture<'_, Version> {
    Box::pin(async move {
        let versions = pending.await?;
        versions
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Unavailable("store returned no version".to_string()))
    })
}
