//! `PostgreSQL` document store for the tutor booking engine.
//!
//! Every document is one row of the `documents` table:
//!
//! ```sql
//! CREATE TABLE documents (
//!     collection TEXT NOT NULL,
//!     id TEXT NOT NULL,
//!     data JSONB NOT NULL,
//!     version BIGINT NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     PRIMARY KEY (collection, id)
//! );
//! ```
//!
//! [`DocumentStore::transact`] runs in one database transaction. Each target
//! row is locked with `SELECT ... FOR UPDATE`, the write is applied through
//! [`Write::apply`], and the row is written back guarded by the version it was
//! locked at. Creating a document uses `ON CONFLICT DO NOTHING`, so two
//! clients racing to create the same document cannot both succeed.
//!
//! # Example
//!
//! ```ignore
//! use tutor_booking_postgres::PostgresDocumentStore;
//!
//! let url = "postgres://localhost/booking";
//! let store = PostgresDocumentStore::connect(url, 10, Duration::from_secs(30)).await?;
//! store.migrate().await?;
//! ```

use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tutor_booking_core::{
    Applied, Collection, DocId, Document, DocumentStore, StoreError, StoreFuture, Version, Write,
};

/// PostgreSQL-backed [`DocumentStore`].
#[derive(Clone, Debug)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection fails.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Create the `documents` table if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn unavailable(context: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Unavailable(format!("{context}: {e}"))
}

fn to_version(raw: i64) -> Result<Version, StoreError> {
    u64::try_from(raw)
        .map(Version::new)
        .map_err(|_| StoreError::Serialization(format!("negative version {raw}")))
}

fn to_raw(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version.value())
        .map_err(|_| StoreError::Serialization(format!("version {version} out of range")))
}

async fn lock_row(
    tx: &mut Transaction<'_, Postgres>,
    collection: Collection,
    id: &DocId,
) -> Result<Option<Document>, StoreError> {
    let row: Option<(Value, i64)> = sqlx::query_as(
        "SELECT data, version FROM documents
         WHERE collection = $1 AND id = $2
         FOR UPDATE",
    )
    .bind(collection.as_str())
    .bind(id.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(unavailable("Failed to lock document"))?;

    row.map(|(value, version)| {
        Ok(Document {
            value,
            version: to_version(version)?,
        })
    })
    .transpose()
}

async fn write_row(
    tx: &mut Transaction<'_, Postgres>,
    write: &Write,
    previous: Version,
    applied: &Applied,
) -> Result<Version, StoreError> {
    let result = match applied {
        Applied::Put(doc) if previous == Version::ABSENT => sqlx::query(
            "INSERT INTO documents (collection, id, data, version, updated_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (collection, id) DO NOTHING",
        )
        .bind(write.collection.as_str())
        .bind(write.id.as_str())
        .bind(&doc.value)
        .bind(to_raw(doc.version)?)
        .execute(&mut **tx)
        .await,
        Applied::Put(doc) => sqlx::query(
            "UPDATE documents SET data = $3, version = $4, updated_at = now()
             WHERE collection = $1 AND id = $2 AND version = $5",
        )
        .bind(write.collection.as_str())
        .bind(write.id.as_str())
        .bind(&doc.value)
        .bind(to_raw(doc.version)?)
        .bind(to_raw(previous)?)
        .execute(&mut **tx)
        .await,
        Applied::Removed if previous == Version::ABSENT => return Ok(Version::ABSENT),
        Applied::Removed => sqlx::query(
            "DELETE FROM documents WHERE collection = $1 AND id = $2 AND version = $3",
        )
        .bind(write.collection.as_str())
        .bind(write.id.as_str())
        .bind(to_raw(previous)?)
        .execute(&mut **tx)
        .await,
    }
    .map_err(unavailable("Failed to write document"))?;

    if result.rows_affected() != 1 {
        // Lost a race to create the row after the lock read found nothing.
        metrics::counter!("document_store.conflicts").increment(1);
        return Err(StoreError::ConcurrencyConflict {
            collection: write.collection,
            id: write.id.clone(),
            expected: previous,
            actual: previous.next(),
        });
    }

    Ok(match applied {
        Applied::Put(doc) => doc.version,
        Applied::Removed => Version::ABSENT,
    })
}

impl DocumentStore for PostgresDocumentStore {
    fn get(&self, collection: Collection, id: &DocId) -> StoreFuture<'_, Option<Document>> {
        let id = id.clone();
        Box::pin(async move {
            let row: Option<(Value, i64)> = sqlx::query_as(
                "SELECT data, version FROM documents WHERE collection = $1 AND id = $2",
            )
            .bind(collection.as_str())
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable("Failed to get document"))?;

            row.map(|(value, version)| {
                Ok(Document {
                    value,
                    version: to_version(version)?,
                })
            })
            .transpose()
        })
    }

    fn list(&self, collection: Collection) -> StoreFuture<'_, Vec<(DocId, Document)>> {
        Box::pin(async move {
            let rows: Vec<(String, Value, i64)> = sqlx::query_as(
                "SELECT id, data, version FROM documents WHERE collection = $1 ORDER BY id",
            )
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable("Failed to list documents"))?;

            rows.into_iter()
                .map(|(id, value, version)| {
                    Ok((
                        DocId::new(id),
                        Document {
                            value,
                            version: to_version(version)?,
                        },
                    ))
                })
                .collect()
        })
    }

    fn transact(&self, writes: Vec<Write>) -> StoreFuture<'_, Vec<Version>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(unavailable("Failed to begin transaction"))?;

            let mut versions = Vec::with_capacity(writes.len());
            for write in &writes {
                let current = lock_row(&mut tx, write.collection, &write.id).await?;
                let previous = current.as_ref().map_or(Version::ABSENT, |doc| doc.version);
                let applied = match write.apply(current.as_ref()) {
                    Ok(applied) => applied,
                    Err(err) => {
                        if matches!(err, StoreError::ConcurrencyConflict { .. }) {
                            metrics::counter!("document_store.conflicts").increment(1);
                        }
                        tracing::debug!(
                            collection = %write.collection,
                            id = %write.id,
                            error = %err,
                            "write rejected, rolling back"
                        );
                        // Dropping the transaction rolls it back.
                        return Err(err);
                    }
                };
                versions.push(write_row(&mut tx, write, previous, &applied).await?);
            }

            tx.commit()
                .await
                .map_err(unavailable("Failed to commit transaction"))?;
            tracing::trace!(writes = writes.len(), "transaction committed");
            Ok(versions)
        })
    }
}
