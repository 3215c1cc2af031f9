//! Store driver seam.
//!
//! [`StoreDriver`] is the native document-store interface the engine
//! compiles down to. [`MemoryStore`] is the in-process reference
//! implementation used by the engine and its tests.

pub mod eval;
pub mod memory;
pub mod sandbox;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::{EngineError, EngineResult};
use uuid::Uuid;

use crate::events::StoreEventListener;
use crate::native::{NativeDocument, NativeFilter, NativeIndex, NativeQuery, NativeUpdate};

pub use memory::{CallRecord, MemoryStore};

/// Handle to a driver session. Writes carrying the same id share the session
/// and, once a transaction is started on it, its atomicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of [`StoreDriver::upsert_one`].
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertResult {
    /// Number of existing documents matched (0 or 1).
    pub matched: u64,
    /// `_id` of the inserted document when the upsert inserted.
    pub upserted_id: Option<String>,
    /// The document after the write.
    pub document: NativeDocument,
}

/// Native document-store driver.
///
/// Every call is a suspension point. `session` is `None` for writes that run
/// independently. Drivers surface unique-index violations as `Duplicate`,
/// retryable transaction conflicts as `TransientStore` and exceeded query
/// time bounds as `OperationExceededTimeLimit`.
///
/// Used as `Arc<dyn StoreDriver>`.
#[async_trait]
pub trait StoreDriver: Send + Sync {
    /// Opens the connection pool for an already credential-escaped URI.
    async fn connect(&self, uri: &str) -> EngineResult<()>;

    async fn close(&self) -> EngineResult<()>;

    /// Registers a listener for connection-lifecycle and command events.
    fn subscribe_events(&self, listener: Arc<dyn StoreEventListener>);

    /// Runs a query, honouring `query.max_time`.
    async fn find(
        &self,
        collection: &str,
        query: &NativeQuery,
        session: Option<SessionId>,
    ) -> EngineResult<Vec<NativeDocument>>;

    async fn count(
        &self,
        collection: &str,
        filter: &NativeFilter,
        max_time: Option<Duration>,
        session: Option<SessionId>,
    ) -> EngineResult<u64>;

    async fn insert_one(
        &self,
        collection: &str,
        doc: NativeDocument,
        session: Option<SessionId>,
    ) -> EngineResult<()>;

    /// Applies `update` to every match; returns the number matched.
    async fn update_many(
        &self,
        collection: &str,
        filter: &NativeFilter,
        update: &NativeUpdate,
        session: Option<SessionId>,
    ) -> EngineResult<u64>;

    /// Applies `update` to the first match and returns it after the update.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &NativeFilter,
        update: &NativeUpdate,
        session: Option<SessionId>,
    ) -> EngineResult<Option<NativeDocument>>;

    /// Updates the first match, or inserts a document seeded from the
    /// filter's equality conditions. `set_on_insert` only applies on insert.
    async fn upsert_one(
        &self,
        collection: &str,
        filter: &NativeFilter,
        update: &NativeUpdate,
        session: Option<SessionId>,
    ) -> EngineResult<UpsertResult>;

    /// Returns the number of deleted documents.
    async fn delete_many(
        &self,
        collection: &str,
        filter: &NativeFilter,
        session: Option<SessionId>,
    ) -> EngineResult<u64>;

    /// Returns whether the collection existed.
    async fn drop_collection(&self, collection: &str) -> EngineResult<bool>;

    /// Creating an index identical to an existing one is a no-op; a
    /// same-named index with a different definition is `Duplicate`.
    async fn create_index(&self, collection: &str, index: &NativeIndex) -> EngineResult<()>;

    async fn drop_index(&self, collection: &str, name: &str) -> EngineResult<()>;

    async fn list_indexes(&self, collection: &str) -> EngineResult<Vec<NativeIndex>>;

    async fn start_session(&self) -> EngineResult<SessionId>;

    async fn start_transaction(&self, session: SessionId) -> EngineResult<()>;

    async fn commit_transaction(&self, session: SessionId) -> EngineResult<()>;

    async fn abort_transaction(&self, session: SessionId) -> EngineResult<()>;

    /// Releases the session. Aborts any transaction still open on it.
    async fn end_session(&self, session: SessionId) -> EngineResult<()>;
}

/// Runs `fut` under an optional time bound, mapping expiry to
/// `OperationExceededTimeLimit`. The future is dropped on expiry.
///
/// # Errors
///
/// Returns the future's own error, or `OperationExceededTimeLimit`.
pub async fn with_time_limit<F, T>(limit: Option<Duration>, fut: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    let Some(limit) = limit else {
        return fut.await;
    };
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_elapsed) => Err(EngineError::OperationExceededTimeLimit {
            limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sleepy(ms: u64) -> EngineResult<u64> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ms)
    }

    #[tokio::test(start_paused = true)]
    async fn completes_within_bound() {
        let out = with_time_limit(Some(Duration::from_millis(250)), sleepy(125)).await;
        assert_eq!(out, Ok(125));
    }

    #[tokio::test(start_paused = true)]
    async fn exceeds_bound() {
        let out = with_time_limit(Some(Duration::from_millis(250)), sleepy(500)).await;
        assert_eq!(out, Err(EngineError::OperationExceededTimeLimit { limit_ms: 250 }));
    }

    #[tokio::test(start_paused = true)]
    async fn no_bound_waits() {
        let out = with_time_limit(None, sleepy(10_000)).await;
        assert_eq!(out, Ok(10_000));
    }
}
