//! Transactional Batch Executor.
//!
//! Writes arrive already compiled ([`PreparedWrite`]), so schema and key
//! errors surface before any session is opened. With `use_transaction` the
//! whole batch runs on one session inside one transaction: ordered as
//! submitted, all-or-nothing, retried as a unit on transient store errors.
//! Without it every write runs on its own, with no session, concurrently.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rand::Rng;
use tessera_core::{Document, EngineError, EngineResult, Filter, UpdateOperatorMap};
use tracing::{debug_span, Instrument};

use crate::compile::CompiledUpdate;
use crate::native::{NativeDocument, NativeFilter, NativeQuery, NativeUpdate, NativeValue};
use crate::relation::RelationStore;
use crate::store::{SessionId, StoreDriver};

/// A caller-level write. The adapter compiles each into a [`PreparedWrite`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Create {
        class_name: String,
        document: Document,
    },
    Update {
        class_name: String,
        object_id: String,
        ops: UpdateOperatorMap,
    },
    UpdateMany {
        class_name: String,
        filter: Filter,
        ops: UpdateOperatorMap,
    },
    Upsert {
        class_name: String,
        filter: Filter,
        ops: UpdateOperatorMap,
    },
    Delete {
        class_name: String,
        filter: Filter,
    },
}

/// One compiled write.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedWrite {
    Insert {
        collection: String,
        document: NativeDocument,
    },
    /// Updates the first match, or every match when `many`.
    Update {
        collection: String,
        filter: NativeFilter,
        update: CompiledUpdate,
        many: bool,
    },
    Upsert {
        collection: String,
        filter: NativeFilter,
        update: NativeUpdate,
    },
    /// Deletes every match and the join edges they own under
    /// `relation_fields`.
    Delete {
        collection: String,
        filter: NativeFilter,
        relation_fields: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteResult {
    Created {
        object_id: String,
    },
    Updated {
        matched: u64,
        /// The updated document, for single-document updates.
        document: Option<NativeDocument>,
    },
    Upserted {
        matched: u64,
        upserted_id: Option<String>,
        document: NativeDocument,
    },
    Deleted {
        deleted: u64,
    },
}

/// Caller declaration for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    pub use_transaction: bool,
}

impl BatchOptions {
    #[must_use]
    pub fn transactional() -> Self {
        Self { use_transaction: true }
    }
}

impl PreparedWrite {
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Insert { collection, .. }
            | Self::Update { collection, .. }
            | Self::Upsert { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }

    async fn matching_ids(
        driver: &dyn StoreDriver,
        collection: &str,
        filter: &NativeFilter,
        limit: Option<u64>,
        session: Option<SessionId>,
    ) -> EngineResult<Vec<String>> {
        let query = NativeQuery {
            limit,
            projection: Some(Vec::new()),
            ..NativeQuery::new(filter.clone())
        };
        Ok(driver
            .find(collection, &query, session)
            .await?
            .iter()
            .filter_map(|doc| doc.get("_id").and_then(NativeValue::as_str).map(str::to_string))
            .collect())
    }

    /// Runs this write on `session` (or on none).
    ///
    /// # Errors
    ///
    /// The store error of the failing native call.
    pub async fn run(&self, driver: &Arc<dyn StoreDriver>, session: Option<SessionId>) -> EngineResult<WriteResult> {
        match self {
            Self::Insert { collection, document } => {
                let object_id = document
                    .get("_id")
                    .and_then(NativeValue::as_str)
                    .unwrap_or_default()
                    .to_string();
                driver.insert_one(collection, document.clone(), session).await?;
                Ok(WriteResult::Created { object_id })
            }
            Self::Update {
                collection,
                filter,
                update,
                many,
            } => {
                let relation_targets = if update.relation_ops.is_empty() {
                    Vec::new()
                } else {
                    let limit = (!many).then_some(1);
                    Self::matching_ids(driver.as_ref(), collection, filter, limit, session).await?
                };
                let (matched, document) = if update.native.is_empty() {
                    let matched = driver.count(collection, filter, None, session).await?;
                    (if *many { matched } else { matched.min(1) }, None)
                } else if *many {
                    (driver.update_many(collection, filter, &update.native, session).await?, None)
                } else {
                    let doc = driver
                        .find_one_and_update(collection, filter, &update.native, session)
                        .await?;
                    (u64::from(doc.is_some()), doc)
                };
                let relations = RelationStore::new(Arc::clone(driver));
                for owner_id in &relation_targets {
                    for op in &update.relation_ops {
                        relations.apply(collection, owner_id, op, session).await?;
                    }
                }
                Ok(WriteResult::Updated { matched, document })
            }
            Self::Upsert {
                collection,
                filter,
                update,
            } => {
                let out = driver.upsert_one(collection, filter, update, session).await?;
                Ok(WriteResult::Upserted {
                    matched: out.matched,
                    upserted_id: out.upserted_id,
                    document: out.document,
                })
            }
            Self::Delete {
                collection,
                filter,
                relation_fields,
            } => {
                let owners = if relation_fields.is_empty() {
                    Vec::new()
                } else {
                    Self::matching_ids(driver.as_ref(), collection, filter, None, session).await?
                };
                let deleted = driver.delete_many(collection, filter, session).await?;
                let relations = RelationStore::new(Arc::clone(driver));
                for field in relation_fields {
                    relations.remove_owners(collection, field, &owners, session).await?;
                }
                Ok(WriteResult::Deleted { deleted })
            }
        }
    }
}

pub struct BatchExecutor {
    driver: Arc<dyn StoreDriver>,
    retry_limit: u32,
}

impl BatchExecutor {
    /// `retry_limit` is the number of retries after the first attempt.
    #[must_use]
    pub fn new(driver: Arc<dyn StoreDriver>, retry_limit: u32) -> Self {
        Self { driver, retry_limit }
    }

    /// Executes a batch.
    ///
    /// Independent mode returns one result per write. Transactional mode
    /// returns every result or the error that rolled the batch back.
    ///
    /// # Errors
    ///
    /// Transactional mode only: the first failing write's error, or the
    /// last transient error once retries are exhausted.
    pub async fn execute(
        &self,
        writes: &[PreparedWrite],
        options: BatchOptions,
    ) -> EngineResult<Vec<EngineResult<WriteResult>>> {
        if !options.use_transaction {
            return Ok(join_all(writes.iter().map(|w| w.run(&self.driver, None))).await);
        }
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let span = debug_span!("transaction", attempt, writes = writes.len());
            match self.attempt(writes).instrument(span).await {
                Ok(results) => return Ok(results.into_iter().map(Ok).collect()),
                Err(e) if e.is_transient() && attempt <= self.retry_limit => {
                    tracing::warn!(attempt, error = %e, "transient transaction failure; retrying");
                    let jitter = rand::rng().random_range(1..=5_u64);
                    tokio::time::sleep(Duration::from_millis(jitter * u64::from(attempt))).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!(attempts = attempt, error = %e, "transaction retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// One transactional attempt. The session is always released.
    async fn attempt(&self, writes: &[PreparedWrite]) -> EngineResult<Vec<WriteResult>> {
        let session = self.driver.start_session().await?;
        let outcome = self.run_on(session, writes).await;
        if let Err(e) = self.driver.end_session(session).await {
            tracing::warn!(%session, error = %e, "failed to end session");
        }
        outcome
    }

    async fn run_on(&self, session: SessionId, writes: &[PreparedWrite]) -> EngineResult<Vec<WriteResult>> {
        self.driver.start_transaction(session).await?;
        let mut results = Vec::with_capacity(writes.len());
        for write in writes {
            match write.run(&self.driver, Some(session)).await {
                Ok(result) => results.push(result),
                Err(e) => return Err(self.abort(session, e).await),
            }
        }
        if let Err(e) = self.driver.commit_transaction(session).await {
            return Err(self.abort(session, e).await);
        }
        Ok(results)
    }

    async fn abort(&self, session: SessionId, cause: EngineError) -> EngineError {
        tracing::debug!(%session, error = %cause, "rolling back transaction");
        if let Err(e) = self.driver.abort_transaction(session).await {
            tracing::warn!(%session, error = %e, "abort failed");
        }
        cause
    }
}
