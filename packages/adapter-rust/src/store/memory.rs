//! In-memory [`StoreDriver`] backed by [`DashMap`].
//!
//! Collections are `_id`-keyed maps. Transactions write in place and keep an
//! undo log per session. Abort reverts only what the transaction wrote and
//! nobody changed since, so writes made outside the session survive it. Every call is recorded as a
//! [`CallRecord`] and faults can be injected per operation name, which is
//! what the engine's tests assert against.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tessera_core::{EngineError, EngineResult};
use uuid::Uuid;

use super::eval::{apply_update, index_key, matches, project, seed_from_filter, sort_documents};
use super::{with_time_limit, SessionId, StoreDriver, UpsertResult};
use crate::events::{CompositeEventListener, EventObject, StoreEvent, StoreEventListener};
use crate::native::{NativeDocument, NativeFilter, NativeIndex, NativeQuery, NativeUpdate, NativeValue};

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub op: &'static str,
    pub collection: String,
    pub session: Option<SessionId>,
}

#[derive(Debug, Clone, Default)]
struct Collection {
    docs: BTreeMap<String, NativeDocument>,
    indexes: BTreeMap<String, NativeIndex>,
}

#[derive(Debug, Clone)]
struct UndoEntry {
    collection: String,
    id: String,
    previous: Option<NativeDocument>,
    written: Option<NativeDocument>,
}

impl UndoEntry {
    fn revert(self, coll: &mut Collection) {
        match (self.previous, self.written) {
            (None, _) => {
                coll.docs.remove(&self.id);
            }
            (Some(previous), None) => {
                coll.docs.entry(self.id).or_insert(previous);
            }
            (Some(previous), Some(written)) => {
                let Some(current) = coll.docs.get_mut(&self.id) else {
                    return;
                };
                let keys: BTreeSet<&String> = previous.keys().chain(written.keys()).collect();
                for key in keys {
                    let before = previous.get(key);
                    let after = written.get(key);
                    if before == after || current.get(key) != after {
                        continue;
                    }
                    match before {
                        Some(value) => {
                            current.insert(key.clone(), value.clone());
                        }
                        None => {
                            current.remove(key);
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    in_transaction: bool,
    undo: Vec<UndoEntry>,
}

struct Fault {
    op: String,
    error: EngineError,
    remaining: usize,
}

/// In-memory document store.
pub struct MemoryStore {
    collections: DashMap<String, Collection>,
    sessions: DashMap<SessionId, SessionState>,
    calls: Mutex<Vec<CallRecord>>,
    faults: Mutex<Vec<Fault>>,
    listeners: CompositeEventListener,
    connected: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            sessions: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            listeners: CompositeEventListener::default(),
            connected: AtomicBool::new(false),
        }
    }

    /// Makes the next `times` calls of `op` fail with `error`.
    pub fn inject_fault(&self, op: &str, error: EngineError, times: usize) {
        self.faults.lock().push(Fault {
            op: op.to_string(),
            error,
            remaining: times,
        });
    }

    /// Every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    /// Recorded calls of one operation.
    #[must_use]
    pub fn calls_of(&self, op: &str) -> Vec<CallRecord> {
        self.calls.lock().iter().filter(|c| c.op == op).cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Sessions started and not yet ended.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of documents in `collection`.
    #[must_use]
    pub fn document_count(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.docs.len())
    }

    /// Raw stored document, bypassing the driver interface.
    #[must_use]
    pub fn raw_document(&self, collection: &str, id: &str) -> Option<NativeDocument> {
        self.collections.get(collection)?.docs.get(id).cloned()
    }

    fn emit(&self, name: &str, payload: EventObject) {
        self.listeners.on_event(&StoreEvent::new(name, payload));
    }

    /// Records the call and returns an injected fault if one is due.
    fn begin(&self, op: &'static str, collection: &str, session: Option<SessionId>) -> EngineResult<()> {
        self.calls.lock().push(CallRecord {
            op,
            collection: collection.to_string(),
            session,
        });
        let mut faults = self.faults.lock();
        if let Some(fault) = faults.iter_mut().find(|f| f.op == op && f.remaining > 0) {
            fault.remaining -= 1;
            let error = fault.error.clone();
            drop(faults);
            self.command_failed(op, &error);
            return Err(error);
        }
        Ok(())
    }

    fn command_failed(&self, op: &str, error: &EngineError) {
        let failure = EventObject::new()
            .with("code", i64::from(error.code()))
            .with("message", error.to_string());
        self.emit(
            "commandFailed",
            EventObject::new()
                .with("commandName", op)
                .with("failure", failure),
        );
    }

    fn finish<T>(&self, op: &str, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(e) = &result {
            self.command_failed(op, e);
        }
        result
    }

    fn record_undo(
        &self,
        session: Option<SessionId>,
        collection: &str,
        id: &str,
        previous: Option<NativeDocument>,
        written: Option<NativeDocument>,
    ) {
        let Some(session) = session else {
            return;
        };
        if let Some(mut state) = self.sessions.get_mut(&session) {
            if state.in_transaction {
                state.undo.push(UndoEntry {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    previous,
                    written,
                });
            }
        }
    }

    fn check_session(&self, session: Option<SessionId>) -> EngineResult<()> {
        match session {
            Some(id) if !self.sessions.contains_key(&id) => Err(EngineError::Store {
                code: 206,
                message: format!("session {id} is not active"),
            }),
            _ => Ok(()),
        }
    }

    /// Rejects `candidate` when it collides with another document under a
    /// unique index.
    fn check_unique(coll: &Collection, collection: &str, candidate: &NativeDocument) -> EngineResult<()> {
        let id = candidate.get("_id");
        for index in coll.indexes.values().filter(|i| i.unique) {
            let Some(key) = index_key(candidate, index) else {
                continue;
            };
            let clash = coll
                .docs
                .values()
                .filter(|other| other.get("_id") != id)
                .any(|other| index_key(other, index).as_ref() == Some(&key));
            if clash {
                return Err(EngineError::Duplicate(format!(
                    "E11000 duplicate key error collection: {collection} index: {}",
                    index.name
                )));
            }
        }
        Ok(())
    }

    /// Evaluates a query under the collection read guard. Returns the
    /// matches and the sandboxed delay to await afterwards.
    fn run_query(&self, collection: &str, query: &NativeQuery) -> EngineResult<(Vec<NativeDocument>, Duration)> {
        let mut delay = Duration::ZERO;
        let Some(coll) = self.collections.get(collection) else {
            return Ok((Vec::new(), delay));
        };
        let mut out = Vec::new();
        for doc in coll.docs.values() {
            if matches(doc, &query.filter, query.collation.as_ref(), &mut delay)? {
                out.push(doc.clone());
            }
        }
        drop(coll);
        sort_documents(&mut out, &query.sort, query.collation.as_ref());
        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let mut out: Vec<NativeDocument> = out.into_iter().skip(skip).take(limit).collect();
        if let Some(projection) = &query.projection {
            out = out.into_iter().map(|d| project(d, projection)).collect();
        }
        Ok((out, delay))
    }

    fn matching_ids(&self, collection: &str, filter: &NativeFilter, first_only: bool) -> EngineResult<Vec<String>> {
        let mut delay = Duration::ZERO;
        let Some(coll) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut ids = Vec::new();
        for (id, doc) in &coll.docs {
            if matches(doc, filter, None, &mut delay)? {
                ids.push(id.clone());
                if first_only {
                    break;
                }
            }
        }
        Ok(ids)
    }

    /// Applies `update` to the documents `ids`, all or nothing.
    fn update_ids(
        &self,
        collection: &str,
        ids: &[String],
        update: &NativeUpdate,
        session: Option<SessionId>,
    ) -> EngineResult<Vec<NativeDocument>> {
        let mut coll = self.collections.entry(collection.to_string()).or_default();
        let mut staged = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(current) = coll.docs.get(id) else {
                continue;
            };
            let mut next = current.clone();
            apply_update(&mut next, update, false)?;
            Self::check_unique(&coll, collection, &next)?;
            staged.push((id.clone(), current.clone(), next));
        }
        let mut updated = Vec::with_capacity(staged.len());
        for (id, previous, next) in staged {
            coll.docs.insert(id.clone(), next.clone());
            updated.push((id, previous, next));
        }
        let result: Vec<NativeDocument> = ids.iter().filter_map(|id| coll.docs.get(id).cloned()).collect();
        drop(coll);
        for (id, previous, next) in updated {
            self.record_undo(session, collection, &id, Some(previous), Some(next));
        }
        Ok(result)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreDriver for MemoryStore {
    async fn connect(&self, uri: &str) -> EngineResult<()> {
        self.begin("connect", "", None)?;
        self.connected.store(true, Ordering::SeqCst);
        self.emit(
            "connectionPoolCreated",
            EventObject::new().with("address", uri).with(
                "options",
                EventObject::new().with("maxPoolSize", 100_i64),
            ),
        );
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        self.begin("close", "", None)?;
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit("connectionPoolClosed", EventObject::new());
        }
        Ok(())
    }

    fn subscribe_events(&self, listener: Arc<dyn StoreEventListener>) {
        self.listeners.add(listener);
    }

    async fn find(
        &self,
        collection: &str,
        query: &NativeQuery,
        session: Option<SessionId>,
    ) -> EngineResult<Vec<NativeDocument>> {
        self.begin("find", collection, session)?;
        let work = async {
            let (docs, delay) = self.run_query(collection, query)?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(docs)
        };
        let result = with_time_limit(query.max_time, work).await;
        self.finish("find", result)
    }

    async fn count(
        &self,
        collection: &str,
        filter: &NativeFilter,
        max_time: Option<Duration>,
        session: Option<SessionId>,
    ) -> EngineResult<u64> {
        self.begin("count", collection, session)?;
        let query = NativeQuery::new(filter.clone());
        let work = async {
            let (docs, delay) = self.run_query(collection, &query)?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(docs.len() as u64)
        };
        let result = with_time_limit(max_time, work).await;
        self.finish("count", result)
    }

    async fn insert_one(
        &self,
        collection: &str,
        doc: NativeDocument,
        session: Option<SessionId>,
    ) -> EngineResult<()> {
        self.begin("insert", collection, session)?;
        self.check_session(session)?;
        let result = (|| -> EngineResult<String> {
            let id = doc
                .get("_id")
                .and_then(NativeValue::as_str)
                .ok_or_else(|| EngineError::InvalidQuery("document has no string _id".into()))?
                .to_string();
            let mut coll = self.collections.entry(collection.to_string()).or_default();
            if coll.docs.contains_key(&id) {
                return Err(EngineError::Duplicate(format!(
                    "E11000 duplicate key error collection: {collection} index: _id_"
                )));
            }
            Self::check_unique(&coll, collection, &doc)?;
            coll.docs.insert(id.clone(), doc);
            Ok(id)
        })();
        let id = self.finish("insert", result)?;
        self.record_undo(session, collection, &id, None, None);
        Ok(())
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &NativeFilter,
        update: &NativeUpdate,
        session: Option<SessionId>,
    ) -> EngineResult<u64> {
        self.begin("update", collection, session)?;
        self.check_session(session)?;
        let result = self
            .matching_ids(collection, filter, false)
            .and_then(|ids| self.update_ids(collection, &ids, update, session));
        self.finish("update", result).map(|docs| docs.len() as u64)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &NativeFilter,
        update: &NativeUpdate,
        session: Option<SessionId>,
    ) -> EngineResult<Option<NativeDocument>> {
        self.begin("findAndModify", collection, session)?;
        self.check_session(session)?;
        let result = self
            .matching_ids(collection, filter, true)
            .and_then(|ids| self.update_ids(collection, &ids, update, session));
        self.finish("findAndModify", result).map(|docs| docs.into_iter().next())
    }

    async fn upsert_one(
        &self,
        collection: &str,
        filter: &NativeFilter,
        update: &NativeUpdate,
        session: Option<SessionId>,
    ) -> EngineResult<UpsertResult> {
        self.begin("upsert", collection, session)?;
        self.check_session(session)?;
        let existing = self.finish("upsert", self.matching_ids(collection, filter, true))?;
        if !existing.is_empty() {
            let docs = self.finish("upsert", self.update_ids(collection, &existing, update, session))?;
            return Ok(UpsertResult {
                matched: 1,
                upserted_id: None,
                document: docs.into_iter().next().unwrap_or_default(),
            });
        }

        let result = (|| -> EngineResult<(String, NativeDocument)> {
            let mut doc = seed_from_filter(filter);
            apply_update(&mut doc, update, true)?;
            let id = match doc.get("_id").and_then(NativeValue::as_str) {
                Some(id) => id.to_string(),
                None => {
                    let id = Uuid::new_v4().simple().to_string();
                    doc.insert("_id".to_string(), NativeValue::String(id.clone()));
                    id
                }
            };
            let mut coll = self.collections.entry(collection.to_string()).or_default();
            if coll.docs.contains_key(&id) {
                return Err(EngineError::Duplicate(format!(
                    "E11000 duplicate key error collection: {collection} index: _id_"
                )));
            }
            Self::check_unique(&coll, collection, &doc)?;
            coll.docs.insert(id.clone(), doc.clone());
            Ok((id, doc))
        })();
        let (id, document) = self.finish("upsert", result)?;
        self.record_undo(session, collection, &id, None, None);
        Ok(UpsertResult {
            matched: 0,
            upserted_id: Some(id),
            document,
        })
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &NativeFilter,
        session: Option<SessionId>,
    ) -> EngineResult<u64> {
        self.begin("delete", collection, session)?;
        self.check_session(session)?;
        let ids = self.finish("delete", self.matching_ids(collection, filter, false))?;
        let mut removed = Vec::with_capacity(ids.len());
        if let Some(mut coll) = self.collections.get_mut(collection) {
            for id in &ids {
                if let Some(previous) = coll.docs.remove(id) {
                    removed.push((id.clone(), previous));
                }
            }
        }
        let count = removed.len() as u64;
        for (id, previous) in removed {
            self.record_undo(session, collection, &id, Some(previous), None);
        }
        Ok(count)
    }

    async fn drop_collection(&self, collection: &str) -> EngineResult<bool> {
        self.begin("drop", collection, None)?;
        Ok(self.collections.remove(collection).is_some())
    }

    async fn create_index(&self, collection: &str, index: &NativeIndex) -> EngineResult<()> {
        self.begin("createIndex", collection, None)?;
        let result = (|| -> EngineResult<()> {
            let mut coll = self.collections.entry(collection.to_string()).or_default();
            if let Some(existing) = coll.indexes.get(&index.name) {
                if existing.same_definition(index) {
                    return Ok(());
                }
                return Err(EngineError::Duplicate(format!(
                    "index {} already exists with a different definition",
                    index.name
                )));
            }
            if index.unique {
                let mut seen = HashSet::new();
                for doc in coll.docs.values() {
                    if let Some(key) = index_key(doc, index) {
                        if !seen.insert(format!("{key:?}")) {
                            return Err(EngineError::Duplicate(format!(
                                "E11000 duplicate key error collection: {collection} index: {}",
                                index.name
                            )));
                        }
                    }
                }
            }
            coll.indexes.insert(index.name.clone(), index.clone());
            Ok(())
        })();
        self.finish("createIndex", result)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> EngineResult<()> {
        self.begin("dropIndexes", collection, None)?;
        let removed = self
            .collections
            .get_mut(collection)
            .and_then(|mut coll| coll.indexes.remove(name));
        let result = match removed {
            Some(_) => Ok(()),
            None => Err(EngineError::Store {
                code: 27,
                message: format!("index not found with name [{name}]"),
            }),
        };
        self.finish("dropIndexes", result)
    }

    async fn list_indexes(&self, collection: &str) -> EngineResult<Vec<NativeIndex>> {
        self.begin("listIndexes", collection, None)?;
        Ok(self
            .collections
            .get(collection)
            .map(|coll| coll.indexes.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn start_session(&self) -> EngineResult<SessionId> {
        self.begin("startSession", "", None)?;
        let id = SessionId::new();
        self.sessions.insert(id, SessionState::default());
        Ok(id)
    }

    async fn start_transaction(&self, session: SessionId) -> EngineResult<()> {
        self.begin("startTransaction", "", Some(session))?;
        let mut state = self.sessions.get_mut(&session).ok_or_else(|| EngineError::Store {
            code: 206,
            message: format!("session {session} is not active"),
        })?;
        if state.in_transaction {
            return Err(EngineError::Store {
                code: 256,
                message: "transaction already in progress".into(),
            });
        }
        state.in_transaction = true;
        state.undo.clear();
        Ok(())
    }

    async fn commit_transaction(&self, session: SessionId) -> EngineResult<()> {
        self.begin("commitTransaction", "", Some(session))?;
        if let Some(mut state) = self.sessions.get_mut(&session) {
            state.in_transaction = false;
            state.undo.clear();
        }
        Ok(())
    }

    async fn abort_transaction(&self, session: SessionId) -> EngineResult<()> {
        self.begin("abortTransaction", "", Some(session))?;
        let undo = match self.sessions.get_mut(&session) {
            Some(mut state) => {
                state.in_transaction = false;
                std::mem::take(&mut state.undo)
            }
            None => Vec::new(),
        };
        for entry in undo.into_iter().rev() {
            let mut coll = self.collections.entry(entry.collection.clone()).or_default();
            entry.revert(&mut coll);
        }
        Ok(())
    }

    async fn end_session(&self, session: SessionId) -> EngineResult<()> {
        self.begin("endSession", "", Some(session))?;
        let open = self
            .sessions
            .get(&session)
            .is_some_and(|state| state.in_transaction);
        if open {
            self.abort_transaction(session).await?;
        }
        self.sessions.remove(&session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{Collation, NativeCond};

    fn doc(id: &str, pairs: &[(&str, NativeValue)]) -> NativeDocument {
        let mut d: NativeDocument = pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
        d.insert("_id".to_string(), NativeValue::str(id));
        d
    }

    #[tokio::test]
    async fn insert_find_and_record() {
        let store = MemoryStore::new();
        store.insert_one("Post", doc("a", &[("n", NativeValue::Int64(1))]), None).await.unwrap();
        store.insert_one("Post", doc("b", &[("n", NativeValue::Int64(2))]), None).await.unwrap();
        let mut query = NativeQuery::new(NativeFilter::field("n", NativeCond::Gte(NativeValue::Int64(2))));
        query.sort = vec![("n".to_string(), -1)];
        let found = store.find("Post", &query, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_id"], NativeValue::str("b"));
        assert_eq!(store.calls_of("insert").len(), 2);
        assert_eq!(store.calls_of("find")[0].session, None);
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let store = MemoryStore::new();
        store.insert_one("Post", doc("a", &[]), None).await.unwrap();
        let err = store.insert_one("Post", doc("a", &[]), None).await.unwrap_err();
        assert!(matches!(err, EngineError::Duplicate(_)));
    }

    #[tokio::test]
    async fn case_insensitive_unique_index() {
        let store = MemoryStore::new();
        let index = NativeIndex {
            name: "case_insensitive_email".to_string(),
            keys: vec![("email".to_string(), 1)],
            unique: true,
            sparse: true,
            collation: Some(Collation::case_insensitive()),
        };
        store.create_index("_User", &index).await.unwrap();
        store.create_index("_User", &index).await.unwrap();
        store.insert_one("_User", doc("a", &[("email", NativeValue::str("A@x.io"))]), None).await.unwrap();
        store.insert_one("_User", doc("b", &[]), None).await.unwrap();
        store.insert_one("_User", doc("c", &[]), None).await.unwrap();
        let err = store
            .insert_one("_User", doc("d", &[("email", NativeValue::str("a@X.io"))]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Duplicate(_)));
    }

    #[tokio::test]
    async fn abort_rolls_back_session_writes() {
        let store = MemoryStore::new();
        store.insert_one("Post", doc("keep", &[("n", NativeValue::Int64(1))]), None).await.unwrap();
        let session = store.start_session().await.unwrap();
        store.start_transaction(session).await.unwrap();
        store.insert_one("Post", doc("new", &[]), Some(session)).await.unwrap();
        let mut update = NativeUpdate::default();
        update.set.insert("n".to_string(), NativeValue::Int64(5));
        store
            .update_many("Post", &NativeFilter::id("keep"), &update, Some(session))
            .await
            .unwrap();
        store.delete_many("Post", &NativeFilter::id("keep"), Some(session)).await.unwrap();
        store.abort_transaction(session).await.unwrap();
        store.end_session(session).await.unwrap();

        assert_eq!(store.document_count("Post"), 1);
        assert_eq!(store.raw_document("Post", "keep").unwrap()["n"], NativeValue::Int64(1));
        assert_eq!(store.active_sessions(), 0);
    }

    #[tokio::test]
    async fn abort_keeps_writes_made_outside_the_session() {
        let store = MemoryStore::new();
        let seed = doc(
            "a",
            &[
                ("n", NativeValue::Int64(1)),
                ("m", NativeValue::Int64(1)),
                ("tag", NativeValue::str("x")),
            ],
        );
        store.insert_one("Post", seed, None).await.unwrap();
        let set = |field: &str, value: NativeValue| {
            let mut update = NativeUpdate::default();
            update.set.insert(field.to_string(), value);
            update
        };
        let only_a = NativeFilter::id("a");

        let session = store.start_session().await.unwrap();
        store.start_transaction(session).await.unwrap();
        store
            .update_many("Post", &only_a, &set("n", NativeValue::Int64(5)), Some(session))
            .await
            .unwrap();
        store
            .update_many("Post", &only_a, &set("m", NativeValue::Int64(5)), Some(session))
            .await
            .unwrap();
        store
            .update_many("Post", &only_a, &set("tag", NativeValue::str("y")), None)
            .await
            .unwrap();
        store
            .update_many("Post", &only_a, &set("m", NativeValue::Int64(7)), None)
            .await
            .unwrap();
        store.abort_transaction(session).await.unwrap();
        store.end_session(session).await.unwrap();

        let a = store.raw_document("Post", "a").unwrap();
        assert_eq!(a["n"], NativeValue::Int64(1));
        assert_eq!(a["tag"], NativeValue::str("y"));
        assert_eq!(a["m"], NativeValue::Int64(7));
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let store = MemoryStore::new();
        store.inject_fault("insert", EngineError::TransientStore("conflict".into()), 1);
        assert!(store.insert_one("Post", doc("a", &[]), None).await.is_err());
        assert!(store.insert_one("Post", doc("a", &[]), None).await.is_ok());
    }

    #[tokio::test]
    async fn upsert_applies_set_on_insert_once() {
        let store = MemoryStore::new();
        let mut update = NativeUpdate::default();
        update.set_on_insert.insert("first".to_string(), NativeValue::Int64(1));
        update.inc.insert("hits".to_string(), NativeValue::Int64(1));
        let filter = NativeFilter::field("key", NativeCond::Eq(NativeValue::str("k")));

        let first = store.upsert_one("Counter", &filter, &update, None).await.unwrap();
        assert!(first.upserted_id.is_some());

        update.set_on_insert.insert("first".to_string(), NativeValue::Int64(2));
        let second = store.upsert_one("Counter", &filter, &update, None).await.unwrap();
        assert_eq!(second.matched, 1);
        assert_eq!(second.document["first"], NativeValue::Int64(1));
        assert_eq!(second.document["hits"], NativeValue::Int64(2));
        assert_eq!(second.document["key"], NativeValue::str("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn sandbox_sleep_respects_time_bound() {
        let store = MemoryStore::new();
        store.insert_one("Post", doc("a", &[]), None).await.unwrap();
        let mut query = NativeQuery::new(NativeFilter::Where {
            script: "sleep(125) && true".to_string(),
        });
        query.max_time = Some(Duration::from_millis(250));
        assert_eq!(store.find("Post", &query, None).await.unwrap().len(), 1);

        query.filter = NativeFilter::Where {
            script: "sleep(500) && true".to_string(),
        };
        let err = store.find("Post", &query, None).await.unwrap_err();
        assert_eq!(err, EngineError::OperationExceededTimeLimit { limit_ms: 250 });
    }
}
