//! Relation join collections.
//!
//! A relation field `f` on class `C` is stored in `_Join:f:C`, one document
//! per edge: `{ owningId, relatedId }`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tessera_core::EngineResult;

use crate::compile::RelationOp;
use crate::native::{NativeCond, NativeFilter, NativeQuery, NativeUpdate, NativeValue};
use crate::store::{SessionId, StoreDriver};

pub const OWNING_ID_KEY: &str = "owningId";
pub const RELATED_ID_KEY: &str = "relatedId";

/// Name of the join collection backing `owner_class.field`.
#[must_use]
pub fn join_collection(field: &str, owner_class: &str) -> String {
    format!("_Join:{field}:{owner_class}")
}

fn ids_cond(ids: &[String]) -> NativeCond {
    NativeCond::In(ids.iter().map(|id| NativeValue::str(id)).collect())
}

fn id_of(doc: &crate::native::NativeDocument, key: &str) -> Option<String> {
    doc.get(key).and_then(NativeValue::as_str).map(str::to_string)
}

/// Join collection access.
#[derive(Clone)]
pub struct RelationStore {
    driver: Arc<dyn StoreDriver>,
}

impl RelationStore {
    #[must_use]
    pub fn new(driver: Arc<dyn StoreDriver>) -> Self {
        Self { driver }
    }

    /// Applies one compiled relation edit for `owner_id`. Adding an edge
    /// that already exists is a no-op.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn apply(
        &self,
        owner_class: &str,
        owner_id: &str,
        op: &RelationOp,
        session: Option<SessionId>,
    ) -> EngineResult<()> {
        let collection = join_collection(&op.field, owner_class);
        let owner = NativeFilter::field(OWNING_ID_KEY, NativeCond::Eq(NativeValue::str(owner_id)));
        for related in &op.add {
            let edge = owner
                .clone()
                .and(NativeFilter::field(RELATED_ID_KEY, NativeCond::Eq(NativeValue::str(related))));
            self.driver
                .upsert_one(&collection, &edge, &NativeUpdate::default(), session)
                .await?;
        }
        if !op.remove.is_empty() {
            let edges = owner.and(NativeFilter::field(RELATED_ID_KEY, ids_cond(&op.remove)));
            self.driver.delete_many(&collection, &edges, session).await?;
        }
        Ok(())
    }

    /// Related ids per owner, for every owner in `owner_ids`, in one query.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn related_ids(
        &self,
        owner_class: &str,
        field: &str,
        owner_ids: &[String],
    ) -> EngineResult<BTreeMap<String, Vec<String>>> {
        let query = NativeQuery {
            sort: vec![("_id".to_string(), 1)],
            ..NativeQuery::new(NativeFilter::field(OWNING_ID_KEY, ids_cond(owner_ids)))
        };
        let edges = self
            .driver
            .find(&join_collection(field, owner_class), &query, None)
            .await?;
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for edge in &edges {
            if let (Some(owner), Some(related)) = (id_of(edge, OWNING_ID_KEY), id_of(edge, RELATED_ID_KEY)) {
                out.entry(owner).or_default().push(related);
            }
        }
        Ok(out)
    }

    /// Owners whose `field` contains `related_id`.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn owners_containing(&self, owner_class: &str, field: &str, related_id: &str) -> EngineResult<Vec<String>> {
        let filter = NativeFilter::field(RELATED_ID_KEY, NativeCond::Eq(NativeValue::str(related_id)));
        let edges = self
            .driver
            .find(&join_collection(field, owner_class), &NativeQuery::new(filter), None)
            .await?;
        Ok(edges.iter().filter_map(|e| id_of(e, OWNING_ID_KEY)).collect())
    }

    /// Removes every edge owned by one of `owner_ids`.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn remove_owners(
        &self,
        owner_class: &str,
        field: &str,
        owner_ids: &[String],
        session: Option<SessionId>,
    ) -> EngineResult<u64> {
        if owner_ids.is_empty() {
            return Ok(0);
        }
        let edges = NativeFilter::field(OWNING_ID_KEY, ids_cond(owner_ids));
        self.driver
            .delete_many(&join_collection(field, owner_class), &edges, session)
            .await
    }

    /// Drops the join collection of `owner_class.field`.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn drop(&self, owner_class: &str, field: &str) -> EngineResult<bool> {
        self.driver.drop_collection(&join_collection(field, owner_class)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn op(add: &[&str], remove: &[&str]) -> RelationOp {
        RelationOp {
            field: "likers".to_string(),
            target_class: "_User".to_string(),
            add: add.iter().map(ToString::to_string).collect(),
            remove: remove.iter().map(ToString::to_string).collect(),
        }
    }

    #[tokio::test]
    async fn add_is_idempotent_and_remove_deletes_edges() {
        let memory = Arc::new(MemoryStore::new());
        let store = RelationStore::new(memory.clone());
        store.apply("Post", "p1", &op(&["u1", "u2"], &[]), None).await.unwrap();
        store.apply("Post", "p1", &op(&["u1"], &[]), None).await.unwrap();
        store.apply("Post", "p2", &op(&["u1"], &[]), None).await.unwrap();
        assert_eq!(memory.document_count("_Join:likers:Post"), 3);

        let related = store
            .related_ids("Post", "likers", &["p1".to_string(), "p2".to_string()])
            .await
            .unwrap();
        let mut p1 = related["p1"].clone();
        p1.sort();
        assert_eq!(p1, vec!["u1", "u2"]);
        assert_eq!(related["p2"], vec!["u1"]);

        let mut owners = store.owners_containing("Post", "likers", "u1").await.unwrap();
        owners.sort();
        assert_eq!(owners, vec!["p1", "p2"]);

        store.apply("Post", "p1", &op(&[], &["u1", "u2"]), None).await.unwrap();
        assert_eq!(memory.document_count("_Join:likers:Post"), 1);
        assert!(store.drop("Post", "likers").await.unwrap());
    }
}
