//! Reference Resolver: breadth-first include expansion.
//!
//! Include paths are grouped into an [`IncludeTree`]. Each depth level is
//! resolved as one unit:
//!
//! 1. relation edges look up their join links (concurrently);
//! 2. every referenced `(class, objectId)` at the level is deduplicated and
//!    fetched with one `objectId ∈ {...}` query per class (chunked by the
//!    batch size), all classes concurrently;
//! 3. the level completes before the next one starts.
//!
//! Fetched objects are then spliced bottom-up, deepest level first, so every
//! object is fully expanded before it is copied into its parents. A missing
//! target becomes `Null`; a `Null` reference stays `Null` in place. Any fetch
//! error aborts the whole resolution.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use tessera_core::{Document, EngineResult, IncludeEdge, IncludeTree, Pointer, Value};
use tracing::{info_span, Instrument};

use crate::codec::pointer_key;

/// Batched object access used by the resolver.
///
/// Used as `Arc<dyn ObjectFetcher>`.
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    /// Objects of `class_name` with the given ids. Ids that no longer exist
    /// are simply absent from the result.
    async fn fetch_objects(&self, class_name: &str, ids: &[String]) -> EngineResult<Vec<Document>>;

    /// Related object ids of relation `field`, per owner id.
    async fn fetch_relation_links(
        &self,
        owner_class: &str,
        field: &str,
        owner_ids: &[String],
    ) -> EngineResult<BTreeMap<String, Vec<String>>>;
}

/// Objects reached through one include path, keyed by pointer key.
type Reached = HashMap<String, Document>;

/// Relation links of one include path: owner pointer key to related pointers.
type Links = HashMap<String, Vec<Pointer>>;

/// References one edge makes from its parents.
struct EdgeTargets {
    edge: IncludeEdge,
    targets: BTreeSet<(String, String)>,
    links: Links,
}

fn collect_pointers(value: &Value, out: &mut BTreeSet<(String, String)>) {
    match value {
        Value::Pointer(p) => {
            out.insert((p.class_name.clone(), p.object_id.clone()));
        }
        Value::Array(items) => {
            for item in items {
                if let Value::Pointer(p) = item {
                    out.insert((p.class_name.clone(), p.object_id.clone()));
                }
            }
        }
        _ => {}
    }
}

fn splice(value: &mut Value, reached: &Reached, links: Option<&Vec<Pointer>>) {
    let lookup = |p: &Pointer| {
        reached
            .get(&pointer_key(p))
            .map_or(Value::Null, |doc| Value::Included(Box::new(doc.clone())))
    };
    match value {
        Value::Pointer(p) => *value = lookup(p),
        Value::Array(items) => {
            for item in items.iter_mut() {
                if let Value::Pointer(p) = item {
                    *item = lookup(p);
                }
            }
        }
        Value::Relation { .. } => {
            let included = links
                .map(|pointers| {
                    pointers
                        .iter()
                        .filter_map(|p| reached.get(&pointer_key(p)))
                        .map(|doc| Value::Included(Box::new(doc.clone())))
                        .collect()
                })
                .unwrap_or_default();
            *value = Value::Array(included);
        }
        _ => {}
    }
}

pub struct ReferenceResolver {
    fetcher: Arc<dyn ObjectFetcher>,
    batch_size: usize,
}

impl ReferenceResolver {
    /// `batch_size` caps the ids in one fetch; `0` is treated as `1`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn ObjectFetcher>, batch_size: usize) -> Self {
        Self {
            fetcher,
            batch_size: batch_size.max(1),
        }
    }

    /// Expands `paths` over `results`.
    ///
    /// # Errors
    ///
    /// `InvalidQuery` for malformed paths, or the first fetch error.
    pub async fn resolve(&self, mut results: Vec<Document>, paths: &[String]) -> EngineResult<Vec<Document>> {
        let tree = IncludeTree::from_paths(paths)?;
        if tree.is_empty() || results.is_empty() {
            return Ok(results);
        }
        let levels = tree.levels();
        let mut reached: HashMap<String, Reached> = HashMap::new();
        let mut links: HashMap<String, Links> = HashMap::new();

        for (depth, level) in levels.iter().enumerate() {
            let span = info_span!("include_depth", depth, edges = level.len());
            let resolved = self
                .resolve_level(&results, &reached, level)
                .instrument(span)
                .await?;
            for (path, objects, edge_links) in resolved {
                reached.insert(path.clone(), objects);
                links.insert(path, edge_links);
            }
        }

        for level in levels.iter().rev() {
            for edge in level {
                let objects = reached.remove(&edge.path).unwrap_or_default();
                let edge_links = links.remove(&edge.path).unwrap_or_default();
                let splice_into = |doc: &mut Document| {
                    let owner = pointer_key(&doc.to_pointer());
                    if let Some(value) = doc.fields.get_mut(&edge.key) {
                        splice(value, &objects, edge_links.get(&owner));
                    }
                };
                match &edge.parent {
                    None => results.iter_mut().for_each(splice_into),
                    Some(parent) => {
                        if let Some(parents) = reached.get_mut(parent) {
                            parents.values_mut().for_each(splice_into);
                        }
                    }
                }
            }
        }
        Ok(results)
    }

    async fn edge_targets(&self, edge: &IncludeEdge, parents: Vec<&Document>) -> EngineResult<EdgeTargets> {
        let mut targets = BTreeSet::new();
        let mut relation_owners: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
        for doc in &parents {
            match doc.fields.get(&edge.key) {
                Some(Value::Relation { class_name }) => relation_owners
                    .entry((doc.class_name.clone(), class_name.clone()))
                    .or_default()
                    .push(doc.object_id.clone()),
                Some(value) => collect_pointers(value, &mut targets),
                None => {}
            }
        }
        let mut links = Links::new();
        for ((owner_class, target_class), owner_ids) in relation_owners {
            let by_owner = self
                .fetcher
                .fetch_relation_links(&owner_class, &edge.key, &owner_ids)
                .await?;
            for (owner_id, related) in by_owner {
                let pointers: Vec<Pointer> = related
                    .into_iter()
                    .map(|id| Pointer::new(target_class.clone(), id))
                    .collect();
                targets.extend(pointers.iter().map(|p| (p.class_name.clone(), p.object_id.clone())));
                links.insert(pointer_key(&Pointer::new(owner_class.clone(), owner_id)), pointers);
            }
        }
        Ok(EdgeTargets {
            edge: edge.clone(),
            targets,
            links,
        })
    }

    async fn fetch_batch(&self, class_name: &str, ids: &[String]) -> EngineResult<Vec<Document>> {
        tracing::debug!(class = class_name, ids = ids.len(), "fetching include batch");
        self.fetcher.fetch_objects(class_name, ids).await
    }

    async fn resolve_level(
        &self,
        results: &[Document],
        reached: &HashMap<String, Reached>,
        level: &[IncludeEdge],
    ) -> EngineResult<Vec<(String, Reached, Links)>> {
        let per_edge = try_join_all(level.iter().map(|edge| {
            let parents: Vec<&Document> = match &edge.parent {
                None => results.iter().collect(),
                Some(parent) => reached.get(parent).map(|m| m.values().collect()).unwrap_or_default(),
            };
            self.edge_targets(edge, parents)
        }))
        .await?;

        let mut by_class: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for edge in &per_edge {
            for (class_name, id) in &edge.targets {
                by_class.entry(class_name.as_str()).or_default().insert(id.as_str());
            }
        }
        let batches: Vec<(&str, Vec<String>)> = by_class
            .iter()
            .flat_map(|(class_name, ids)| {
                let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
                ids.chunks(self.batch_size)
                    .map(|chunk| (*class_name, chunk.to_vec()))
                    .collect::<Vec<_>>()
            })
            .collect();
        let fetched = try_join_all(
            batches
                .iter()
                .map(|(class_name, ids)| self.fetch_batch(class_name, ids)),
        )
        .await?;

        let mut pool: HashMap<String, Document> = HashMap::new();
        for doc in fetched.into_iter().flatten() {
            pool.insert(pointer_key(&doc.to_pointer()), doc);
        }
        Ok(per_edge
            .into_iter()
            .map(|EdgeTargets { edge, targets, links }| {
                let objects = targets
                    .iter()
                    .filter_map(|(class_name, id)| {
                        let key = pointer_key(&Pointer::new(class_name.clone(), id.clone()));
                        pool.get(&key).map(|doc| (key, doc.clone()))
                    })
                    .collect();
                (edge.path, objects, links)
            })
            .collect())
    }
}
