//! [`DocumentAdapter`]: the engine surface collaborators call.
//!
//! Every operation loads the class schema through the shared
//! [`SchemaCache`], compiles the caller's request, issues the native calls
//! and decodes the results. Errors leave through [`EngineError::sanitized`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::try_join_all;
use tessera_core::schema::is_internal_field;
use tessera_core::{
    ClassSchema, Constraint, Document, EngineError, EngineResult, FieldType, Filter, FindOptions, IndexDescriptor,
    Pointer, RequestContext, UpdateOperatorMap, Value,
};

use crate::codec::{
    decode_document, encode_document, generate_object_id, CREATED_AT_KEY, ID_KEY, READ_PERM_KEY, UPDATED_AT_KEY,
    WRITE_PERM_KEY,
};
use crate::compile::{acl_filter, compile_filter, compile_query, compile_update, CompilePolicy};
use crate::config::AdapterConfig;
use crate::connection::{escape_uri, is_multi_host};
use crate::events::EventLogger;
use crate::index::{IndexManager, IndexOutcome, IndexPurpose};
use crate::native::{NativeDocument, NativeFilter, NativeQuery, NativeValue};
use crate::relation::RelationStore;
use crate::resolver::{ObjectFetcher, ReferenceResolver};
use crate::schema_cache::{SchemaCache, SchemaChange, SchemaSource};
use crate::schema_store::SchemaStore;
use crate::store::eval::seed_from_filter;
use crate::store::StoreDriver;
use crate::transaction::{BatchExecutor, BatchOptions, PreparedWrite, WriteOp, WriteResult};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Decodes a stored document and drops what `ctx` may not read.
fn visible_document(native: &NativeDocument, schema: &ClassSchema, ctx: &RequestContext) -> EngineResult<Document> {
    Ok(strip_hidden(decode_document(native, schema)?, ctx))
}

fn strip_hidden(mut doc: Document, ctx: &RequestContext) -> Document {
    if !ctx.privileged {
        doc.fields
            .retain(|name, _| !is_internal_field(name) && !ctx.is_protected(name));
    }
    doc
}

/// A relation lookup a filter needs before it can compile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RelationLookup {
    /// Owners whose relation `field` contains `related_id`.
    Containing { field: String, related_id: String },
    /// Members of `owner.key`.
    Members { owner: Pointer, key: String },
}

fn relation_lookups(filter: &Filter, schema: &ClassSchema, out: &mut HashSet<RelationLookup>) {
    match filter {
        Filter::And(parts) | Filter::Or(parts) => {
            for part in parts {
                relation_lookups(part, schema, out);
            }
        }
        Filter::Field {
            field,
            constraint: Constraint::RelationContains(pointer),
        } if schema.field_type(field).is_some_and(FieldType::is_relation) => {
            out.insert(RelationLookup::Containing {
                field: field.clone(),
                related_id: pointer.object_id.clone(),
            });
        }
        Filter::RelatedTo { object, key } => {
            out.insert(RelationLookup::Members {
                owner: object.clone(),
                key: key.clone(),
            });
        }
        _ => {}
    }
}

/// Replaces resolved relation constraints with `objectId ∈ ids`.
fn substitute_relations(filter: Filter, found: &HashMap<RelationLookup, Vec<String>>) -> Filter {
    let by_ids = |lookup: RelationLookup, original: Filter| match found.get(&lookup) {
        Some(ids) => Filter::field(
            "objectId",
            Constraint::In(ids.iter().cloned().map(Value::String).collect()),
        ),
        None => original,
    };
    match filter {
        Filter::And(parts) => Filter::And(parts.into_iter().map(|f| substitute_relations(f, found)).collect()),
        Filter::Or(parts) => Filter::Or(parts.into_iter().map(|f| substitute_relations(f, found)).collect()),
        Filter::Field {
            field,
            constraint: Constraint::RelationContains(pointer),
        } => {
            let lookup = RelationLookup::Containing {
                field: field.clone(),
                related_id: pointer.object_id.clone(),
            };
            by_ids(
                lookup,
                Filter::Field {
                    field,
                    constraint: Constraint::RelationContains(pointer),
                },
            )
        }
        Filter::RelatedTo { object, key } => {
            let lookup = RelationLookup::Members {
                owner: object.clone(),
                key: key.clone(),
            };
            by_ids(lookup, Filter::RelatedTo { object, key })
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Include fetching
// ---------------------------------------------------------------------------

/// Fetches include targets on behalf of one caller.
struct StoreFetcher {
    driver: Arc<dyn StoreDriver>,
    cache: Arc<SchemaCache>,
    relations: RelationStore,
    ctx: RequestContext,
    max_time: Option<Duration>,
}

#[async_trait]
impl ObjectFetcher for StoreFetcher {
    async fn fetch_objects(&self, class_name: &str, ids: &[String]) -> EngineResult<Vec<Document>> {
        let schema = self.cache.get(class_name).await?;
        let query = NativeQuery {
            max_time: self.max_time,
            ..NativeQuery::new(NativeFilter::id_in(ids.iter().map(String::as_str)).and(acl_filter(READ_PERM_KEY, &self.ctx)))
        };
        self.driver
            .find(class_name, &query, None)
            .await?
            .iter()
            .map(|native| visible_document(native, &schema, &self.ctx))
            .collect()
    }

    async fn fetch_relation_links(
        &self,
        owner_class: &str,
        field: &str,
        owner_ids: &[String],
    ) -> EngineResult<BTreeMap<String, Vec<String>>> {
        self.relations.related_ids(owner_class, field, owner_ids).await
    }
}

// ---------------------------------------------------------------------------
// DocumentAdapter
// ---------------------------------------------------------------------------

pub struct DocumentAdapter {
    driver: Arc<dyn StoreDriver>,
    config: AdapterConfig,
    schemas: Arc<SchemaStore>,
    cache: Arc<SchemaCache>,
    indexes: IndexManager,
    relations: RelationStore,
    batches: BatchExecutor,
}

impl DocumentAdapter {
    /// Builds an adapter over `driver`. Configured store events are
    /// subscribed immediately.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the configuration does not validate.
    pub fn new(driver: Arc<dyn StoreDriver>, config: AdapterConfig) -> EngineResult<Self> {
        config.validate()?;
        let schemas = Arc::new(SchemaStore::new(Arc::clone(&driver)));
        let source: Arc<dyn SchemaSource> = schemas.clone();
        let cache = Arc::new(SchemaCache::new(source, Duration::from_millis(config.schema_cache_ttl_ms)));
        if !config.logged_events.is_empty() {
            driver.subscribe_events(Arc::new(EventLogger::new(&config.logged_events)));
        }
        Ok(Self {
            indexes: IndexManager::new(
                Arc::clone(&driver),
                Arc::clone(&schemas),
                Arc::clone(&cache),
                config.indexes.clone(),
            ),
            relations: RelationStore::new(Arc::clone(&driver)),
            batches: BatchExecutor::new(Arc::clone(&driver), config.transaction_retry_limit),
            driver,
            config,
            schemas,
            cache,
        })
    }

    /// The shared schema cache, for wiring change notices between instances.
    #[must_use]
    pub fn schema_cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    fn max_time(&self) -> Option<Duration> {
        self.config.max_time_ms.map(Duration::from_millis)
    }

    fn policy<'a>(&self, ctx: &'a RequestContext) -> CompilePolicy<'a> {
        CompilePolicy {
            ctx,
            allow_sandboxed: self.config.allow_sandboxed_expressions,
            max_time: self.max_time(),
        }
    }

    async fn guarded<T>(&self, fut: impl Future<Output = EngineResult<T>>) -> EngineResult<T> {
        fut.await.map_err(|e| e.sanitized(self.config.sanitize_errors))
    }

    fn resolver(&self, ctx: &RequestContext) -> ReferenceResolver {
        let fetcher = StoreFetcher {
            driver: Arc::clone(&self.driver),
            cache: Arc::clone(&self.cache),
            relations: self.relations.clone(),
            ctx: ctx.clone(),
            max_time: self.max_time(),
        };
        ReferenceResolver::new(Arc::new(fetcher), self.config.include_batch_size)
    }

    /// Reduces relation constraints to `objectId` sets, one join lookup each.
    async fn reduce_relations(&self, schema: &ClassSchema, filter: &Filter) -> EngineResult<Filter> {
        let mut lookups = HashSet::new();
        relation_lookups(filter, schema, &mut lookups);
        if lookups.is_empty() {
            return Ok(filter.clone());
        }
        let lookups: Vec<RelationLookup> = lookups.into_iter().collect();
        let found = try_join_all(lookups.iter().map(|lookup| async move {
            match lookup {
                RelationLookup::Containing { field, related_id } => {
                    self.relations
                        .owners_containing(&schema.class_name, field, related_id)
                        .await
                }
                RelationLookup::Members { owner, key } => Ok(self
                    .relations
                    .related_ids(&owner.class_name, key, std::slice::from_ref(&owner.object_id))
                    .await?
                    .remove(&owner.object_id)
                    .unwrap_or_default()),
            }
        }))
        .await?;
        let found: HashMap<RelationLookup, Vec<String>> = lookups.into_iter().zip(found).collect();
        Ok(substitute_relations(filter.clone(), &found))
    }

    /// Compiles a filter for a call without a collation slot, scoped by
    /// `perm_key`. Case-insensitive equality takes the regex form here.
    async fn scoped_filter(
        &self,
        schema: &ClassSchema,
        filter: &Filter,
        perm_key: &str,
        ctx: &RequestContext,
    ) -> EngineResult<NativeFilter> {
        let reduced = self.reduce_relations(schema, filter).await?;
        let mut plain = schema.clone();
        plain.indexes.clear();
        let compiled = compile_filter(&reduced, &plain, self.policy(ctx))?;
        Ok(compiled.filter.and(acl_filter(perm_key, ctx)))
    }

    // -- connection ---------------------------------------------------------

    /// Connects with the credential-escaped database URI.
    ///
    /// # Errors
    ///
    /// The driver's connection error.
    pub async fn connect(&self) -> EngineResult<()> {
        let uri = escape_uri(&self.config.database_uri);
        self.guarded(self.driver.connect(&uri)).await?;
        tracing::info!(multi_host = is_multi_host(&uri), "store connected");
        Ok(())
    }

    /// # Errors
    ///
    /// The driver's error.
    pub async fn close(&self) -> EngineResult<()> {
        self.guarded(self.driver.close()).await
    }

    // -- schema -------------------------------------------------------------

    /// # Errors
    ///
    /// `Duplicate` when the class exists.
    pub async fn create_class(&self, schema: ClassSchema) -> EngineResult<ClassSchema> {
        self.guarded(async {
            self.schemas.create_class(&schema).await?;
            self.cache.publish(SchemaChange::Class(schema.class_name.clone()));
            tracing::info!(class = %schema.class_name, "class created");
            Ok(schema)
        })
        .await
    }

    /// Declares a field; redeclaring with the same type is a no-op.
    ///
    /// # Errors
    ///
    /// `ClassNotFound`, `InvalidKeyName` or `TypeMismatch`.
    pub async fn add_field(&self, class_name: &str, name: &str, ty: FieldType) -> EngineResult<ClassSchema> {
        self.guarded(async {
            let schema = self.schemas.add_field(class_name, name, ty).await?;
            self.cache.publish(SchemaChange::Class(class_name.to_string()));
            Ok(schema)
        })
        .await
    }

    /// # Errors
    ///
    /// `ClassNotFound` for unknown classes.
    pub async fn get_class(&self, class_name: &str) -> EngineResult<Arc<ClassSchema>> {
        self.guarded(self.cache.get(class_name)).await
    }

    /// # Errors
    ///
    /// Store errors.
    pub async fn get_all_classes(&self) -> EngineResult<Vec<ClassSchema>> {
        self.guarded(self.schemas.load_all()).await
    }

    /// Drops an empty class, its relation join collections and its schema.
    ///
    /// # Errors
    ///
    /// `ClassNotFound`, or `SchemaViolation` when the class still has objects.
    pub async fn delete_class(&self, class_name: &str) -> EngineResult<bool> {
        self.guarded(async {
            let schema = self.cache.get(class_name).await?;
            let objects = self.driver.count(class_name, &NativeFilter::All, None, None).await?;
            if objects > 0 {
                return Err(EngineError::SchemaViolation(format!(
                    "Class {class_name} is not empty, contains {objects} objects, cannot drop schema."
                )));
            }
            let relation_fields: Vec<String> = schema.relation_fields().map(|(name, _)| name.to_string()).collect();
            for field in &relation_fields {
                self.relations.drop(class_name, field).await?;
            }
            self.driver.drop_collection(class_name).await?;
            let existed = self.schemas.delete_class(class_name).await?;
            self.cache.publish(SchemaChange::Class(class_name.to_string()));
            Ok(existed)
        })
        .await
    }

    // -- reads --------------------------------------------------------------

    /// Runs a find and expands `options.include`.
    ///
    /// # Errors
    ///
    /// Compiler errors before any object is read, `OperationExceededTimeLimit`
    /// past the time bound, and store or include fetch errors.
    pub async fn find(
        &self,
        class_name: &str,
        filter: &Filter,
        options: &FindOptions,
        ctx: &RequestContext,
    ) -> EngineResult<Vec<Document>> {
        self.guarded(async {
            let schema = self.cache.get(class_name).await?;
            let filter = self.reduce_relations(&schema, filter).await?;
            let query = compile_query(&filter, options, &schema, self.policy(ctx))?;
            let results = self
                .driver
                .find(class_name, &query, None)
                .await?
                .iter()
                .map(|native| visible_document(native, &schema, ctx))
                .collect::<EngineResult<Vec<_>>>()?;
            if options.include.is_empty() {
                return Ok(results);
            }
            self.resolver(ctx).resolve(results, &options.include).await
        })
        .await
    }

    /// # Errors
    ///
    /// As [`Self::find`].
    pub async fn count(&self, class_name: &str, filter: &Filter, ctx: &RequestContext) -> EngineResult<u64> {
        self.guarded(async {
            let schema = self.cache.get(class_name).await?;
            let filter = self.scoped_filter(&schema, filter, READ_PERM_KEY, ctx).await?;
            self.driver.count(class_name, &filter, self.max_time(), None).await
        })
        .await
    }

    /// Expands include paths over already-fetched results.
    ///
    /// # Errors
    ///
    /// `InvalidQuery` for malformed paths, or the first fetch error.
    pub async fn resolve_includes(
        &self,
        results: Vec<Document>,
        paths: &[String],
        ctx: &RequestContext,
    ) -> EngineResult<Vec<Document>> {
        self.guarded(self.resolver(ctx).resolve(results, paths)).await
    }

    // -- writes -------------------------------------------------------------

    async fn prepare_create(
        &self,
        class_name: &str,
        mut document: Document,
        ctx: &RequestContext,
    ) -> EngineResult<(PreparedWrite, Document)> {
        let schema = self.cache.get(class_name).await?;
        if !ctx.privileged {
            if let Some(name) = document.fields.keys().find(|name| is_internal_field(name)) {
                return Err(EngineError::InvalidKeyName(name.clone()));
            }
        }
        document.class_name = class_name.to_string();
        if document.object_id.is_empty() {
            document.object_id = generate_object_id();
        }
        let now = Utc::now();
        document.created_at = document.created_at.or(Some(now));
        document.updated_at = document.updated_at.or(Some(now));
        let native = encode_document(&document, &schema)?;
        let write = PreparedWrite::Insert {
            collection: class_name.to_string(),
            document: native,
        };
        Ok((write, document))
    }

    async fn prepare_update(
        &self,
        class_name: &str,
        filter: NativeFilter,
        ops: &UpdateOperatorMap,
        many: bool,
        ctx: &RequestContext,
    ) -> EngineResult<PreparedWrite> {
        let schema = self.cache.get(class_name).await?;
        let mut update = compile_update(ops, &schema, ctx)?;
        update
            .native
            .set
            .insert(UPDATED_AT_KEY.to_string(), NativeValue::DateTime(Utc::now()));
        Ok(PreparedWrite::Update {
            collection: class_name.to_string(),
            filter,
            update,
            many,
        })
    }

    async fn prepare_upsert(
        &self,
        class_name: &str,
        filter: &Filter,
        ops: &UpdateOperatorMap,
        ctx: &RequestContext,
    ) -> EngineResult<PreparedWrite> {
        let schema = self.cache.get(class_name).await?;
        let update = compile_update(ops, &schema, ctx)?;
        if !update.relation_ops.is_empty() {
            return Err(EngineError::InvalidQuery(
                "relation operations cannot be part of an upsert".into(),
            ));
        }
        let filter = self.scoped_filter(&schema, filter, WRITE_PERM_KEY, ctx).await?;
        let mut native = update.native;
        let now = NativeValue::DateTime(Utc::now());
        native.set.insert(UPDATED_AT_KEY.to_string(), now.clone());
        native.set_on_insert.insert(CREATED_AT_KEY.to_string(), now);
        if !seed_from_filter(&filter).contains_key(ID_KEY) {
            native
                .set_on_insert
                .insert(ID_KEY.to_string(), NativeValue::String(generate_object_id()));
        }
        Ok(PreparedWrite::Upsert {
            collection: class_name.to_string(),
            filter,
            update: native,
        })
    }

    async fn prepare(&self, write: &WriteOp, ctx: &RequestContext) -> EngineResult<PreparedWrite> {
        match write {
            WriteOp::Create { class_name, document } => self
                .prepare_create(class_name, document.clone(), ctx)
                .await
                .map(|(write, _)| write),
            WriteOp::Update {
                class_name,
                object_id,
                ops,
            } => {
                let filter = NativeFilter::id(object_id).and(acl_filter(WRITE_PERM_KEY, ctx));
                self.prepare_update(class_name, filter, ops, false, ctx).await
            }
            WriteOp::UpdateMany { class_name, filter, ops } => {
                let schema = self.cache.get(class_name).await?;
                let filter = self.scoped_filter(&schema, filter, WRITE_PERM_KEY, ctx).await?;
                self.prepare_update(class_name, filter, ops, true, ctx).await
            }
            WriteOp::Upsert { class_name, filter, ops } => self.prepare_upsert(class_name, filter, ops, ctx).await,
            WriteOp::Delete { class_name, filter } => {
                let schema = self.cache.get(class_name).await?;
                Ok(PreparedWrite::Delete {
                    collection: class_name.clone(),
                    filter: self.scoped_filter(&schema, filter, WRITE_PERM_KEY, ctx).await?,
                    relation_fields: schema.relation_fields().map(|(field, _)| field.to_string()).collect(),
                })
            }
        }
    }

    /// Inserts a new object. `objectId`, `createdAt` and `updatedAt` are
    /// assigned when absent.
    ///
    /// # Errors
    ///
    /// Codec and schema errors, `Duplicate` on unique-index violations.
    pub async fn create_object(
        &self,
        class_name: &str,
        document: Document,
        ctx: &RequestContext,
    ) -> EngineResult<Document> {
        self.guarded(async {
            let (write, document) = self.prepare_create(class_name, document, ctx).await?;
            write.run(&self.driver, None).await?;
            Ok(strip_hidden(document, ctx))
        })
        .await
    }

    /// Updates one object and returns it after the update.
    ///
    /// # Errors
    ///
    /// `ObjectNotFound` when the object does not exist or `ctx` may not
    /// write it, plus compiler and store errors.
    pub async fn update_object(
        &self,
        class_name: &str,
        object_id: &str,
        ops: &UpdateOperatorMap,
        ctx: &RequestContext,
    ) -> EngineResult<Document> {
        self.guarded(async {
            let write = self
                .prepare(
                    &WriteOp::Update {
                        class_name: class_name.to_string(),
                        object_id: object_id.to_string(),
                        ops: ops.clone(),
                    },
                    ctx,
                )
                .await?;
            let WriteResult::Updated {
                document: Some(native), ..
            } = write.run(&self.driver, None).await?
            else {
                return Err(EngineError::ObjectNotFound);
            };
            let schema = self.cache.get(class_name).await?;
            visible_document(&native, &schema, ctx)
        })
        .await
    }

    /// Updates every object matching `filter`; returns the number matched.
    ///
    /// # Errors
    ///
    /// Compiler and store errors.
    pub async fn update_objects_by_query(
        &self,
        class_name: &str,
        filter: &Filter,
        ops: &UpdateOperatorMap,
        ctx: &RequestContext,
    ) -> EngineResult<u64> {
        self.guarded(async {
            let write = self
                .prepare(
                    &WriteOp::UpdateMany {
                        class_name: class_name.to_string(),
                        filter: filter.clone(),
                        ops: ops.clone(),
                    },
                    ctx,
                )
                .await?;
            match write.run(&self.driver, None).await? {
                WriteResult::Updated { matched, .. } => Ok(matched),
                _ => Ok(0),
            }
        })
        .await
    }

    /// Updates the first match or inserts one seeded from the filter's
    /// equalities. `SetOnInsert` applies only on the insert branch.
    ///
    /// # Errors
    ///
    /// Compiler and store errors; `InvalidQuery` for relation operations.
    pub async fn upsert(
        &self,
        class_name: &str,
        filter: &Filter,
        ops: &UpdateOperatorMap,
        ctx: &RequestContext,
    ) -> EngineResult<Document> {
        self.guarded(async {
            let write = self.prepare_upsert(class_name, filter, ops, ctx).await?;
            let WriteResult::Upserted { document, .. } = write.run(&self.driver, None).await? else {
                return Err(EngineError::ObjectNotFound);
            };
            let schema = self.cache.get(class_name).await?;
            visible_document(&document, &schema, ctx)
        })
        .await
    }

    /// Deletes every object matching `filter`.
    ///
    /// # Errors
    ///
    /// `ObjectNotFound` when nothing was deleted.
    pub async fn delete_objects_by_query(
        &self,
        class_name: &str,
        filter: &Filter,
        ctx: &RequestContext,
    ) -> EngineResult<u64> {
        self.guarded(async {
            let write = self
                .prepare(
                    &WriteOp::Delete {
                        class_name: class_name.to_string(),
                        filter: filter.clone(),
                    },
                    ctx,
                )
                .await?;
            match write.run(&self.driver, None).await? {
                WriteResult::Deleted { deleted } if deleted > 0 => Ok(deleted),
                _ => Err(EngineError::ObjectNotFound),
            }
        })
        .await
    }

    /// Executes a batch of writes.
    ///
    /// Every write is compiled first. In transactional mode a compile error
    /// fails the batch before a session is opened; in independent mode it
    /// fails only its own write.
    ///
    /// # Errors
    ///
    /// Transactional mode only: the error that rolled the batch back.
    pub async fn execute_batch(
        &self,
        writes: &[WriteOp],
        options: BatchOptions,
        ctx: &RequestContext,
    ) -> EngineResult<Vec<EngineResult<WriteResult>>> {
        let sanitize = self.config.sanitize_errors;
        self.guarded(async {
            let mut prepared = Vec::with_capacity(writes.len());
            for write in writes {
                prepared.push(self.prepare(write, ctx).await);
            }
            let results = if options.use_transaction {
                let ready = prepared.into_iter().collect::<EngineResult<Vec<_>>>()?;
                self.batches.execute(&ready, options).await?
            } else {
                let ready: Vec<PreparedWrite> = prepared.iter().filter_map(|p| p.as_ref().ok().cloned()).collect();
                let mut executed = self.batches.execute(&ready, options).await?.into_iter();
                prepared
                    .into_iter()
                    .map(|p| {
                        p.and_then(|_| {
                            executed.next().unwrap_or_else(|| {
                                Err(EngineError::Store {
                                    code: 1,
                                    message: "batch result missing".into(),
                                })
                            })
                        })
                    })
                    .collect()
            };
            Ok(results.into_iter().map(|r| r.map_err(|e| e.sanitized(sanitize))).collect())
        })
        .await
    }

    // -- indexes ------------------------------------------------------------

    /// # Errors
    ///
    /// See [`IndexManager::ensure_index`].
    pub async fn ensure_index(&self, class_name: &str, descriptor: &IndexDescriptor) -> EngineResult<IndexOutcome> {
        self.guarded(self.indexes.ensure_index(class_name, descriptor)).await
    }

    /// # Errors
    ///
    /// See [`IndexManager::drop_index`].
    pub async fn drop_index(&self, class_name: &str, name: &str) -> EngineResult<bool> {
        self.guarded(self.indexes.drop_index(class_name, name)).await
    }

    /// # Errors
    ///
    /// See [`IndexManager::ensure_default_indexes`].
    pub async fn ensure_default_indexes(&self) -> EngineResult<Vec<(IndexPurpose, IndexOutcome)>> {
        self.guarded(self.indexes.ensure_default_indexes()).await
    }

    /// # Errors
    ///
    /// See [`IndexManager::delete_fields`].
    pub async fn delete_fields(&self, class_name: &str, field_names: &[String]) -> EngineResult<ClassSchema> {
        self.guarded(self.indexes.delete_fields(class_name, field_names)).await
    }
}
