//! Index Manager: secondary indexes, default indexes per purpose, and index
//! cleanup when schema fields are deleted.

use std::collections::BTreeSet;
use std::sync::Arc;

use tessera_core::schema::is_internal_field;
use tessera_core::{ClassSchema, EngineError, EngineResult, IndexDescriptor};

use crate::codec::native_field_name;
use crate::config::IndexCreationConfig;
use crate::native::{Collation, NativeFilter, NativeIndex, NativeUpdate};
use crate::relation::RelationStore;
use crate::schema_cache::{SchemaCache, SchemaChange};
use crate::schema_store::SchemaStore;
use crate::store::StoreDriver;

/// What `ensure_index` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Created,
    /// An index with the same name and definition already existed.
    Unchanged,
}

/// Default indexes, each independently toggleable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexPurpose {
    Username,
    UsernameCaseInsensitive,
    Email,
    EmailCaseInsensitive,
    EmailVerifyToken,
    PasswordResetToken,
    RoleName,
}

impl IndexPurpose {
    pub const ALL: [Self; 7] = [
        Self::Username,
        Self::UsernameCaseInsensitive,
        Self::Email,
        Self::EmailCaseInsensitive,
        Self::EmailVerifyToken,
        Self::PasswordResetToken,
        Self::RoleName,
    ];

    #[must_use]
    pub fn class_name(self) -> &'static str {
        match self {
            Self::RoleName => "_Role",
            _ => "_User",
        }
    }

    #[must_use]
    pub fn descriptor(self) -> IndexDescriptor {
        match self {
            Self::Username => IndexDescriptor::single("username").unique(),
            Self::UsernameCaseInsensitive => IndexDescriptor::single("username").case_insensitive(),
            Self::Email => IndexDescriptor::single("email").unique(),
            Self::EmailCaseInsensitive => IndexDescriptor::single("email").case_insensitive(),
            Self::EmailVerifyToken => IndexDescriptor::single("_email_verify_token"),
            Self::PasswordResetToken => IndexDescriptor::single("_perishable_token"),
            Self::RoleName => IndexDescriptor::single("name").unique(),
        }
    }

    #[must_use]
    pub fn enabled(self, config: &IndexCreationConfig) -> bool {
        match self {
            Self::Username => config.create_index_user_username,
            Self::UsernameCaseInsensitive => config.create_index_user_username_case_insensitive,
            Self::Email => config.create_index_user_email,
            Self::EmailCaseInsensitive => config.create_index_user_email_case_insensitive,
            Self::EmailVerifyToken => config.create_index_user_email_verify_token,
            Self::PasswordResetToken => config.create_index_user_password_reset_token,
            Self::RoleName => config.create_index_role_name,
        }
    }
}

/// Native definition of `descriptor` on `schema`. Unique indexes are sparse
/// so documents without the field do not collide.
#[must_use]
pub fn native_index(descriptor: &IndexDescriptor, schema: &ClassSchema) -> NativeIndex {
    NativeIndex {
        name: descriptor.name.clone(),
        keys: descriptor
            .fields
            .iter()
            .map(|(field, dir)| (native_field_name(field, schema), *dir))
            .collect(),
        unique: descriptor.unique,
        sparse: descriptor.unique,
        collation: descriptor.case_insensitive.then(Collation::case_insensitive),
    }
}

pub struct IndexManager {
    driver: Arc<dyn StoreDriver>,
    schemas: Arc<SchemaStore>,
    cache: Arc<SchemaCache>,
    relations: RelationStore,
    config: IndexCreationConfig,
}

impl IndexManager {
    #[must_use]
    pub fn new(
        driver: Arc<dyn StoreDriver>,
        schemas: Arc<SchemaStore>,
        cache: Arc<SchemaCache>,
        config: IndexCreationConfig,
    ) -> Self {
        Self {
            relations: RelationStore::new(Arc::clone(&driver)),
            driver,
            schemas,
            cache,
            config,
        }
    }

    /// Creates `descriptor` on `class_name` and records it in the schema.
    ///
    /// # Errors
    ///
    /// - `ClassNotFound` for unknown classes.
    /// - `SchemaViolation` when an indexed field is not declared.
    /// - `Duplicate` when a same-named index has another definition, or a
    ///   unique index meets duplicate data.
    pub async fn ensure_index(&self, class_name: &str, descriptor: &IndexDescriptor) -> EngineResult<IndexOutcome> {
        let schema = self.cache.get(class_name).await?;
        if descriptor.fields.is_empty() {
            return Err(EngineError::InvalidQuery(format!("index {} has no fields", descriptor.name)));
        }
        for (field, _) in &descriptor.fields {
            if !schema.has_field(field) && !is_internal_field(field) {
                return Err(EngineError::SchemaViolation(format!(
                    "cannot index undeclared field {field} of {class_name}"
                )));
            }
            if schema.field_type(field).is_some_and(tessera_core::FieldType::is_relation) {
                return Err(EngineError::SchemaViolation(format!(
                    "cannot index relation field {field} of {class_name}"
                )));
            }
        }
        let native = native_index(descriptor, &schema);
        let existing = self.driver.list_indexes(class_name).await?;
        if let Some(current) = existing.iter().find(|idx| idx.name == native.name) {
            if current.same_definition(&native) {
                tracing::debug!(class = class_name, index = %native.name, "index already present");
                return Ok(IndexOutcome::Unchanged);
            }
            return Err(EngineError::Duplicate(format!(
                "index {} already exists on {class_name} with a different definition",
                native.name
            )));
        }
        self.driver.create_index(class_name, &native).await?;
        self.schemas.record_index(class_name, descriptor).await?;
        self.cache.publish(SchemaChange::Class(class_name.to_string()));
        tracing::info!(class = class_name, index = %native.name, unique = native.unique, "index created");
        Ok(IndexOutcome::Created)
    }

    /// Drops a named index. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Store errors other than a missing index.
    pub async fn drop_index(&self, class_name: &str, name: &str) -> EngineResult<bool> {
        let existed = self
            .driver
            .list_indexes(class_name)
            .await?
            .iter()
            .any(|idx| idx.name == name);
        if existed {
            self.driver.drop_index(class_name, name).await?;
        }
        self.schemas.forget_index(class_name, name).await?;
        self.cache.publish(SchemaChange::Class(class_name.to_string()));
        Ok(existed)
    }

    /// Deletes fields from the schema and every stored document, dropping
    /// each index that covers only deleted fields. Relation fields lose
    /// their join collection.
    ///
    /// # Errors
    ///
    /// - `ClassNotFound` for unknown classes.
    /// - `SchemaViolation` for default or undeclared fields.
    pub async fn delete_fields(&self, class_name: &str, field_names: &[String]) -> EngineResult<ClassSchema> {
        let schema = self
            .schemas
            .load(class_name)
            .await?
            .ok_or_else(|| EngineError::ClassNotFound(class_name.to_string()))?;
        let mut native_names = BTreeSet::new();
        for name in field_names {
            let Some(ty) = schema.field_type(name) else {
                return Err(EngineError::SchemaViolation(format!(
                    "field {name} does not exist on {class_name}, cannot delete"
                )));
            };
            if !ty.is_relation() {
                native_names.insert(native_field_name(name, &schema));
            }
        }
        let updated = self.schemas.remove_fields(class_name, field_names).await?;

        for index in self.driver.list_indexes(class_name).await? {
            if index.keys.iter().all(|(path, _)| {
                let root = path.split('.').next().unwrap_or(path);
                native_names.contains(root)
            }) {
                self.driver.drop_index(class_name, &index.name).await?;
                tracing::info!(class = class_name, index = %index.name, "dropped index of deleted field");
            }
        }
        for (name, descriptor) in &schema.indexes {
            if descriptor
                .fields
                .iter()
                .all(|(f, _)| field_names.iter().any(|deleted| deleted == f))
            {
                self.schemas.forget_index(class_name, name).await?;
            }
        }

        for name in field_names {
            if schema.field_type(name).is_some_and(tessera_core::FieldType::is_relation) {
                self.relations.drop(class_name, name).await?;
            }
        }
        if !native_names.is_empty() {
            let update = NativeUpdate {
                unset: native_names,
                ..NativeUpdate::default()
            };
            self.driver
                .update_many(class_name, &NativeFilter::All, &update, None)
                .await?;
        }
        self.cache.publish(SchemaChange::Class(class_name.to_string()));
        Ok(self.schemas.load(class_name).await?.unwrap_or(updated))
    }

    /// Creates every default index enabled in the configuration, creating
    /// the owning system class first when needed.
    ///
    /// # Errors
    ///
    /// The first index creation error.
    pub async fn ensure_default_indexes(&self) -> EngineResult<Vec<(IndexPurpose, IndexOutcome)>> {
        let mut out = Vec::new();
        for purpose in IndexPurpose::ALL {
            if !purpose.enabled(&self.config) {
                tracing::debug!(?purpose, "default index disabled");
                continue;
            }
            let class_name = purpose.class_name();
            if self.schemas.load(class_name).await?.is_none() {
                match self.schemas.create_class(&ClassSchema::new(class_name)?).await {
                    Ok(()) | Err(EngineError::Duplicate(_)) => {}
                    Err(e) => return Err(e),
                }
                self.cache.publish(SchemaChange::Class(class_name.to_string()));
            }
            let outcome = self.ensure_index(class_name, &purpose.descriptor()).await?;
            out.push((purpose, outcome));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tessera_core::FieldType;

    use super::*;
    use crate::native::{NativeDocument, NativeValue};
    use crate::store::MemoryStore;

    struct Fixture {
        memory: Arc<MemoryStore>,
        schemas: Arc<SchemaStore>,
        manager: IndexManager,
    }

    fn fixture(config: IndexCreationConfig) -> Fixture {
        let memory = Arc::new(MemoryStore::new());
        let driver: Arc<dyn StoreDriver> = memory.clone();
        let schemas = Arc::new(SchemaStore::new(Arc::clone(&driver)));
        let cache = Arc::new(SchemaCache::new(schemas.clone(), Duration::from_secs(60)));
        let manager = IndexManager::new(driver, schemas.clone(), cache, config);
        Fixture {
            memory,
            schemas,
            manager,
        }
    }

    async fn post_class(f: &Fixture) {
        let schema = ClassSchema::with_fields(
            "Post",
            [("title", FieldType::String), ("score", FieldType::Number)],
        )
        .unwrap();
        f.schemas.create_class(&schema).await.unwrap();
    }

    #[tokio::test]
    async fn ensure_index_is_idempotent() {
        let f = fixture(IndexCreationConfig::default());
        post_class(&f).await;
        let idx = IndexDescriptor::single("title");
        assert_eq!(f.manager.ensure_index("Post", &idx).await.unwrap(), IndexOutcome::Created);
        assert_eq!(f.manager.ensure_index("Post", &idx).await.unwrap(), IndexOutcome::Unchanged);
        let changed = idx.clone().unique();
        assert!(matches!(
            f.manager.ensure_index("Post", &changed).await,
            Err(EngineError::Duplicate(_))
        ));
        assert!(f.schemas.load("Post").await.unwrap().unwrap().indexes.contains_key("title_1"));
    }

    #[tokio::test]
    async fn case_insensitive_index_has_collation() {
        let f = fixture(IndexCreationConfig::default());
        post_class(&f).await;
        let idx = IndexDescriptor::single("title").case_insensitive();
        f.manager.ensure_index("Post", &idx).await.unwrap();
        let native = f.memory.list_indexes("Post").await.unwrap();
        assert_eq!(native[0].name, "case_insensitive_title");
        assert_eq!(native[0].collation, Some(Collation::case_insensitive()));
    }

    #[tokio::test]
    async fn undeclared_fields_cannot_be_indexed() {
        let f = fixture(IndexCreationConfig::default());
        post_class(&f).await;
        let err = f
            .manager
            .ensure_index("Post", &IndexDescriptor::single("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SchemaViolation(_)));
    }

    #[tokio::test]
    async fn delete_fields_drops_sole_covering_index() {
        let f = fixture(IndexCreationConfig::default());
        post_class(&f).await;
        f.manager.ensure_index("Post", &IndexDescriptor::single("title")).await.unwrap();
        let compound = IndexDescriptor {
            name: "title_1_score_1".to_string(),
            fields: vec![("title".to_string(), 1), ("score".to_string(), 1)],
            unique: false,
            case_insensitive: false,
        };
        f.manager.ensure_index("Post", &compound).await.unwrap();
        let mut doc = NativeDocument::new();
        doc.insert("_id".to_string(), NativeValue::str("p1"));
        doc.insert("title".to_string(), NativeValue::str("hello"));
        f.memory.insert_one("Post", doc, None).await.unwrap();

        let updated = f.manager.delete_fields("Post", &["title".to_string()]).await.unwrap();
        assert!(!updated.has_field("title"));
        assert!(!updated.indexes.contains_key("title_1"));

        let names: Vec<_> = f
            .memory
            .list_indexes("Post")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["title_1_score_1"]);
        let stored = f.memory.raw_document("Post", "p1").unwrap();
        assert!(!stored.contains_key("title"));
        let reread = f.schemas.load("Post").await.unwrap().unwrap();
        assert!(!reread.has_field("title"));
    }

    #[tokio::test]
    async fn delete_unknown_field_fails() {
        let f = fixture(IndexCreationConfig::default());
        post_class(&f).await;
        assert!(matches!(
            f.manager.delete_fields("Post", &["nope".to_string()]).await,
            Err(EngineError::SchemaViolation(_))
        ));
    }

    #[tokio::test]
    async fn default_indexes_follow_config() {
        let f = fixture(IndexCreationConfig {
            create_index_user_email_verify_token: false,
            create_index_role_name: false,
            ..IndexCreationConfig::default()
        });
        let created = f.manager.ensure_default_indexes().await.unwrap();
        let purposes: Vec<_> = created.iter().map(|(p, _)| *p).collect();
        assert_eq!(
            purposes,
            vec![
                IndexPurpose::Username,
                IndexPurpose::UsernameCaseInsensitive,
                IndexPurpose::Email,
                IndexPurpose::EmailCaseInsensitive,
                IndexPurpose::PasswordResetToken,
            ]
        );
        let user_indexes = f.memory.list_indexes("_User").await.unwrap();
        assert_eq!(user_indexes.len(), 5);
        assert!(f.memory.list_indexes("_Role").await.unwrap().is_empty());

        let again = f.manager.ensure_default_indexes().await.unwrap();
        assert!(again.iter().all(|(_, o)| *o == IndexOutcome::Unchanged));
    }

    #[tokio::test]
    async fn everything_enabled_by_default() {
        let f = fixture(IndexCreationConfig::default());
        let created = f.manager.ensure_default_indexes().await.unwrap();
        assert_eq!(created.len(), IndexPurpose::ALL.len());
        assert!(f.schemas.load("_Role").await.unwrap().is_some());
    }
}
