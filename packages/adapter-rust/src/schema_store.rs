//! Persisted class schemas in the `_SCHEMA` collection.
//!
//! One document per class, `_id` = class name. Field types are stored as
//! strings (`"string"`, `"*_User"`, `"relation<_User>"`, ...), index
//! descriptors under `_metadata.indexes.<name>`. Default fields are not
//! stored; they are re-derived on load.

use std::sync::Arc;

use async_trait::async_trait;
use tessera_core::schema::DEFAULT_FIELDS;
use tessera_core::{ClassSchema, EngineError, EngineResult, FieldType, IndexDescriptor};

use crate::native::{NativeDocument, NativeFilter, NativeQuery, NativeUpdate, NativeValue};
use crate::schema_cache::SchemaSource;
use crate::store::StoreDriver;

pub const SCHEMA_COLLECTION: &str = "_SCHEMA";
const METADATA_KEY: &str = "_metadata";

/// Stored type string of a field type.
#[must_use]
pub fn type_to_string(ty: &FieldType) -> String {
    match ty {
        FieldType::Pointer { target_class } => format!("*{target_class}"),
        FieldType::Relation { target_class } => format!("relation<{target_class}>"),
        other => other.name().to_lowercase(),
    }
}

/// Parses a stored type string.
///
/// # Errors
///
/// Returns `DataCorruption` for unknown type strings.
pub fn type_from_string(s: &str) -> EngineResult<FieldType> {
    if let Some(target) = s.strip_prefix('*') {
        return Ok(FieldType::Pointer {
            target_class: target.to_string(),
        });
    }
    if let Some(target) = s.strip_prefix("relation<").and_then(|r| r.strip_suffix('>')) {
        return Ok(FieldType::Relation {
            target_class: target.to_string(),
        });
    }
    Ok(match s {
        "string" => FieldType::String,
        "number" => FieldType::Number,
        "boolean" => FieldType::Boolean,
        "date" => FieldType::Date,
        "object" => FieldType::Object,
        "array" => FieldType::Array,
        "geopoint" => FieldType::GeoPoint,
        "polygon" => FieldType::Polygon,
        "bytes" => FieldType::Bytes,
        "file" => FieldType::File,
        "acl" => FieldType::Acl,
        other => {
            return Err(EngineError::DataCorruption(format!(
                "unknown stored field type '{other}'"
            )))
        }
    })
}

fn index_to_native(index: &IndexDescriptor) -> NativeValue {
    let keys = index
        .fields
        .iter()
        .map(|(field, dir)| {
            NativeValue::Array(vec![NativeValue::str(field), NativeValue::Int64(i64::from(*dir))])
        })
        .collect();
    let mut doc = NativeDocument::new();
    doc.insert("keys".to_string(), NativeValue::Array(keys));
    doc.insert("unique".to_string(), NativeValue::Bool(index.unique));
    doc.insert("caseInsensitive".to_string(), NativeValue::Bool(index.case_insensitive));
    NativeValue::Document(doc)
}

fn index_from_native(name: &str, value: &NativeValue) -> EngineResult<IndexDescriptor> {
    let corrupt = || EngineError::DataCorruption(format!("malformed index metadata for {name}"));
    let NativeValue::Document(doc) = value else {
        return Err(corrupt());
    };
    let Some(NativeValue::Array(keys)) = doc.get("keys") else {
        return Err(corrupt());
    };
    let fields = keys
        .iter()
        .map(|pair| match pair {
            NativeValue::Array(p) => match p.as_slice() {
                [NativeValue::String(field), NativeValue::Int64(dir)] => {
                    Ok((field.clone(), i32::try_from(*dir).map_err(|_| corrupt())?))
                }
                _ => Err(corrupt()),
            },
            _ => Err(corrupt()),
        })
        .collect::<EngineResult<Vec<_>>>()?;
    let flag = |k: &str| matches!(doc.get(k), Some(NativeValue::Bool(true)));
    Ok(IndexDescriptor {
        name: name.to_string(),
        fields,
        unique: flag("unique"),
        case_insensitive: flag("caseInsensitive"),
    })
}

/// Native `_SCHEMA` document for a schema.
#[must_use]
pub fn schema_to_native(schema: &ClassSchema) -> NativeDocument {
    let mut doc = NativeDocument::new();
    doc.insert("_id".to_string(), NativeValue::str(&schema.class_name));
    for (name, ty) in &schema.fields {
        if !DEFAULT_FIELDS.contains(&name.as_str()) {
            doc.insert(name.clone(), NativeValue::String(type_to_string(ty)));
        }
    }
    let indexes: NativeDocument = schema
        .indexes
        .iter()
        .map(|(name, index)| (name.clone(), index_to_native(index)))
        .collect();
    let mut metadata = NativeDocument::new();
    metadata.insert("indexes".to_string(), NativeValue::Document(indexes));
    doc.insert(METADATA_KEY.to_string(), NativeValue::Document(metadata));
    doc
}

/// Schema from a native `_SCHEMA` document.
///
/// # Errors
///
/// Returns `DataCorruption` for malformed documents.
pub fn schema_from_native(doc: &NativeDocument) -> EngineResult<ClassSchema> {
    let class_name = doc
        .get("_id")
        .and_then(NativeValue::as_str)
        .ok_or_else(|| EngineError::DataCorruption("schema document without _id".into()))?;
    let mut schema = ClassSchema::new(class_name)
        .map_err(|_| EngineError::DataCorruption(format!("stored schema has invalid class name {class_name}")))?;
    for (key, value) in doc {
        match (key.as_str(), value) {
            ("_id", _) => {}
            (METADATA_KEY, NativeValue::Document(metadata)) => {
                if let Some(NativeValue::Document(indexes)) = metadata.get("indexes") {
                    for (name, index) in indexes {
                        schema.indexes.insert(name.clone(), index_from_native(name, index)?);
                    }
                }
            }
            (name, NativeValue::String(ty)) => {
                schema.fields.insert(name.to_string(), type_from_string(ty)?);
            }
            (name, _) => {
                return Err(EngineError::DataCorruption(format!(
                    "schema field {name} of {class_name} has no type string"
                )))
            }
        }
    }
    Ok(schema)
}

/// `_SCHEMA` collection access.
pub struct SchemaStore {
    driver: Arc<dyn StoreDriver>,
}

impl SchemaStore {
    #[must_use]
    pub fn new(driver: Arc<dyn StoreDriver>) -> Self {
        Self { driver }
    }

    /// # Errors
    ///
    /// Store and decoding errors.
    pub async fn load(&self, class_name: &str) -> EngineResult<Option<ClassSchema>> {
        let query = NativeQuery {
            limit: Some(1),
            ..NativeQuery::new(NativeFilter::id(class_name))
        };
        let docs = self.driver.find(SCHEMA_COLLECTION, &query, None).await?;
        docs.first().map(schema_from_native).transpose()
    }

    /// # Errors
    ///
    /// Store and decoding errors.
    pub async fn load_all(&self) -> EngineResult<Vec<ClassSchema>> {
        let query = NativeQuery {
            sort: vec![("_id".to_string(), 1)],
            ..NativeQuery::default()
        };
        self.driver
            .find(SCHEMA_COLLECTION, &query, None)
            .await?
            .iter()
            .map(schema_from_native)
            .collect()
    }

    /// # Errors
    ///
    /// `Duplicate` when the class already exists.
    pub async fn create_class(&self, schema: &ClassSchema) -> EngineResult<()> {
        match self
            .driver
            .insert_one(SCHEMA_COLLECTION, schema_to_native(schema), None)
            .await
        {
            Err(EngineError::Duplicate(_)) => Err(EngineError::Duplicate(format!(
                "Class {} already exists.",
                schema.class_name
            ))),
            other => other,
        }
    }

    async fn require(&self, class_name: &str) -> EngineResult<ClassSchema> {
        self.load(class_name)
            .await?
            .ok_or_else(|| EngineError::ClassNotFound(class_name.to_string()))
    }

    async fn update(&self, class_name: &str, update: NativeUpdate) -> EngineResult<()> {
        self.driver
            .update_many(SCHEMA_COLLECTION, &NativeFilter::id(class_name), &update, None)
            .await
            .map(|_| ())
    }

    /// Declares a field and returns the updated schema.
    ///
    /// # Errors
    ///
    /// `ClassNotFound`, `InvalidKeyName` for bad names and `TypeMismatch`
    /// when the field exists with another type.
    pub async fn add_field(&self, class_name: &str, name: &str, ty: FieldType) -> EngineResult<ClassSchema> {
        let mut schema = self.require(class_name).await?;
        if schema.field_type(name) == Some(&ty) {
            return Ok(schema);
        }
        schema.add_field(name, ty.clone())?;
        let mut update = NativeUpdate::default();
        update.set.insert(name.to_string(), NativeValue::String(type_to_string(&ty)));
        self.update(class_name, update).await?;
        Ok(schema)
    }

    /// Removes fields and returns the updated schema.
    ///
    /// # Errors
    ///
    /// `ClassNotFound`, or `SchemaViolation` for default fields.
    pub async fn remove_fields(&self, class_name: &str, names: &[String]) -> EngineResult<ClassSchema> {
        let mut schema = self.require(class_name).await?;
        let mut update = NativeUpdate::default();
        for name in names {
            schema.remove_field(name)?;
            update.unset.insert(name.clone());
        }
        self.update(class_name, update).await?;
        Ok(schema)
    }

    /// # Errors
    ///
    /// Store errors.
    pub async fn record_index(&self, class_name: &str, index: &IndexDescriptor) -> EngineResult<()> {
        let mut update = NativeUpdate::default();
        update.set.insert(
            format!("{METADATA_KEY}.indexes.{}", index.name),
            index_to_native(index),
        );
        self.update(class_name, update).await
    }

    /// # Errors
    ///
    /// Store errors.
    pub async fn forget_index(&self, class_name: &str, name: &str) -> EngineResult<()> {
        let mut update = NativeUpdate::default();
        update.unset.insert(format!("{METADATA_KEY}.indexes.{name}"));
        self.update(class_name, update).await
    }

    /// Returns whether the class existed.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn delete_class(&self, class_name: &str) -> EngineResult<bool> {
        let deleted = self
            .driver
            .delete_many(SCHEMA_COLLECTION, &NativeFilter::id(class_name), None)
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl SchemaSource for SchemaStore {
    async fn load_class(&self, class_name: &str) -> EngineResult<Option<ClassSchema>> {
        self.load(class_name).await
    }
}
