//! Whole-document transform between [`Document`] and the native layout.
//!
//! | field           | native key      |
//! |-----------------|-----------------|
//! | `objectId`      | `_id`           |
//! | `createdAt`     | `_created_at`   |
//! | `updatedAt`     | `_updated_at`   |
//! | `ACL`           | `_acl` (+ `_rperm`, `_wperm`) |
//! | pointer `f`     | `_p_f` = `Class$id` |
//! | relation `f`    | not stored (join collection) |

use rand::distr::Alphanumeric;
use rand::Rng;
use tessera_core::schema::is_internal_field;
use tessera_core::{ClassSchema, Document, EngineError, EngineResult, FieldType, Value};

use super::value::{decode, decode_acl, decode_schemaless, encode, encode_acl, encode_schemaless};
use crate::native::{NativeDocument, NativeValue};

pub const ID_KEY: &str = "_id";
pub const CREATED_AT_KEY: &str = "_created_at";
pub const UPDATED_AT_KEY: &str = "_updated_at";
pub const ACL_KEY: &str = "_acl";
pub const READ_PERM_KEY: &str = "_rperm";
pub const WRITE_PERM_KEY: &str = "_wperm";
const POINTER_PREFIX: &str = "_p_";

/// Random 10-character alphanumeric object id.
#[must_use]
pub fn generate_object_id() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

/// Maps a (possibly dotted) field path to its native path. Only the first
/// segment is renamed.
#[must_use]
pub fn native_field_name(path: &str, schema: &ClassSchema) -> String {
    let (root, rest) = match path.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (path, None),
    };
    let native_root = match root {
        "objectId" => ID_KEY.to_string(),
        "createdAt" => CREATED_AT_KEY.to_string(),
        "updatedAt" => UPDATED_AT_KEY.to_string(),
        "ACL" => ACL_KEY.to_string(),
        _ => match schema.field_type(root) {
            Some(FieldType::Pointer { .. }) => format!("{POINTER_PREFIX}{root}"),
            _ => root.to_string(),
        },
    };
    match rest {
        Some(rest) => format!("{native_root}.{rest}"),
        None => native_root,
    }
}

/// Native fields derived from an ACL value.
pub(crate) fn acl_fields(value: &Value) -> EngineResult<Vec<(String, NativeValue)>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Acl(acl) => {
            let strings = |list: Vec<String>| {
                NativeValue::Array(list.into_iter().map(NativeValue::String).collect())
            };
            Ok(vec![
                (ACL_KEY.to_string(), NativeValue::Document(encode_acl(acl))),
                (READ_PERM_KEY.to_string(), strings(acl.readers())),
                (WRITE_PERM_KEY.to_string(), strings(acl.writers())),
            ])
        }
        other => Err(EngineError::TypeMismatch {
            field: "ACL".to_string(),
            expected: "ACL".to_string(),
            actual: other.type_name().to_string(),
        }),
    }
}

/// Encodes a single named field into `(native key, native value)` pairs.
/// Relation fields produce nothing.
///
/// # Errors
///
/// `SchemaViolation` for undeclared non-internal fields, plus the field
/// encoding errors of [`encode`].
pub fn encode_field(
    name: &str,
    value: &Value,
    schema: &ClassSchema,
) -> EngineResult<Vec<(String, NativeValue)>> {
    if name == "ACL" {
        return acl_fields(value);
    }
    match schema.field_type(name) {
        Some(FieldType::Relation { .. }) => Ok(Vec::new()),
        Some(ty) => Ok(vec![(
            native_field_name(name, schema),
            encode(value, ty).map_err(|e| e.in_field(name))?,
        )]),
        None if is_internal_field(name) => Ok(vec![(name.to_string(), encode_schemaless(value)?)]),
        None => Err(EngineError::SchemaViolation(format!(
            "field {name} is not defined on class {}",
            schema.class_name
        ))),
    }
}

/// Encodes a whole document for insertion.
///
/// # Errors
///
/// Propagates [`encode_field`] errors.
pub fn encode_document(doc: &Document, schema: &ClassSchema) -> EngineResult<NativeDocument> {
    let mut native = NativeDocument::new();
    native.insert(ID_KEY.to_string(), NativeValue::String(doc.object_id.clone()));
    if let Some(created) = doc.created_at {
        native.insert(CREATED_AT_KEY.to_string(), NativeValue::DateTime(created));
    }
    if let Some(updated) = doc.updated_at {
        native.insert(UPDATED_AT_KEY.to_string(), NativeValue::DateTime(updated));
    }
    for (name, value) in &doc.fields {
        if matches!(name.as_str(), "objectId" | "createdAt" | "updatedAt") {
            continue;
        }
        native.extend(encode_field(name, value, schema)?);
    }
    Ok(native)
}

/// Decodes a stored document. Internal `_`-prefixed fields are decoded under
/// their own names; relation fields are synthesised from the schema.
///
/// # Errors
///
/// `DataCorruption` when `_id` is missing or a pointer key is malformed.
pub fn decode_document(native: &NativeDocument, schema: &ClassSchema) -> EngineResult<Document> {
    let object_id = native
        .get(ID_KEY)
        .and_then(NativeValue::as_str)
        .ok_or_else(|| {
            EngineError::DataCorruption(format!(
                "document in {} has no string _id",
                schema.class_name
            ))
        })?;
    let mut doc = Document::new(schema.class_name.clone(), object_id);

    for (key, value) in native {
        match key.as_str() {
            ID_KEY | READ_PERM_KEY | WRITE_PERM_KEY => {}
            CREATED_AT_KEY => {
                if let NativeValue::DateTime(dt) = value {
                    doc.created_at = Some(*dt);
                }
            }
            UPDATED_AT_KEY => {
                if let NativeValue::DateTime(dt) = value {
                    doc.updated_at = Some(*dt);
                }
            }
            ACL_KEY => {
                if let NativeValue::Document(acl) = value {
                    doc.fields.insert("ACL".to_string(), Value::Acl(decode_acl(acl)));
                }
            }
            _ => {
                if let Some(field) = key.strip_prefix(POINTER_PREFIX) {
                    let ty = match schema.field_type(field) {
                        Some(ty @ FieldType::Pointer { .. }) => ty.clone(),
                        _ => FieldType::Pointer {
                            target_class: String::new(),
                        },
                    };
                    let decoded = decode(value, &ty).map_err(|e| e.in_field(field))?;
                    doc.fields.insert(field.to_string(), decoded);
                    continue;
                }
                let decoded = match schema.field_type(key) {
                    Some(ty) => decode(value, ty).map_err(|e| e.in_field(key))?,
                    None => decode_schemaless(value)?,
                };
                doc.fields.insert(key.clone(), decoded);
            }
        }
    }

    for (name, target) in schema.relation_fields() {
        doc.fields.insert(
            name.to_string(),
            Value::Relation {
                class_name: target.to_string(),
            },
        );
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tessera_core::{Acl, GeoPoint, Pointer};

    use super::*;

    fn post_schema() -> ClassSchema {
        ClassSchema::with_fields(
            "Post",
            [
                ("title", FieldType::String),
                (
                    "author",
                    FieldType::Pointer {
                        target_class: "_User".to_string(),
                    },
                ),
                (
                    "likes",
                    FieldType::Relation {
                        target_class: "_User".to_string(),
                    },
                ),
                ("location", FieldType::GeoPoint),
            ],
        )
        .unwrap()
    }

    #[test]
    fn document_round_trip() {
        let schema = post_schema();
        let mut acl = Acl::new();
        acl.grant("*", true, false);
        acl.grant("u1", true, true);
        let mut doc = Document::new("Post", "p1")
            .with("title", "hello")
            .with("author", Pointer::new("_User", "u1"))
            .with("location", Value::GeoPoint(GeoPoint::new(1.0, 2.0)))
            .with("ACL", Value::Acl(acl))
            .with(
                "likes",
                Value::Relation {
                    class_name: "_User".to_string(),
                },
            );
        doc.created_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        doc.updated_at = doc.created_at;

        let native = encode_document(&doc, &schema).unwrap();
        assert_eq!(native.get("_p_author"), Some(&NativeValue::str("_User$u1")));
        assert!(!native.contains_key("likes"));
        assert_eq!(
            native.get("_rperm"),
            Some(&NativeValue::Array(vec![NativeValue::str("*"), NativeValue::str("u1")]))
        );
        assert_eq!(
            native.get("_wperm"),
            Some(&NativeValue::Array(vec![NativeValue::str("u1")]))
        );

        assert_eq!(decode_document(&native, &schema).unwrap(), doc);
    }

    #[test]
    fn undeclared_field_is_schema_violation() {
        let doc = Document::new("Post", "p1").with("nope", 1_i64);
        assert!(matches!(
            encode_document(&doc, &post_schema()),
            Err(EngineError::SchemaViolation(_))
        ));
    }

    #[test]
    fn internal_fields_keep_their_names() {
        let doc = Document::new("Post", "p1").with("_hashed_password", "xyz");
        let native = encode_document(&doc, &post_schema()).unwrap();
        let decoded = decode_document(&native, &post_schema()).unwrap();
        assert_eq!(decoded.get("_hashed_password"), Some(&Value::from("xyz")));
    }

    #[test]
    fn type_mismatch_names_the_field() {
        let doc = Document::new("Post", "p1").with("title", 5_i64);
        let err = encode_document(&doc, &post_schema()).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { ref field, .. } if field == "title"));
    }

    #[test]
    fn native_names_for_dotted_paths() {
        let schema = post_schema();
        assert_eq!(native_field_name("objectId", &schema), "_id");
        assert_eq!(native_field_name("author", &schema), "_p_author");
        assert_eq!(native_field_name("meta.a.b", &schema), "meta.a.b");
    }

    #[test]
    fn generated_ids_are_alphanumeric() {
        let id = generate_object_id();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, generate_object_id());
    }

    #[test]
    fn missing_id_is_corruption() {
        let native = NativeDocument::new();
        assert!(matches!(
            decode_document(&native, &post_schema()),
            Err(EngineError::DataCorruption(_))
        ));
    }
}
