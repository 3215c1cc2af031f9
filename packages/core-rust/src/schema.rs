//! Class schemas: declared field types and the indexes that back them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Declared type of a class field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    Pointer {
        #[serde(rename = "targetClass")]
        target_class: String,
    },
    Relation {
        #[serde(rename = "targetClass")]
        target_class: String,
    },
    GeoPoint,
    Polygon,
    Bytes,
    File,
    #[serde(rename = "ACL")]
    Acl,
}

impl FieldType {
    /// Name used in `TypeMismatch` messages and the stored schema document.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Number => "Number",
            Self::Boolean => "Boolean",
            Self::Date => "Date",
            Self::Object => "Object",
            Self::Array => "Array",
            Self::Pointer { .. } => "Pointer",
            Self::Relation { .. } => "Relation",
            Self::GeoPoint => "GeoPoint",
            Self::Polygon => "Polygon",
            Self::Bytes => "Bytes",
            Self::File => "File",
            Self::Acl => "ACL",
        }
    }

    /// Target class of pointer and relation fields.
    #[must_use]
    pub fn target_class(&self) -> Option<&str> {
        match self {
            Self::Pointer { target_class } | Self::Relation { target_class } => Some(target_class),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_relation(&self) -> bool {
        matches!(self, Self::Relation { .. })
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target_class() {
            Some(target) => write!(f, "{}<{target}>", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

/// A named index over one or more fields of a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    pub name: String,
    /// Indexed fields with their direction (`1` ascending, `-1` descending).
    pub fields: Vec<(String, i32)>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub case_insensitive: bool,
}

impl IndexDescriptor {
    /// Single-field ascending index named `<field>_1`.
    #[must_use]
    pub fn single(field: &str) -> Self {
        Self {
            name: format!("{field}_1"),
            fields: vec![(field.to_string(), 1)],
            unique: false,
            case_insensitive: false,
        }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the index case-insensitive and renames it `case_insensitive_<field>`.
    #[must_use]
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        if let [(field, _)] = self.fields.as_slice() {
            self.name = format!("case_insensitive_{field}");
        }
        self
    }

    /// True when every indexed field is `field`.
    #[must_use]
    pub fn covers_only(&self, field: &str) -> bool {
        !self.fields.is_empty() && self.fields.iter().all(|(f, _)| f == field)
    }

    #[must_use]
    pub fn covers(&self, field: &str) -> bool {
        self.fields.iter().any(|(f, _)| f == field)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// System classes that may be created despite the leading underscore.
pub const SYSTEM_CLASSES: &[&str] = &["_User", "_Role", "_Session", "_Installation"];

/// Fields every class carries.
pub const DEFAULT_FIELDS: &[&str] = &["objectId", "createdAt", "updatedAt", "ACL"];

/// Whether `name` is an acceptable class name.
#[must_use]
pub fn is_valid_class_name(name: &str) -> bool {
    SYSTEM_CLASSES.contains(&name) || is_identifier(name)
}

/// Whether `name` is an acceptable user-defined field name.
#[must_use]
pub fn is_valid_field_name(name: &str) -> bool {
    is_identifier(name)
}

/// Fields whose name starts with `_` are storage internals and never
/// visible to unprivileged callers.
#[must_use]
pub fn is_internal_field(name: &str) -> bool {
    name.starts_with('_')
}

/// The schema of one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSchema {
    pub class_name: String,
    pub fields: BTreeMap<String, FieldType>,
    #[serde(default)]
    pub indexes: BTreeMap<String, IndexDescriptor>,
}

impl ClassSchema {
    /// Creates a schema holding only the default fields for `class_name`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` when the class name is not acceptable.
    pub fn new(class_name: &str) -> EngineResult<Self> {
        if !is_valid_class_name(class_name) {
            return Err(EngineError::InvalidQuery(format!(
                "invalid class name: {class_name}"
            )));
        }
        let mut fields = BTreeMap::new();
        fields.insert("objectId".to_string(), FieldType::String);
        fields.insert("createdAt".to_string(), FieldType::Date);
        fields.insert("updatedAt".to_string(), FieldType::Date);
        fields.insert("ACL".to_string(), FieldType::Acl);
        match class_name {
            "_User" => {
                fields.insert("username".to_string(), FieldType::String);
                fields.insert("password".to_string(), FieldType::String);
                fields.insert("email".to_string(), FieldType::String);
                fields.insert("emailVerified".to_string(), FieldType::Boolean);
                fields.insert("authData".to_string(), FieldType::Object);
            }
            "_Role" => {
                fields.insert("name".to_string(), FieldType::String);
                fields.insert(
                    "users".to_string(),
                    FieldType::Relation {
                        target_class: "_User".to_string(),
                    },
                );
                fields.insert(
                    "roles".to_string(),
                    FieldType::Relation {
                        target_class: "_Role".to_string(),
                    },
                );
            }
            "_Session" => {
                fields.insert(
                    "user".to_string(),
                    FieldType::Pointer {
                        target_class: "_User".to_string(),
                    },
                );
                fields.insert("sessionToken".to_string(), FieldType::String);
                fields.insert("expiresAt".to_string(), FieldType::Date);
            }
            "_Installation" => {
                fields.insert("installationId".to_string(), FieldType::String);
                fields.insert("deviceToken".to_string(), FieldType::String);
                fields.insert("deviceType".to_string(), FieldType::String);
            }
            _ => {}
        }
        Ok(Self {
            class_name: class_name.to_string(),
            fields,
            indexes: BTreeMap::new(),
        })
    }

    /// Creates a schema with the default fields plus `extra`.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`ClassSchema::new`] and [`ClassSchema::add_field`].
    pub fn with_fields<I, S>(class_name: &str, extra: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        let mut schema = Self::new(class_name)?;
        for (name, ty) in extra {
            schema.add_field(&name.into(), ty)?;
        }
        Ok(schema)
    }

    /// Declares a new field. Redeclaring with the same type is a no-op.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyName` when the name is malformed.
    /// - `TypeMismatch` when the field already exists with a different type.
    pub fn add_field(&mut self, name: &str, ty: FieldType) -> EngineResult<()> {
        if !is_valid_field_name(name) {
            return Err(EngineError::InvalidKeyName(name.to_string()));
        }
        match self.fields.get(name) {
            Some(existing) if *existing == ty => Ok(()),
            Some(existing) => Err(EngineError::TypeMismatch {
                field: name.to_string(),
                expected: existing.to_string(),
                actual: ty.to_string(),
            }),
            None => {
                self.fields.insert(name.to_string(), ty);
                Ok(())
            }
        }
    }

    /// Removes a field; default fields cannot be removed.
    ///
    /// # Errors
    ///
    /// Returns `SchemaViolation` for default fields.
    pub fn remove_field(&mut self, name: &str) -> EngineResult<Option<FieldType>> {
        if DEFAULT_FIELDS.contains(&name) {
            return Err(EngineError::SchemaViolation(format!(
                "cannot remove default field {name}"
            )));
        }
        Ok(self.fields.remove(name))
    }

    #[must_use]
    pub fn field_type(&self, name: &str) -> Option<&FieldType> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Names of the class's relation fields.
    pub fn relation_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().filter_map(|(name, ty)| match ty {
            FieldType::Relation { target_class } => Some((name.as_str(), target_class.as_str())),
            _ => None,
        })
    }

    /// The case-insensitive index over exactly `field`, if any.
    #[must_use]
    pub fn case_insensitive_index_for(&self, field: &str) -> Option<&IndexDescriptor> {
        self.indexes
            .values()
            .find(|idx| idx.case_insensitive && idx.covers_only(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_schema_has_default_fields() {
        let schema = ClassSchema::new("Post").unwrap();
        for field in DEFAULT_FIELDS {
            assert!(schema.has_field(field), "missing {field}");
        }
        assert_eq!(schema.field_type("ACL"), Some(&FieldType::Acl));
    }

    #[test]
    fn user_and_role_carry_system_fields() {
        let user = ClassSchema::new("_User").unwrap();
        assert_eq!(user.field_type("email"), Some(&FieldType::String));
        let role = ClassSchema::new("_Role").unwrap();
        assert_eq!(
            role.field_type("users"),
            Some(&FieldType::Relation {
                target_class: "_User".to_string()
            })
        );
        assert_eq!(role.relation_fields().count(), 2);
    }

    #[test]
    fn invalid_class_names_are_rejected() {
        assert!(ClassSchema::new("_Hidden").is_err());
        assert!(ClassSchema::new("9Lives").is_err());
        assert!(ClassSchema::new("Has Space").is_err());
    }

    #[test]
    fn add_field_conflict_is_type_mismatch() {
        let mut schema = ClassSchema::with_fields("Post", [("score", FieldType::Number)]).unwrap();
        assert!(schema.add_field("score", FieldType::Number).is_ok());
        let err = schema.add_field("score", FieldType::String).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { ref field, .. } if field == "score"));
        assert!(matches!(
            schema.add_field("_secret", FieldType::String),
            Err(EngineError::InvalidKeyName(_))
        ));
    }

    #[test]
    fn default_fields_cannot_be_removed() {
        let mut schema = ClassSchema::new("Post").unwrap();
        assert!(schema.remove_field("createdAt").is_err());
    }

    #[test]
    fn index_coverage() {
        let idx = IndexDescriptor::single("email").case_insensitive();
        assert_eq!(idx.name, "case_insensitive_email");
        assert!(idx.covers_only("email"));
        let compound = IndexDescriptor {
            name: "a_1_b_1".to_string(),
            fields: vec![("a".to_string(), 1), ("b".to_string(), 1)],
            unique: false,
            case_insensitive: false,
        };
        assert!(compound.covers("a"));
        assert!(!compound.covers_only("a"));
    }

    #[test]
    fn field_type_serializes_with_tag() {
        let json = serde_json::to_value(FieldType::Pointer {
            target_class: "_User".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "type": "Pointer", "targetClass": "_User" }));
        let acl = serde_json::to_value(FieldType::Acl).unwrap();
        assert_eq!(acl, serde_json::json!({ "type": "ACL" }));
    }
}
