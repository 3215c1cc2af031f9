//! Update Compiler: [`UpdateOperatorMap`] to native atomic update
//! instructions.
//!
//! `SetOnInsert` always lands in the native insert-only slot, so repeated
//! upserts never overwrite it after the first insert. Relation operations do
//! not touch the owning document; they are returned separately as join
//! collection edits.

use tessera_core::schema::is_internal_field;
use tessera_core::{
    ClassSchema, EngineError, EngineResult, FieldType, RequestContext, UpdateOp, UpdateOperatorMap, Value,
};

use super::{resolve_field, ResolvedField};
use crate::codec::document::acl_fields;
use crate::codec::{encode, encode_schemaless, native_field_name, ACL_KEY, READ_PERM_KEY, WRITE_PERM_KEY};
use crate::native::{NativeUpdate, NativeValue};

/// Fields no update may write.
const READ_ONLY_FIELDS: &[&str] = &["objectId", "createdAt", "updatedAt"];

/// Join collection edits for one relation field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationOp {
    pub field: String,
    pub target_class: String,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledUpdate {
    pub native: NativeUpdate,
    pub relation_ops: Vec<RelationOp>,
}

impl CompiledUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.native.is_empty() && self.relation_ops.is_empty()
    }
}

fn op_mismatch(path: &str, ty: &FieldType, op: &UpdateOp) -> EngineError {
    EngineError::TypeMismatch {
        field: path.to_string(),
        expected: ty.to_string(),
        actual: op.name().to_string(),
    }
}

fn encode_value(value: &Value, field: ResolvedField<'_>, path: &str) -> EngineResult<NativeValue> {
    match field {
        ResolvedField::Declared { ty, dotted: false } => encode(value, ty).map_err(|e| e.in_field(path)),
        _ => encode_schemaless(value),
    }
}

fn encode_all(values: &[Value]) -> EngineResult<Vec<NativeValue>> {
    values.iter().map(encode_schemaless).collect()
}

fn check_conflicts(update: &NativeUpdate) -> EngineResult<()> {
    let mut touched = update.touched_paths();
    touched.sort_unstable();
    for (i, (a, op_a)) in touched.iter().enumerate() {
        for (b, op_b) in &touched[i + 1..] {
            let nested = b.strip_prefix(a).is_some_and(|rest| rest.starts_with('.'));
            if a == b || nested {
                return Err(EngineError::InvalidQuery(format!(
                    "updating '{b}' with {op_b} conflicts with {op_a} on '{a}'"
                )));
            }
        }
    }
    Ok(())
}

fn relation_ids(field: &str, target: &str, pointers: &[tessera_core::Pointer]) -> EngineResult<Vec<String>> {
    pointers
        .iter()
        .map(|p| {
            if p.class_name == target {
                Ok(p.object_id.clone())
            } else {
                Err(EngineError::TypeMismatch {
                    field: field.to_string(),
                    expected: format!("Relation<{target}>"),
                    actual: format!("Pointer<{}>", p.class_name),
                })
            }
        })
        .collect()
}

/// Compiles an operator map against `schema`.
///
/// # Errors
///
/// - `InvalidKeyName` for read-only or internal (without privilege) fields.
/// - `SchemaViolation` for undeclared fields.
/// - `TypeMismatch` when an operator does not fit the field's type.
/// - `InvalidQuery` when two operations touch overlapping paths.
pub fn compile_update(
    ops: &UpdateOperatorMap,
    schema: &ClassSchema,
    ctx: &RequestContext,
) -> EngineResult<CompiledUpdate> {
    let mut out = CompiledUpdate::default();
    for (path, op) in ops {
        let root = UpdateOperatorMap::root_field(path);
        if READ_ONLY_FIELDS.contains(&root) {
            return Err(EngineError::InvalidKeyName(format!("{root} is read-only")));
        }
        if !ctx.privileged && !is_internal_field(root) && !schema.has_field(root) {
            return Err(EngineError::SchemaViolation(format!(
                "field {root} is not defined on class {}",
                schema.class_name
            )));
        }
        let field = resolve_field(path, schema, ctx)?;
        let declared = match field {
            ResolvedField::Declared { ty, dotted } => {
                if dotted && !matches!(ty, FieldType::Object) {
                    return Err(EngineError::InvalidQuery(format!(
                        "cannot update a subkey of {ty} field '{path}'"
                    )));
                }
                (!dotted).then_some(ty)
            }
            ResolvedField::Schemaless => None,
        };

        if let Some(ty) = declared.filter(|ty| ty.is_relation()) {
            let target_class = ty.target_class().unwrap_or_default();
            let (add, remove) = match op {
                UpdateOp::AddRelation(p) => (relation_ids(path, target_class, p)?, Vec::new()),
                UpdateOp::RemoveRelation(p) => (Vec::new(), relation_ids(path, target_class, p)?),
                other => return Err(op_mismatch(path, ty, other)),
            };
            out.relation_ops.push(RelationOp {
                field: path.clone(),
                target_class: target_class.to_string(),
                add,
                remove,
            });
            continue;
        }

        if root == "ACL" {
            match op {
                UpdateOp::Set(value) => {
                    let fields = acl_fields(value)?;
                    if fields.is_empty() {
                        out.native.unset.extend(
                            [ACL_KEY, READ_PERM_KEY, WRITE_PERM_KEY].map(str::to_string),
                        );
                    }
                    out.native.set.extend(fields);
                }
                UpdateOp::Delete => out
                    .native
                    .unset
                    .extend([ACL_KEY, READ_PERM_KEY, WRITE_PERM_KEY].map(str::to_string)),
                other => return Err(op_mismatch(path, &FieldType::Acl, other)),
            }
            continue;
        }

        let native_path = native_field_name(path, schema);
        match op {
            UpdateOp::Set(value) => {
                out.native.set.insert(native_path, encode_value(value, field, path)?);
            }
            UpdateOp::SetOnInsert(value) => {
                out.native
                    .set_on_insert
                    .insert(native_path, encode_value(value, field, path)?);
            }
            UpdateOp::Delete => {
                out.native.unset.insert(native_path);
            }
            UpdateOp::Increment(amount) => {
                if let Some(ty) = declared.filter(|ty| !matches!(ty, FieldType::Number)) {
                    return Err(op_mismatch(path, ty, op));
                }
                let amount = match amount {
                    Value::Int(i) => NativeValue::Int64(*i),
                    Value::Float(f) => NativeValue::Double(*f),
                    other => {
                        return Err(EngineError::type_mismatch("Number", other.type_name()).in_field(path))
                    }
                };
                out.native.inc.insert(native_path, amount);
            }
            UpdateOp::Add(values) | UpdateOp::AddUnique(values) | UpdateOp::Remove(values) => {
                if let Some(ty) = declared.filter(|ty| !matches!(ty, FieldType::Array)) {
                    return Err(op_mismatch(path, ty, op));
                }
                let values = encode_all(values)?;
                let slot = match op {
                    UpdateOp::Add(_) => &mut out.native.push_all,
                    UpdateOp::AddUnique(_) => &mut out.native.add_to_set,
                    _ => &mut out.native.pull_all,
                };
                slot.insert(native_path, values);
            }
            UpdateOp::AddRelation(_) | UpdateOp::RemoveRelation(_) => {
                let ty = declared.cloned().unwrap_or(FieldType::Object);
                return Err(op_mismatch(path, &ty, op));
            }
        }
    }
    check_conflicts(&out.native)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use tessera_core::{Acl, Pointer};

    use super::*;

    fn schema() -> ClassSchema {
        ClassSchema::with_fields(
            "Post",
            [
                ("title", FieldType::String),
                ("score", FieldType::Number),
                ("tags", FieldType::Array),
                ("meta", FieldType::Object),
                (
                    "author",
                    FieldType::Pointer {
                        target_class: "_User".to_string(),
                    },
                ),
                (
                    "likers",
                    FieldType::Relation {
                        target_class: "_User".to_string(),
                    },
                ),
            ],
        )
        .unwrap()
    }

    fn compile(ops: &UpdateOperatorMap) -> EngineResult<CompiledUpdate> {
        compile_update(ops, &schema(), &RequestContext::anonymous())
    }

    #[test]
    fn set_on_insert_uses_insert_only_slot() {
        let ops = UpdateOperatorMap::new()
            .set_on_insert("title", "first")
            .increment("score", 1_i64);
        let out = compile(&ops).unwrap();
        assert_eq!(out.native.set_on_insert.get("title"), Some(&NativeValue::str("first")));
        assert!(out.native.set.is_empty());
        assert_eq!(out.native.inc.get("score"), Some(&NativeValue::Int64(1)));
    }

    #[test]
    fn array_operators_map_to_set_semantics() {
        let add = UpdateOperatorMap::new().op("tags", UpdateOp::AddUnique(vec!["a".into(), "b".into()]));
        let out = compile(&add).unwrap();
        assert_eq!(
            out.native.add_to_set.get("tags"),
            Some(&vec![NativeValue::str("a"), NativeValue::str("b")])
        );
        let remove = UpdateOperatorMap::new().op("tags", UpdateOp::Remove(vec!["a".into()]));
        assert_eq!(compile(&remove).unwrap().native.pull_all.len(), 1);
        let wrong = UpdateOperatorMap::new().op("score", UpdateOp::Add(vec![1_i64.into()]));
        assert!(matches!(compile(&wrong), Err(EngineError::TypeMismatch { .. })));
    }

    #[test]
    fn dotted_object_paths_update_one_subkey() {
        let ops = UpdateOperatorMap::new().set("meta.views", 3_i64).increment("meta.likes", 1_i64);
        let out = compile(&ops).unwrap();
        assert_eq!(out.native.set.get("meta.views"), Some(&NativeValue::Int64(3)));
        assert_eq!(out.native.inc.get("meta.likes"), Some(&NativeValue::Int64(1)));
        let bad = UpdateOperatorMap::new().set("title.x", 1_i64);
        assert!(matches!(compile(&bad), Err(EngineError::InvalidQuery(_))));
    }

    #[test]
    fn overlapping_paths_conflict() {
        let ops = UpdateOperatorMap::new().set("meta", Value::Object(Default::default())).set("meta.views", 1_i64);
        assert!(matches!(compile(&ops), Err(EngineError::InvalidQuery(_))));
    }

    #[test]
    fn pointers_and_acl_use_native_keys() {
        let mut acl = Acl::new();
        acl.grant("u1", true, true);
        let ops = UpdateOperatorMap::new()
            .set("author", Pointer::new("_User", "u1"))
            .set("ACL", Value::Acl(acl));
        let out = compile(&ops).unwrap();
        assert_eq!(out.native.set.get("_p_author"), Some(&NativeValue::str("_User$u1")));
        assert!(out.native.set.contains_key(ACL_KEY));
        assert_eq!(
            out.native.set.get(READ_PERM_KEY),
            Some(&NativeValue::Array(vec![NativeValue::str("u1")]))
        );
    }

    #[test]
    fn relation_ops_are_split_out() {
        let ops = UpdateOperatorMap::new().op("likers", UpdateOp::AddRelation(vec![Pointer::new("_User", "u1")]));
        let out = compile(&ops).unwrap();
        assert!(out.native.is_empty());
        assert_eq!(
            out.relation_ops,
            vec![RelationOp {
                field: "likers".to_string(),
                target_class: "_User".to_string(),
                add: vec!["u1".to_string()],
                remove: vec![],
            }]
        );
        let wrong_class = UpdateOperatorMap::new().op("likers", UpdateOp::AddRelation(vec![Pointer::new("_Role", "r")]));
        assert!(matches!(compile(&wrong_class), Err(EngineError::TypeMismatch { .. })));
        let set = UpdateOperatorMap::new().set("likers", 1_i64);
        assert!(matches!(compile(&set), Err(EngineError::TypeMismatch { .. })));
    }

    #[test]
    fn key_policy() {
        assert!(matches!(
            compile(&UpdateOperatorMap::new().set("objectId", "x")),
            Err(EngineError::InvalidKeyName(_))
        ));
        assert!(matches!(
            compile(&UpdateOperatorMap::new().set("unknown", "x")),
            Err(EngineError::SchemaViolation(_))
        ));
        let internal = UpdateOperatorMap::new().set("_perishable_token", "t");
        assert!(matches!(compile(&internal), Err(EngineError::InvalidKeyName(_))));
        let out = compile_update(&internal, &schema(), &RequestContext::privileged()).unwrap();
        assert_eq!(out.native.set.get("_perishable_token"), Some(&NativeValue::str("t")));
    }

    #[test]
    fn increment_needs_a_number() {
        let ops = UpdateOperatorMap::new().increment("score", "1");
        assert!(matches!(compile(&ops), Err(EngineError::TypeMismatch { .. })));
    }
}
