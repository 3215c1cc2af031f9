//! Filter and Update Compilers.
//!
//! Both compilers are pure: every schema, key-policy and type error is
//! raised here, before a native store call is issued.

pub mod filter;
pub mod update;

pub use filter::{acl_filter, compile_filter, compile_query, CompilePolicy, CompiledFilter};
pub use update::{compile_update, CompiledUpdate, RelationOp};

use tessera_core::schema::is_internal_field;
use tessera_core::{ClassSchema, EngineError, EngineResult, FieldType, RequestContext};

/// How a field path resolved against the schema.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ResolvedField<'a> {
    /// A declared field, possibly with a dotted subpath below it.
    Declared { ty: &'a FieldType, dotted: bool },
    /// An undeclared internal or privileged field, handled schemaless.
    Schemaless,
}

/// Applies the key policy to `path` and resolves its root field.
///
/// - protected roots are `PermissionDenied`;
/// - internal (`_`-prefixed) roots are `InvalidKeyName` unless privileged;
/// - undeclared roots are `InvalidKeyName` unless privileged.
pub(crate) fn resolve_field<'a>(
    path: &str,
    schema: &'a ClassSchema,
    ctx: &RequestContext,
) -> EngineResult<ResolvedField<'a>> {
    let (root, dotted) = match path.split_once('.') {
        Some((root, rest)) if !root.is_empty() && !rest.is_empty() => (root, true),
        Some(_) => return Err(EngineError::InvalidKeyName(path.to_string())),
        None => (path, false),
    };
    if path.starts_with('$') || path.split('.').any(str::is_empty) {
        return Err(EngineError::InvalidKeyName(path.to_string()));
    }
    if ctx.is_protected(root) {
        return Err(EngineError::PermissionDenied(format!(
            "field {root} of {} is protected",
            schema.class_name
        )));
    }
    if is_internal_field(root) && !ctx.privileged {
        return Err(EngineError::InvalidKeyName(root.to_string()));
    }
    match schema.field_type(root) {
        Some(ty) => Ok(ResolvedField::Declared { ty, dotted }),
        None if ctx.privileged => Ok(ResolvedField::Schemaless),
        None => Err(EngineError::InvalidKeyName(format!(
            "{root} is not a field of {}",
            schema.class_name
        ))),
    }
}
