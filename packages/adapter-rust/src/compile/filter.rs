//! Filter Compiler: [`Filter`] trees to native predicates.

use std::time::Duration;

use tessera_core::{
    ClassSchema, CompareOp, Constraint, EngineError, EngineResult, FieldType, Filter, FindOptions,
    GeoPoint, GeoRegion, RequestContext, Value,
};

use super::{resolve_field, ResolvedField};
use crate::codec::{encode, encode_schemaless, native_field_name, ACL_KEY, CREATED_AT_KEY, ID_KEY, READ_PERM_KEY, UPDATED_AT_KEY};
use crate::native::{Collation, NativeCond, NativeFilter, NativeGeoRegion, NativeQuery, NativeValue};

/// Caller-dependent compilation settings.
#[derive(Debug, Clone, Copy)]
pub struct CompilePolicy<'a> {
    pub ctx: &'a RequestContext,
    /// Whether `Filter::Raw` may compile for unprivileged callers.
    pub allow_sandboxed: bool,
    /// Attached to every compiled query unless the call overrides it.
    pub max_time: Option<Duration>,
}

impl<'a> CompilePolicy<'a> {
    #[must_use]
    pub fn new(ctx: &'a RequestContext) -> Self {
        Self {
            ctx,
            allow_sandboxed: false,
            max_time: None,
        }
    }
}

/// A compiled predicate plus the collation it needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub filter: NativeFilter,
    pub collation: Option<Collation>,
}

struct FilterCompiler<'a> {
    schema: &'a ClassSchema,
    policy: CompilePolicy<'a>,
    collation: Option<Collation>,
}

fn native_point(point: &GeoPoint) -> EngineResult<(f64, f64)> {
    point.validate()?;
    Ok((point.longitude, point.latitude))
}

fn native_region(region: &GeoRegion) -> EngineResult<NativeGeoRegion> {
    Ok(match region {
        GeoRegion::Box {
            south_west,
            north_east,
        } => NativeGeoRegion::Box {
            bottom_left: native_point(south_west)?,
            upper_right: native_point(north_east)?,
        },
        GeoRegion::Polygon(ring) => {
            if ring.len() < 3 {
                return Err(EngineError::InvalidQuery(
                    "$geoWithin polygon needs at least 3 points".into(),
                ));
            }
            NativeGeoRegion::Polygon(ring.iter().map(native_point).collect::<EngineResult<_>>()?)
        }
        GeoRegion::CenterSphere { center, radius } => {
            if !radius.is_finite() || *radius < 0.0 {
                return Err(EngineError::InvalidQuery(format!(
                    "bad $centerSphere radius {radius}"
                )));
            }
            NativeGeoRegion::CenterSphere {
                center: native_point(center)?,
                radius: *radius,
            }
        }
    })
}

impl<'a> FilterCompiler<'a> {
    fn compile(&mut self, filter: &Filter) -> EngineResult<NativeFilter> {
        match filter {
            Filter::All => Ok(NativeFilter::All),
            Filter::And(parts) => {
                let mut out = NativeFilter::All;
                for part in parts {
                    out = out.and(self.compile(part)?);
                }
                Ok(out)
            }
            Filter::Or(parts) => {
                if parts.is_empty() {
                    return Err(EngineError::InvalidQuery("$or needs at least one clause".into()));
                }
                parts
                    .iter()
                    .map(|p| self.compile(p))
                    .collect::<EngineResult<Vec<_>>>()
                    .map(NativeFilter::Or)
            }
            Filter::Field { field, constraint } => self.field(field, constraint),
            Filter::RelatedTo { key, .. } => Err(EngineError::InvalidQuery(format!(
                "$relatedTo on '{key}' must be reduced before compilation"
            ))),
            Filter::Raw(script) => {
                if !(self.policy.allow_sandboxed || self.policy.ctx.privileged) {
                    return Err(EngineError::InvalidQuery(
                        "sandboxed expressions are disabled".into(),
                    ));
                }
                Ok(NativeFilter::Where {
                    script: script.clone(),
                })
            }
        }
    }

    fn operand(value: &Value, field: ResolvedField<'_>, path: &str) -> EngineResult<NativeValue> {
        match field {
            ResolvedField::Schemaless
            | ResolvedField::Declared { dotted: true, .. }
            | ResolvedField::Declared {
                ty: FieldType::Array | FieldType::Object,
                ..
            } => encode_schemaless(value),
            ResolvedField::Declared { ty, .. } => encode(value, ty).map_err(|e| e.in_field(path)),
        }
    }

    fn operands(values: &[Value], field: ResolvedField<'_>, path: &str) -> EngineResult<Vec<NativeValue>> {
        values.iter().map(|v| Self::operand(v, field, path)).collect()
    }

    fn field(&mut self, path: &str, constraint: &Constraint) -> EngineResult<NativeFilter> {
        let resolved = resolve_field(path, self.schema, self.policy.ctx)?;
        if let ResolvedField::Declared { ty, dotted: true } = resolved {
            if !matches!(ty, FieldType::Object) {
                return Err(EngineError::InvalidQuery(format!(
                    "cannot query a subkey of {ty} field '{path}'"
                )));
            }
        }
        if let ResolvedField::Declared {
            ty: FieldType::Relation { .. },
            ..
        } = resolved
        {
            return Err(EngineError::InvalidQuery(format!(
                "relation field '{path}' must be queried through $relatedTo or relation containment"
            )));
        }
        let native_path = native_field_name(path, self.schema);
        let declared = match resolved {
            ResolvedField::Declared { ty, dotted: false } => Some(ty),
            _ => None,
        };
        let cond = match constraint {
            Constraint::Equals(v) => NativeCond::Eq(Self::operand(v, resolved, path)?),
            Constraint::NotEqual(v) => NativeCond::Ne(Self::operand(v, resolved, path)?),
            Constraint::Compare(op, v) => {
                let operand = Self::operand(v, resolved, path)?;
                match op {
                    CompareOp::Lt => NativeCond::Lt(operand),
                    CompareOp::Lte => NativeCond::Lte(operand),
                    CompareOp::Gt => NativeCond::Gt(operand),
                    CompareOp::Gte => NativeCond::Gte(operand),
                }
            }
            Constraint::In(values) => NativeCond::In(Self::operands(values, resolved, path)?),
            Constraint::NotIn(values) => NativeCond::Nin(Self::operands(values, resolved, path)?),
            Constraint::ContainsAll(values) => {
                if let Some(ty) = declared.filter(|ty| !matches!(ty, FieldType::Array)) {
                    return Err(EngineError::TypeMismatch {
                        field: path.to_string(),
                        expected: "Array".to_string(),
                        actual: ty.to_string(),
                    });
                }
                NativeCond::All(Self::operands(values, resolved, path)?)
            }
            Constraint::Exists(exists) => NativeCond::Exists(*exists),
            Constraint::Regex { pattern, options } => {
                if let Some(ty) =
                    declared.filter(|ty| !matches!(ty, FieldType::String | FieldType::Array | FieldType::Object))
                {
                    return Err(EngineError::type_mismatch("String", ty.to_string()).in_field(path));
                }
                NativeCond::Regex {
                    pattern: pattern.clone(),
                    options: options.clone(),
                }
            }
            Constraint::EqualsIgnoreCase(text) => {
                match declared {
                    Some(FieldType::String) => {}
                    Some(ty) => {
                        return Err(EngineError::type_mismatch("String", ty.to_string()).in_field(path));
                    }
                    None => {}
                }
                if self.schema.case_insensitive_index_for(path).is_some() {
                    self.collation = Some(Collation::case_insensitive());
                    NativeCond::Eq(NativeValue::String(text.clone()))
                } else {
                    tracing::debug!(
                        class = %self.schema.class_name,
                        field = path,
                        "no case-insensitive index; falling back to an anchored regex"
                    );
                    NativeCond::Regex {
                        pattern: format!("^{}$", regex::escape(text)),
                        options: "i".to_string(),
                    }
                }
            }
            Constraint::GeoWithin(region) => {
                if let Some(ty) = declared.filter(|ty| !matches!(ty, FieldType::GeoPoint)) {
                    return Err(EngineError::type_mismatch("GeoPoint", ty.to_string()).in_field(path));
                }
                NativeCond::GeoWithin(native_region(region)?)
            }
            Constraint::RelationContains(_) => {
                return Err(EngineError::InvalidQuery(format!(
                    "relation containment on '{path}' must be reduced before compilation"
                )))
            }
        };
        Ok(NativeFilter::Field {
            path: native_path,
            cond,
        })
    }
}

/// Compiles a filter tree.
///
/// # Errors
///
/// Key-policy, type and structural errors; see [`EngineError`].
pub fn compile_filter(filter: &Filter, schema: &ClassSchema, policy: CompilePolicy<'_>) -> EngineResult<CompiledFilter> {
    let mut compiler = FilterCompiler {
        schema,
        policy,
        collation: None,
    };
    let filter = compiler.compile(filter)?;
    Ok(CompiledFilter {
        filter,
        collation: compiler.collation,
    })
}

/// Permission scoping on `perm_key` (`_rperm` or `_wperm`): documents
/// without the key, or granting one of the caller's subjects.
#[must_use]
pub fn acl_filter(perm_key: &str, ctx: &RequestContext) -> NativeFilter {
    match ctx.acl_scope() {
        None => NativeFilter::All,
        Some(scope) => NativeFilter::Or(vec![
            NativeFilter::field(perm_key, NativeCond::Exists(false)),
            NativeFilter::field(
                perm_key,
                NativeCond::In(scope.into_iter().map(NativeValue::String).collect()),
            ),
        ]),
    }
}

fn projection(keys: &[String], schema: &ClassSchema, ctx: &RequestContext) -> EngineResult<Vec<String>> {
    let mut out: Vec<String> = [ID_KEY, CREATED_AT_KEY, UPDATED_AT_KEY, ACL_KEY]
        .iter()
        .map(ToString::to_string)
        .collect();
    for key in keys {
        let root = key.split('.').next().unwrap_or(key);
        if ctx.is_protected(root) {
            continue;
        }
        if let ResolvedField::Declared {
            ty: FieldType::Relation { .. },
            ..
        } = resolve_field(root, schema, ctx)?
        {
            continue;
        }
        let native = native_field_name(root, schema);
        if !out.contains(&native) {
            out.push(native);
        }
    }
    Ok(out)
}

/// Compiles a whole find: predicate, read-permission scope, sort, paging,
/// projection, collation and time bound.
///
/// # Errors
///
/// As [`compile_filter`], plus key-policy errors on sort keys and keys.
pub fn compile_query(
    filter: &Filter,
    options: &FindOptions,
    schema: &ClassSchema,
    policy: CompilePolicy<'_>,
) -> EngineResult<NativeQuery> {
    let compiled = compile_filter(filter, schema, policy)?;
    let sort = options
        .sort
        .iter()
        .map(|key| {
            if let ResolvedField::Declared {
                ty: FieldType::Relation { .. },
                ..
            } = resolve_field(&key.field, schema, policy.ctx)?
            {
                return Err(EngineError::InvalidQuery(format!(
                    "cannot sort by relation field '{}'",
                    key.field
                )));
            }
            Ok((native_field_name(&key.field, schema), if key.descending { -1 } else { 1 }))
        })
        .collect::<EngineResult<Vec<_>>>()?;
    let projection = options
        .keys
        .as_deref()
        .map(|keys| projection(keys, schema, policy.ctx))
        .transpose()?;
    Ok(NativeQuery {
        filter: compiled.filter.and(acl_filter(READ_PERM_KEY, policy.ctx)),
        sort,
        skip: options.skip.unwrap_or(0),
        limit: options.limit,
        projection,
        collation: compiled.collation,
        max_time: options
            .max_time_ms
            .map(Duration::from_millis)
            .or(policy.max_time),
    })
}

#[cfg(test)]
mod tests {
    use tessera_core::{Pointer, Principal};

    use super::*;

    fn schema() -> ClassSchema {
        let mut schema = ClassSchema::with_fields(
            "Post",
            [
                ("title", FieldType::String),
                ("score", FieldType::Number),
                ("tags", FieldType::Array),
                ("meta", FieldType::Object),
                ("location", FieldType::GeoPoint),
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
        .unwrap();
        let index = tessera_core::IndexDescriptor::single("title").case_insensitive();
        schema.indexes.insert(index.name.clone(), index);
        schema
    }

    fn compile(filter: &Filter, ctx: &RequestContext) -> EngineResult<CompiledFilter> {
        compile_filter(filter, &schema(), CompilePolicy::new(ctx))
    }

    #[test]
    fn pointer_equality_uses_compound_key() {
        let ctx = RequestContext::anonymous();
        let out = compile(&Filter::equals("author", Pointer::new("_User", "u1")), &ctx).unwrap();
        assert_eq!(
            out.filter,
            NativeFilter::field("_p_author", NativeCond::Eq(NativeValue::str("_User$u1")))
        );
    }

    #[test]
    fn object_id_maps_to_native_id() {
        let ctx = RequestContext::anonymous();
        let out = compile(&Filter::object_id("abc"), &ctx).unwrap();
        assert_eq!(out.filter, NativeFilter::id("abc"));
    }

    #[test]
    fn unknown_and_internal_fields_need_privilege() {
        let anon = RequestContext::anonymous();
        let root = RequestContext::privileged();
        for field in ["nope", "_hashed_password"] {
            let filter = Filter::equals(field, "x");
            assert!(matches!(compile(&filter, &anon), Err(EngineError::InvalidKeyName(_))));
            assert!(compile(&filter, &root).is_ok());
        }
    }

    #[test]
    fn protected_fields_are_denied() {
        let ctx = RequestContext::anonymous().with_protected_fields(["score"]);
        let err = compile(&Filter::equals("score", 1_i64), &ctx).unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied(_)));
    }

    #[test]
    fn operands_are_type_checked() {
        let ctx = RequestContext::anonymous();
        let err = compile(&Filter::equals("score", "ten"), &ctx).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { ref field, .. } if field == "score"));
        let err = compile(
            &Filter::field("score", Constraint::EqualsIgnoreCase("x".into())),
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { .. }));
    }

    #[test]
    fn array_equality_matches_elements() {
        let ctx = RequestContext::anonymous();
        let out = compile(&Filter::equals("tags", "rust"), &ctx).unwrap();
        assert_eq!(out.filter, NativeFilter::field("tags", NativeCond::Eq(NativeValue::str("rust"))));
    }

    #[test]
    fn dotted_object_paths_compile_schemaless() {
        let ctx = RequestContext::anonymous();
        let out = compile(&Filter::equals("meta.views", 3_i64), &ctx).unwrap();
        assert_eq!(out.filter, NativeFilter::field("meta.views", NativeCond::Eq(NativeValue::Int64(3))));
        assert!(matches!(
            compile(&Filter::equals("title.x", 3_i64), &ctx),
            Err(EngineError::InvalidQuery(_))
        ));
    }

    #[test]
    fn case_insensitive_uses_collation_when_indexed() {
        let ctx = RequestContext::anonymous();
        let out = compile(
            &Filter::field("title", Constraint::EqualsIgnoreCase("Hello".into())),
            &ctx,
        )
        .unwrap();
        assert_eq!(out.collation, Some(Collation::case_insensitive()));
        assert_eq!(out.filter, NativeFilter::field("title", NativeCond::Eq(NativeValue::str("Hello"))));
    }

    #[test]
    fn case_insensitive_falls_back_to_regex() {
        let mut schema = schema();
        schema.indexes.clear();
        let ctx = RequestContext::anonymous();
        let out = compile_filter(
            &Filter::field("title", Constraint::EqualsIgnoreCase("a.b+".into())),
            &schema,
            CompilePolicy::new(&ctx),
        )
        .unwrap();
        assert_eq!(out.collation, None);
        assert_eq!(
            out.filter,
            NativeFilter::field(
                "title",
                NativeCond::Regex {
                    pattern: r"^a\.b\+$".to_string(),
                    options: "i".to_string(),
                }
            )
        );
    }

    #[test]
    fn raw_expressions_are_gated() {
        let ctx = RequestContext::anonymous();
        let raw = Filter::Raw("this.score > 1".into());
        assert!(matches!(compile(&raw, &ctx), Err(EngineError::InvalidQuery(_))));
        let policy = CompilePolicy {
            allow_sandboxed: true,
            ..CompilePolicy::new(&ctx)
        };
        let out = compile_filter(&raw, &schema(), policy).unwrap();
        assert!(matches!(out.filter, NativeFilter::Where { .. }));
    }

    #[test]
    fn structural_errors() {
        let ctx = RequestContext::anonymous();
        assert!(matches!(compile(&Filter::Or(vec![]), &ctx), Err(EngineError::InvalidQuery(_))));
        let contains = Filter::field("likers", Constraint::RelationContains(Pointer::new("_User", "u1")));
        assert!(matches!(compile(&contains, &ctx), Err(EngineError::InvalidQuery(_))));
    }

    #[test]
    fn geo_box_is_lng_lat() {
        let ctx = RequestContext::anonymous();
        let filter = Filter::field(
            "location",
            Constraint::GeoWithin(GeoRegion::Box {
                south_west: GeoPoint::new(10.0, 20.0),
                north_east: GeoPoint::new(11.0, 21.0),
            }),
        );
        let out = compile(&filter, &ctx).unwrap();
        assert_eq!(
            out.filter,
            NativeFilter::field(
                "location",
                NativeCond::GeoWithin(NativeGeoRegion::Box {
                    bottom_left: (20.0, 10.0),
                    upper_right: (21.0, 11.0),
                })
            )
        );
    }

    #[test]
    fn query_carries_scope_paging_and_time_bound() {
        let ctx = RequestContext::for_principal(Principal {
            id: "u1".to_string(),
            roles: vec![],
        });
        let policy = CompilePolicy {
            max_time: Some(Duration::from_millis(250)),
            ..CompilePolicy::new(&ctx)
        };
        let options = FindOptions::default().sorted_by("-score").skip(5).limit(10);
        let query = compile_query(&Filter::All, &options, &schema(), policy).unwrap();
        assert_eq!(query.sort, vec![("score".to_string(), -1)]);
        assert_eq!((query.skip, query.limit), (5, Some(10)));
        assert_eq!(query.max_time, Some(Duration::from_millis(250)));
        assert_eq!(query.filter, acl_filter(READ_PERM_KEY, &ctx));

        let overridden = compile_query(&Filter::All, &options.max_time_ms(50), &schema(), policy).unwrap();
        assert_eq!(overridden.max_time, Some(Duration::from_millis(50)));

        let root = RequestContext::privileged();
        let unscoped = compile_query(&Filter::All, &FindOptions::default(), &schema(), CompilePolicy::new(&root)).unwrap();
        assert_eq!(unscoped.filter, NativeFilter::All);
    }

    #[test]
    fn projection_keeps_system_keys_and_maps_pointers() {
        let ctx = RequestContext::anonymous();
        let options = FindOptions {
            keys: Some(vec!["author.name".to_string(), "likers".to_string(), "title".to_string()]),
            ..FindOptions::default()
        };
        let query = compile_query(&Filter::All, &options, &schema(), CompilePolicy::new(&ctx)).unwrap();
        let projection = query.projection.unwrap();
        assert!(projection.contains(&"_id".to_string()));
        assert!(projection.contains(&"_p_author".to_string()));
        assert!(projection.contains(&"title".to_string()));
        assert!(!projection.contains(&"likers".to_string()));
    }
}
