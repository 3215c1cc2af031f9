//! Declarative filter tree and find options, as submitted by callers.

use regex::RegexBuilder;

use crate::error::{EngineError, EngineResult};
use crate::types::{GeoPoint, Pointer, Value};

/// Comparison operators for ordered constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Region for geo-within constraints.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoRegion {
    /// Axis-aligned box between the south-west and north-east corners.
    Box {
        south_west: GeoPoint,
        north_east: GeoPoint,
    },
    Polygon(Vec<GeoPoint>),
    /// Sphere around `center` with a radius in radians.
    CenterSphere { center: GeoPoint, radius: f64 },
}

/// A single constraint on one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Equality. On array fields this matches any element; on pointer
    /// fields it is pointer-equals.
    Equals(Value),
    NotEqual(Value),
    Compare(CompareOp, Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    /// Array field contains every listed value.
    ContainsAll(Vec<Value>),
    Exists(bool),
    Regex { pattern: String, options: String },
    /// Case-insensitive string equality.
    EqualsIgnoreCase(String),
    GeoWithin(GeoRegion),
    /// Relation field contains the given object.
    RelationContains(Pointer),
}

impl Constraint {
    /// Builds a regex constraint after checking the pattern compiles.
    ///
    /// Supported options are `i`, `m`, `s` and `x`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for an unknown option or an invalid pattern.
    pub fn regex(pattern: &str, options: &str) -> EngineResult<Self> {
        let mut builder = RegexBuilder::new(pattern);
        for opt in options.chars() {
            match opt {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => {
                    return Err(EngineError::InvalidQuery(format!(
                        "unsupported regex option '{other}'"
                    )))
                }
            };
        }
        builder
            .build()
            .map_err(|e| EngineError::InvalidQuery(format!("bad $regex: {e}")))?;
        Ok(Self::Regex {
            pattern: pattern.to_string(),
            options: options.to_string(),
        })
    }
}

/// Recursive filter tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// Matches every object.
    #[default]
    All,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Field {
        field: String,
        constraint: Constraint,
    },
    /// Objects contained in the relation `key` of `object`.
    RelatedTo { object: Pointer, key: String },
    /// Sandboxed server-side expression; gated by policy.
    Raw(String),
}

impl Filter {
    #[must_use]
    pub fn field(field: &str, constraint: Constraint) -> Self {
        Self::Field {
            field: field.to_string(),
            constraint,
        }
    }

    #[must_use]
    pub fn equals(field: &str, value: impl Into<Value>) -> Self {
        Self::field(field, Constraint::Equals(value.into()))
    }

    /// `objectId` equality, the most common lookup.
    #[must_use]
    pub fn object_id(id: &str) -> Self {
        Self::equals("objectId", id)
    }

    /// Combines two filters, flattening nested `And`s and dropping `All`.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Self::All, f) | (f, Self::All) => f,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), f) => {
                left.push(f);
                Self::And(left)
            }
            (f, Self::And(mut right)) => {
                right.insert(0, f);
                Self::And(right)
            }
            (l, r) => Self::And(vec![l, r]),
        }
    }
}

/// Sort direction for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    /// Parses `field` / `-field` notation.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(field) => Self {
                field: field.to_string(),
                descending: true,
            },
            None => Self {
                field: spec.to_string(),
                descending: false,
            },
        }
    }
}

/// Options accompanying a find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Vec<SortKey>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Projection; `None` returns every visible field.
    pub keys: Option<Vec<String>>,
    /// Overrides the configured query-time bound for this call.
    pub max_time_ms: Option<u64>,
    /// Dotted include paths expanded after the find.
    pub include: Vec<String>,
}

impl FindOptions {
    #[must_use]
    pub fn sorted_by(mut self, spec: &str) -> Self {
        self.sort.push(SortKey::parse(spec));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub fn include(mut self, path: &str) -> Self {
        self.include.push(path.to_string());
        self
    }

    #[must_use]
    pub fn max_time_ms(mut self, ms: u64) -> Self {
        self.max_time_ms = Some(ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_flattens_and_drops_all() {
        let f = Filter::All
            .and(Filter::equals("a", 1_i64))
            .and(Filter::equals("b", 2_i64))
            .and(Filter::All);
        let Filter::And(parts) = f else {
            panic!("expected And");
        };
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn regex_validates_pattern_and_options() {
        assert!(Constraint::regex("^ab+c$", "i").is_ok());
        assert!(matches!(
            Constraint::regex("(", ""),
            Err(EngineError::InvalidQuery(_))
        ));
        assert!(matches!(
            Constraint::regex("a", "q"),
            Err(EngineError::InvalidQuery(_))
        ));
    }

    #[test]
    fn sort_key_parse() {
        assert_eq!(
            SortKey::parse("-score"),
            SortKey {
                field: "score".to_string(),
                descending: true
            }
        );
        assert!(!SortKey::parse("name").descending);
    }
}
