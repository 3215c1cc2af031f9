//! Store-native value, query, update and index model.
//!
//! This is the document-store dialect every [`StoreDriver`](crate::store::StoreDriver)
//! speaks. The codec and the compilers produce it; drivers consume it.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// A document as the store holds it.
pub type NativeDocument = BTreeMap<String, NativeValue>;

/// Native value types.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Binary(Vec<u8>),
    Array(Vec<NativeValue>),
    Document(NativeDocument),
    /// Store types without a dedicated variant (decimal, timestamp, ...).
    Extended { kind: String, bytes: Vec<u8> },
}

impl NativeValue {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int64(_) => "long",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::DateTime(_) => "date",
            Self::Binary(_) => "binData",
            Self::Array(_) => "array",
            Self::Document(_) => "object",
            Self::Extended { .. } => "extended",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int64(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }
}

/// Resolves a dotted path inside a document. Array elements are not
/// traversed; callers that need array fan-out handle it themselves.
#[must_use]
pub fn get_path<'a>(doc: &'a NativeDocument, path: &str) -> Option<&'a NativeValue> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        match current {
            NativeValue::Document(inner) => current = inner.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// String comparison settings attached to queries and indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collation {
    pub locale: String,
    /// 1 = base letters, 2 = plus accents (case-insensitive), 3 = plus case.
    pub strength: u8,
}

impl Collation {
    /// Locale `en_US` at strength 2: case-insensitive equality.
    #[must_use]
    pub fn case_insensitive() -> Self {
        Self {
            locale: "en_US".to_string(),
            strength: 2,
        }
    }

    #[must_use]
    pub fn ignores_case(&self) -> bool {
        self.strength <= 2
    }
}

/// Geo region in native `[lng, lat]` order.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeGeoRegion {
    Box {
        bottom_left: (f64, f64),
        upper_right: (f64, f64),
    },
    Polygon(Vec<(f64, f64)>),
    CenterSphere {
        center: (f64, f64),
        radius: f64,
    },
}

/// Condition on one native path.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCond {
    Eq(NativeValue),
    Ne(NativeValue),
    Gt(NativeValue),
    Gte(NativeValue),
    Lt(NativeValue),
    Lte(NativeValue),
    In(Vec<NativeValue>),
    Nin(Vec<NativeValue>),
    All(Vec<NativeValue>),
    Exists(bool),
    Regex { pattern: String, options: String },
    GeoWithin(NativeGeoRegion),
}

/// Native predicate tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NativeFilter {
    #[default]
    All,
    And(Vec<NativeFilter>),
    Or(Vec<NativeFilter>),
    Nor(Vec<NativeFilter>),
    Field {
        path: String,
        cond: NativeCond,
    },
    /// Sandboxed server-side expression.
    Where {
        script: String,
    },
}

impl NativeFilter {
    #[must_use]
    pub fn field(path: &str, cond: NativeCond) -> Self {
        Self::Field {
            path: path.to_string(),
            cond,
        }
    }

    /// `_id` equality.
    #[must_use]
    pub fn id(object_id: &str) -> Self {
        Self::field("_id", NativeCond::Eq(NativeValue::str(object_id)))
    }

    /// `_id ∈ ids`.
    #[must_use]
    pub fn id_in<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::field(
            "_id",
            NativeCond::In(ids.into_iter().map(|id| NativeValue::String(id.into())).collect()),
        )
    }

    /// Conjunction that drops `All` operands and flattens nested `And`s.
    #[must_use]
    pub fn and(self, other: NativeFilter) -> Self {
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
            (l, r) => Self::And(vec![l, r]),
        }
    }
}

/// A compiled find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeQuery {
    pub filter: NativeFilter,
    /// `(path, 1 | -1)` in priority order.
    pub sort: Vec<(String, i32)>,
    pub skip: u64,
    pub limit: Option<u64>,
    /// Native paths to keep; `_id` is always returned.
    pub projection: Option<Vec<String>>,
    pub collation: Option<Collation>,
    /// The store aborts the query with `OperationExceededTimeLimit` past this.
    pub max_time: Option<Duration>,
}

impl NativeQuery {
    #[must_use]
    pub fn new(filter: NativeFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }
}

/// Atomic update instruction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeUpdate {
    pub set: BTreeMap<String, NativeValue>,
    pub unset: BTreeSet<String>,
    pub inc: BTreeMap<String, NativeValue>,
    pub push_all: BTreeMap<String, Vec<NativeValue>>,
    pub add_to_set: BTreeMap<String, Vec<NativeValue>>,
    pub pull_all: BTreeMap<String, Vec<NativeValue>>,
    /// Applied only when an upsert inserts.
    pub set_on_insert: BTreeMap<String, NativeValue>,
}

impl NativeUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.unset.is_empty()
            && self.inc.is_empty()
            && self.push_all.is_empty()
            && self.add_to_set.is_empty()
            && self.pull_all.is_empty()
            && self.set_on_insert.is_empty()
    }

    /// Every path this update touches, with the operator touching it.
    #[must_use]
    pub fn touched_paths(&self) -> Vec<(&str, &'static str)> {
        let mut out: Vec<(&str, &'static str)> = Vec::new();
        out.extend(self.set.keys().map(|k| (k.as_str(), "$set")));
        out.extend(self.unset.iter().map(|k| (k.as_str(), "$unset")));
        out.extend(self.inc.keys().map(|k| (k.as_str(), "$inc")));
        out.extend(self.push_all.keys().map(|k| (k.as_str(), "$push")));
        out.extend(self.add_to_set.keys().map(|k| (k.as_str(), "$addToSet")));
        out.extend(self.pull_all.keys().map(|k| (k.as_str(), "$pullAll")));
        out.extend(self.set_on_insert.keys().map(|k| (k.as_str(), "$setOnInsert")));
        out
    }
}

/// Native secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeIndex {
    pub name: String,
    pub keys: Vec<(String, i32)>,
    pub unique: bool,
    /// Documents missing every indexed path are not indexed.
    pub sparse: bool,
    pub collation: Option<Collation>,
}

impl NativeIndex {
    /// True when both indexes would enforce and serve the same lookups.
    #[must_use]
    pub fn same_definition(&self, other: &NativeIndex) -> bool {
        self.keys == other.keys
            && self.unique == other.unique
            && self.sparse == other.sparse
            && self.collation == other.collation
    }
}
