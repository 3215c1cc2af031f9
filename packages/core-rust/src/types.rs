use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::error::{EngineError, EngineResult};

/// Reference to a single object in another class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pointer {
    pub class_name: String,
    pub object_id: String,
}

impl Pointer {
    #[must_use]
    pub fn new(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: object_id.into(),
        }
    }
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Checks the coordinate ranges (`[-90, 90]` / `[-180, 180]`).
    ///
    /// # Errors
    ///
    /// Returns `SchemaViolation` when either coordinate is out of range or
    /// not finite.
    pub fn validate(&self) -> EngineResult<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(EngineError::SchemaViolation(format!(
                "GeoPoint latitude {} out of bounds",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(EngineError::SchemaViolation(format!(
                "GeoPoint longitude {} out of bounds",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// A stored file, referenced by name. URLs are derived by the files layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub name: String,
}

/// Read/write grant for one ACL subject (`*`, a user id, or `role:<name>`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AclAccess {
    pub read: bool,
    pub write: bool,
}

/// Access control list keyed by subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    pub entries: BTreeMap<String, AclAccess>,
}

impl Acl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An ACL granting read and write to everyone.
    #[must_use]
    pub fn public() -> Self {
        let mut acl = Self::new();
        acl.grant("*", true, true);
        acl
    }

    /// Sets the grant for `subject`, removing the entry when both flags are false.
    pub fn grant(&mut self, subject: &str, read: bool, write: bool) {
        if read || write {
            self.entries
                .insert(subject.to_string(), AclAccess { read, write });
        } else {
            self.entries.remove(subject);
        }
    }

    /// Subjects that may read.
    #[must_use]
    pub fn readers(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, access)| access.read)
            .map(|(subject, _)| subject.clone())
            .collect()
    }

    /// Subjects that may write.
    #[must_use]
    pub fn writers(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, access)| access.write)
            .map(|(subject, _)| subject.clone())
            .collect()
    }
}

/// A store-native value the codec does not interpret, carried through
/// unchanged so newer store types survive a read-modify-write cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawValue {
    pub kind: String,
    pub bytes: Vec<u8>,
}

/// Backend-agnostic value model.
///
/// Every variant is an explicit tag; shape inspection of `{"__type": ...}`
/// objects happens only at the REST-JSON boundary
/// ([`Value::from_rest_json`]) and inside the adapter codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    /// Base-64 encoded payload.
    Bytes(String),
    Pointer(Pointer),
    /// Reference to the join-set of related objects in `class_name`.
    Relation { class_name: String },
    GeoPoint(GeoPoint),
    /// Ring of points, kept exactly as given.
    Polygon(Vec<GeoPoint>),
    File(FileRef),
    Acl(Acl),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// A pointer that the reference resolver has replaced with the full object.
    Included(Box<Document>),
    Raw(RawValue),
}

impl Value {
    /// Short type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Boolean",
            Self::Int(_) | Self::Float(_) => "Number",
            Self::String(_) => "String",
            Self::Date(_) => "Date",
            Self::Bytes(_) => "Bytes",
            Self::Pointer(_) => "Pointer",
            Self::Relation { .. } => "Relation",
            Self::GeoPoint(_) => "GeoPoint",
            Self::Polygon(_) => "Polygon",
            Self::File(_) => "File",
            Self::Acl(_) => "ACL",
            Self::Array(_) => "Array",
            Self::Object(_) => "Object",
            Self::Included(_) => "Object",
            Self::Raw(_) => "Raw",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
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
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the pointer this value refers to, for plain pointers and
    /// already-included objects alike.
    #[must_use]
    pub fn as_pointer(&self) -> Option<Pointer> {
        match self {
            Self::Pointer(p) => Some(p.clone()),
            Self::Included(doc) => Some(doc.to_pointer()),
            _ => None,
        }
    }

    /// Renders the value in the REST JSON dialect (`{"__type": "Date", ...}`).
    #[must_use]
    pub fn to_rest_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => json!(i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Self::String(s) => Json::String(s.clone()),
            Self::Date(dt) => json!({ "__type": "Date", "iso": format_iso(dt) }),
            Self::Bytes(b64) => json!({ "__type": "Bytes", "base64": b64 }),
            Self::Pointer(p) => json!({
                "__type": "Pointer",
                "className": p.class_name,
                "objectId": p.object_id,
            }),
            Self::Relation { class_name } => json!({ "__type": "Relation", "className": class_name }),
            Self::GeoPoint(p) => json!({
                "__type": "GeoPoint",
                "latitude": p.latitude,
                "longitude": p.longitude,
            }),
            Self::Polygon(ring) => json!({
                "__type": "Polygon",
                "coordinates": ring.iter().map(|p| json!([p.latitude, p.longitude])).collect::<Vec<_>>(),
            }),
            Self::File(f) => json!({ "__type": "File", "name": f.name }),
            Self::Acl(acl) => acl_to_json(acl),
            Self::Array(items) => Json::Array(items.iter().map(Value::to_rest_json).collect()),
            Self::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_rest_json()))
                    .collect(),
            ),
            Self::Included(doc) => {
                let mut body = doc.to_rest_json();
                if let Json::Object(map) = &mut body {
                    map.insert("__type".to_string(), Json::String("Object".to_string()));
                }
                body
            }
            Self::Raw(raw) => json!({
                "__type": "Raw",
                "kind": raw.kind,
                "base64": STANDARD.encode(&raw.bytes),
            }),
        }
    }

    /// Parses a REST JSON value, recognising `__type` tags.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for malformed tagged objects (missing members,
    /// unparsable dates, invalid base-64).
    pub fn from_rest_json(json: &Json) -> EngineResult<Self> {
        match json {
            Json::Null => Ok(Self::Null),
            Json::Bool(b) => Ok(Self::Bool(*b)),
            Json::Number(n) => Ok(n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int)),
            Json::String(s) => Ok(Self::String(s.clone())),
            Json::Array(items) => items
                .iter()
                .map(Self::from_rest_json)
                .collect::<EngineResult<Vec<_>>>()
                .map(Self::Array),
            Json::Object(map) => match map.get("__type").and_then(Json::as_str) {
                Some(tag) => tagged_from_json(tag, map),
                None => map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::from_rest_json(v)?)))
                    .collect::<EngineResult<BTreeMap<_, _>>>()
                    .map(Self::Object),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Pointer> for Value {
    fn from(p: Pointer) -> Self {
        Self::Pointer(p)
    }
}

/// A decoded object owned by one class.
///
/// `object_id` is assigned at creation and never changes afterwards. The
/// `ACL` lives in `fields` as a [`Value::Acl`].
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub class_name: String,
    pub object_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub fields: BTreeMap<String, Value>,
}

impl Document {
    #[must_use]
    pub fn new(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: object_id.into(),
            created_at: None,
            updated_at: None,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    #[must_use]
    pub fn to_pointer(&self) -> Pointer {
        Pointer::new(self.class_name.clone(), self.object_id.clone())
    }

    #[must_use]
    pub fn to_rest_json(&self) -> Json {
        let mut map = JsonMap::new();
        map.insert("className".to_string(), Json::String(self.class_name.clone()));
        map.insert("objectId".to_string(), Json::String(self.object_id.clone()));
        if let Some(created) = &self.created_at {
            map.insert("createdAt".to_string(), Json::String(format_iso(created)));
        }
        if let Some(updated) = &self.updated_at {
            map.insert("updatedAt".to_string(), Json::String(format_iso(updated)));
        }
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_rest_json());
        }
        Json::Object(map)
    }

    /// Parses a REST JSON object into a document of `class_name`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` when the body is not an object or contains
    /// malformed tagged values or timestamps.
    pub fn from_rest_json(class_name: &str, json: &Json) -> EngineResult<Self> {
        let Json::Object(map) = json else {
            return Err(EngineError::InvalidQuery("document body must be an object".into()));
        };
        let mut doc = Self::new(
            class_name,
            map.get("objectId").and_then(Json::as_str).unwrap_or_default(),
        );
        for (key, value) in map {
            match key.as_str() {
                "objectId" | "className" | "__type" => {}
                "createdAt" => doc.created_at = Some(parse_iso_json(value)?),
                "updatedAt" => doc.updated_at = Some(parse_iso_json(value)?),
                "ACL" => {
                    doc.fields
                        .insert(key.clone(), Value::Acl(acl_from_json(value)?));
                }
                _ => {
                    doc.fields.insert(key.clone(), Value::from_rest_json(value)?);
                }
            }
        }
        Ok(doc)
    }
}

/// Formats a timestamp the way the REST dialect does (millisecond precision, `Z`).
#[must_use]
pub fn format_iso(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 timestamp.
///
/// # Errors
///
/// Returns `InvalidQuery` for unparsable input.
pub fn parse_iso(s: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::InvalidQuery(format!("invalid ISO date '{s}': {e}")))
}

fn parse_iso_json(json: &Json) -> EngineResult<DateTime<Utc>> {
    match json {
        Json::String(s) => parse_iso(s),
        Json::Object(map) => map
            .get("iso")
            .and_then(Json::as_str)
            .ok_or_else(|| EngineError::InvalidQuery("Date is missing 'iso'".into()))
            .and_then(parse_iso),
        other => Err(EngineError::InvalidQuery(format!("invalid date: {other}"))),
    }
}

fn acl_to_json(acl: &Acl) -> Json {
    let mut map = JsonMap::new();
    for (subject, access) in &acl.entries {
        let mut grant = JsonMap::new();
        if access.read {
            grant.insert("read".to_string(), Json::Bool(true));
        }
        if access.write {
            grant.insert("write".to_string(), Json::Bool(true));
        }
        map.insert(subject.clone(), Json::Object(grant));
    }
    Json::Object(map)
}

fn acl_from_json(json: &Json) -> EngineResult<Acl> {
    let Json::Object(map) = json else {
        return Err(EngineError::InvalidQuery("ACL must be an object".into()));
    };
    let mut acl = Acl::new();
    for (subject, grant) in map {
        let read = grant.get("read").and_then(Json::as_bool).unwrap_or(false);
        let write = grant.get("write").and_then(Json::as_bool).unwrap_or(false);
        acl.grant(subject, read, write);
    }
    Ok(acl)
}

fn str_member<'a>(map: &'a JsonMap<String, Json>, tag: &str, key: &str) -> EngineResult<&'a str> {
    map.get(key)
        .and_then(Json::as_str)
        .ok_or_else(|| EngineError::InvalidQuery(format!("{tag} is missing '{key}'")))
}

fn f64_member(map: &JsonMap<String, Json>, tag: &str, key: &str) -> EngineResult<f64> {
    map.get(key)
        .and_then(Json::as_f64)
        .ok_or_else(|| EngineError::InvalidQuery(format!("{tag} is missing '{key}'")))
}

fn tagged_from_json(tag: &str, map: &JsonMap<String, Json>) -> EngineResult<Value> {
    match tag {
        "Date" => Ok(Value::Date(parse_iso(str_member(map, tag, "iso")?)?)),
        "Bytes" => {
            let b64 = str_member(map, tag, "base64")?;
            STANDARD
                .decode(b64)
                .map_err(|e| EngineError::InvalidQuery(format!("invalid base64: {e}")))?;
            Ok(Value::Bytes(b64.to_string()))
        }
        "Pointer" => Ok(Value::Pointer(Pointer::new(
            str_member(map, tag, "className")?,
            str_member(map, tag, "objectId")?,
        ))),
        "Relation" => Ok(Value::Relation {
            class_name: str_member(map, tag, "className")?.to_string(),
        }),
        "GeoPoint" => Ok(Value::GeoPoint(GeoPoint::new(
            f64_member(map, tag, "latitude")?,
            f64_member(map, tag, "longitude")?,
        ))),
        "Polygon" => {
            let coords = map
                .get("coordinates")
                .and_then(Json::as_array)
                .ok_or_else(|| EngineError::InvalidQuery("Polygon is missing 'coordinates'".into()))?;
            coords
                .iter()
                .map(|pair| match pair.as_array().map(Vec::as_slice) {
                    Some([lat, lng]) => match (lat.as_f64(), lng.as_f64()) {
                        (Some(lat), Some(lng)) => Ok(GeoPoint::new(lat, lng)),
                        _ => Err(EngineError::InvalidQuery("Polygon coordinate must be numeric".into())),
                    },
                    _ => Err(EngineError::InvalidQuery("Polygon coordinate must be a pair".into())),
                })
                .collect::<EngineResult<Vec<_>>>()
                .map(Value::Polygon)
        }
        "File" => Ok(Value::File(FileRef {
            name: str_member(map, tag, "name")?.to_string(),
        })),
        "Object" => {
            let class_name = str_member(map, tag, "className")?;
            Document::from_rest_json(class_name, &Json::Object(map.clone()))
                .map(|doc| Value::Included(Box::new(doc)))
        }
        "Raw" => {
            let bytes = STANDARD
                .decode(str_member(map, tag, "base64")?)
                .map_err(|e| EngineError::InvalidQuery(format!("invalid base64: {e}")))?;
            Ok(Value::Raw(RawValue {
                kind: str_member(map, tag, "kind")?.to_string(),
                bytes,
            }))
        }
        other => Err(EngineError::InvalidQuery(format!("unknown __type '{other}'"))),
    }
}
