//! Field-level value encoding.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tessera_core::{Acl, EngineError, EngineResult, FieldType, FileRef, GeoPoint, Pointer, RawValue, Value};

use crate::native::{NativeDocument, NativeValue};

const TYPE_TAG: &str = "__type";

/// Compound pointer key `Class$objectId`.
#[must_use]
pub fn pointer_key(pointer: &Pointer) -> String {
    format!("{}${}", pointer.class_name, pointer.object_id)
}

/// Splits a compound pointer key.
///
/// # Errors
///
/// Returns `DataCorruption` when the key has no `$` or an empty half.
pub fn parse_pointer_key(key: &str) -> EngineResult<Pointer> {
    match key.split_once('$') {
        Some((class, id)) if !class.is_empty() && !id.is_empty() => Ok(Pointer::new(class, id)),
        _ => Err(EngineError::DataCorruption(format!(
            "malformed pointer key '{key}'"
        ))),
    }
}

/// Encodes `value` for a field declared as `ty`.
///
/// # Errors
///
/// Returns `TypeMismatch` when the value does not fit the declared type
/// (field name left empty for the caller to attach), `SchemaViolation` for
/// out-of-range geo points and `InvalidKeyName` for nested object keys the
/// store cannot hold.
pub fn encode(value: &Value, ty: &FieldType) -> EngineResult<NativeValue> {
    let mismatch = || EngineError::type_mismatch(ty.to_string(), value.type_name());
    match (ty, value) {
        (_, Value::Null) => Ok(NativeValue::Null),
        (FieldType::String, Value::String(s)) => Ok(NativeValue::String(s.clone())),
        (FieldType::Number, Value::Int(i)) => Ok(NativeValue::Int64(*i)),
        (FieldType::Number, Value::Float(f)) => Ok(NativeValue::Double(*f)),
        (FieldType::Boolean, Value::Bool(b)) => Ok(NativeValue::Bool(*b)),
        (FieldType::Date, Value::Date(dt)) => Ok(NativeValue::DateTime(*dt)),
        (FieldType::Bytes, Value::Bytes(b64)) => decode_base64(b64).map(NativeValue::Binary),
        (FieldType::File, Value::File(file)) => Ok(NativeValue::String(file.name.clone())),
        (FieldType::GeoPoint, Value::GeoPoint(point)) => {
            point.validate()?;
            Ok(geo_pair(point))
        }
        (FieldType::Polygon, Value::Polygon(ring)) => encode_polygon(ring),
        (FieldType::Pointer { target_class }, v) => match v.as_pointer() {
            Some(p) if p.class_name == *target_class => Ok(NativeValue::String(pointer_key(&p))),
            _ => Err(mismatch()),
        },
        (FieldType::Relation { target_class }, Value::Relation { class_name })
            if class_name == target_class =>
        {
            Ok(tagged("Relation", [("className", NativeValue::str(class_name))]))
        }
        (FieldType::Acl, Value::Acl(acl)) => Ok(NativeValue::Document(encode_acl(acl))),
        (FieldType::Object, Value::Object(_)) | (FieldType::Array, Value::Array(_)) => {
            encode_schemaless(value)
        }
        _ => Err(mismatch()),
    }
}

/// Decodes a native value stored under a field declared as `ty`.
///
/// A native value whose shape does not match the declared type is decoded
/// by structure instead, so unfamiliar store data survives.
///
/// # Errors
///
/// Returns `DataCorruption` for malformed pointer keys.
pub fn decode(native: &NativeValue, ty: &FieldType) -> EngineResult<Value> {
    match (ty, native) {
        (_, NativeValue::Null) => Ok(Value::Null),
        (FieldType::String, NativeValue::String(s)) => Ok(Value::String(s.clone())),
        (FieldType::Number, NativeValue::Int64(i)) => Ok(Value::Int(*i)),
        (FieldType::Number, NativeValue::Double(f)) => Ok(Value::Float(*f)),
        (FieldType::Boolean, NativeValue::Bool(b)) => Ok(Value::Bool(*b)),
        (FieldType::Date, NativeValue::DateTime(dt)) => Ok(Value::Date(*dt)),
        (FieldType::Bytes, NativeValue::Binary(bytes)) => Ok(Value::Bytes(STANDARD.encode(bytes))),
        (FieldType::File, NativeValue::String(name)) => Ok(Value::File(FileRef { name: name.clone() })),
        (FieldType::Pointer { .. }, NativeValue::String(key)) => {
            parse_pointer_key(key).map(Value::Pointer)
        }
        (FieldType::GeoPoint, NativeValue::Array(pair)) => match decode_geo_pair(pair) {
            Some(point) => Ok(Value::GeoPoint(point)),
            None => decode_schemaless(native),
        },
        (FieldType::Polygon, NativeValue::Document(doc)) => match decode_polygon(doc) {
            Some(ring) => Ok(Value::Polygon(ring)),
            None => decode_schemaless(native),
        },
        (FieldType::Acl, NativeValue::Document(doc)) => Ok(Value::Acl(decode_acl(doc))),
        _ => decode_schemaless(native),
    }
}

/// Encodes a value with no declared type (inside Object/Array fields, or
/// for undeclared internal fields). Reference-like values become tagged
/// sub-documents so they can be recovered on decode.
///
/// # Errors
///
/// Returns `InvalidKeyName` for object keys the store cannot hold and
/// `InvalidQuery` for invalid base-64 payloads.
pub fn encode_schemaless(value: &Value) -> EngineResult<NativeValue> {
    Ok(match value {
        Value::Null => NativeValue::Null,
        Value::Bool(b) => NativeValue::Bool(*b),
        Value::Int(i) => NativeValue::Int64(*i),
        Value::Float(f) => NativeValue::Double(*f),
        Value::String(s) => NativeValue::String(s.clone()),
        Value::Date(dt) => NativeValue::DateTime(*dt),
        Value::Bytes(b64) => NativeValue::Binary(decode_base64(b64)?),
        Value::Pointer(p) => encode_pointer_tag(p),
        Value::Included(doc) => encode_pointer_tag(&doc.to_pointer()),
        Value::Relation { class_name } => {
            tagged("Relation", [("className", NativeValue::str(class_name))])
        }
        Value::GeoPoint(p) => tagged(
            "GeoPoint",
            [
                ("latitude", NativeValue::Double(p.latitude)),
                ("longitude", NativeValue::Double(p.longitude)),
            ],
        ),
        Value::Polygon(ring) => tagged(
            "Polygon",
            [(
                "coordinates",
                NativeValue::Array(
                    ring.iter()
                        .map(|p| {
                            NativeValue::Array(vec![
                                NativeValue::Double(p.latitude),
                                NativeValue::Double(p.longitude),
                            ])
                        })
                        .collect(),
                ),
            )],
        ),
        Value::File(file) => tagged("File", [("name", NativeValue::str(&file.name))]),
        Value::Acl(acl) => tagged("ACL", [("entries", NativeValue::Document(encode_acl(acl)))]),
        Value::Array(items) => NativeValue::Array(
            items
                .iter()
                .map(encode_schemaless)
                .collect::<EngineResult<Vec<_>>>()?,
        ),
        Value::Object(map) => {
            let mut doc = NativeDocument::new();
            for (key, item) in map {
                check_object_key(key)?;
                doc.insert(key.clone(), encode_schemaless(item)?);
            }
            NativeValue::Document(doc)
        }
        Value::Raw(raw) => NativeValue::Extended {
            kind: raw.kind.clone(),
            bytes: raw.bytes.clone(),
        },
    })
}

/// Decodes a native value by walking its actual structure, re-tagging
/// every native date and every tagged sub-document found at any depth.
///
/// # Errors
///
/// Returns `DataCorruption` for tagged sub-documents missing members.
pub fn decode_schemaless(native: &NativeValue) -> EngineResult<Value> {
    Ok(match native {
        NativeValue::Null => Value::Null,
        NativeValue::Bool(b) => Value::Bool(*b),
        NativeValue::Int64(i) => Value::Int(*i),
        NativeValue::Double(f) => Value::Float(*f),
        NativeValue::String(s) => Value::String(s.clone()),
        NativeValue::DateTime(dt) => Value::Date(*dt),
        NativeValue::Binary(bytes) => Value::Bytes(STANDARD.encode(bytes)),
        NativeValue::Array(items) => Value::Array(
            items
                .iter()
                .map(decode_schemaless)
                .collect::<EngineResult<Vec<_>>>()?,
        ),
        NativeValue::Document(doc) => match doc.get(TYPE_TAG).and_then(NativeValue::as_str) {
            Some(tag) => match decode_tagged(tag, doc)? {
                Some(value) => value,
                None => decode_plain_object(doc)?,
            },
            None => decode_plain_object(doc)?,
        },
        NativeValue::Extended { kind, bytes } => Value::Raw(RawValue {
            kind: kind.clone(),
            bytes: bytes.clone(),
        }),
    })
}

fn decode_plain_object(doc: &NativeDocument) -> EngineResult<Value> {
    doc.iter()
        .map(|(k, v)| Ok((k.clone(), decode_schemaless(v)?)))
        .collect::<EngineResult<BTreeMap<_, _>>>()
        .map(Value::Object)
}

/// Object keys may not start with `$`, contain `.` or shadow the type tag.
fn check_object_key(key: &str) -> EngineResult<()> {
    if key.starts_with('$') || key.contains('.') || key == TYPE_TAG {
        return Err(EngineError::InvalidKeyName(key.to_string()));
    }
    Ok(())
}

fn decode_base64(b64: &str) -> EngineResult<Vec<u8>> {
    STANDARD
        .decode(b64)
        .map_err(|e| EngineError::InvalidQuery(format!("invalid base64 payload: {e}")))
}

fn tagged<const N: usize>(tag: &str, members: [(&str, NativeValue); N]) -> NativeValue {
    let mut doc = NativeDocument::new();
    doc.insert(TYPE_TAG.to_string(), NativeValue::str(tag));
    for (key, value) in members {
        doc.insert(key.to_string(), value);
    }
    NativeValue::Document(doc)
}

fn encode_pointer_tag(p: &Pointer) -> NativeValue {
    tagged(
        "Pointer",
        [
            ("className", NativeValue::str(&p.class_name)),
            ("objectId", NativeValue::str(&p.object_id)),
        ],
    )
}

fn member_str<'a>(doc: &'a NativeDocument, tag: &str, key: &str) -> EngineResult<&'a str> {
    doc.get(key)
        .and_then(NativeValue::as_str)
        .ok_or_else(|| EngineError::DataCorruption(format!("{tag} sub-document is missing '{key}'")))
}

fn member_f64(doc: &NativeDocument, tag: &str, key: &str) -> EngineResult<f64> {
    doc.get(key)
        .and_then(NativeValue::as_f64)
        .ok_or_else(|| EngineError::DataCorruption(format!("{tag} sub-document is missing '{key}'")))
}

/// Returns `None` for tags this codec does not know, which are then kept as
/// plain objects.
fn decode_tagged(tag: &str, doc: &NativeDocument) -> EngineResult<Option<Value>> {
    Ok(Some(match tag {
        "Pointer" => Value::Pointer(Pointer::new(
            member_str(doc, tag, "className")?,
            member_str(doc, tag, "objectId")?,
        )),
        "Relation" => Value::Relation {
            class_name: member_str(doc, tag, "className")?.to_string(),
        },
        "GeoPoint" => Value::GeoPoint(GeoPoint::new(
            member_f64(doc, tag, "latitude")?,
            member_f64(doc, tag, "longitude")?,
        )),
        "Polygon" => {
            let Some(NativeValue::Array(coords)) = doc.get("coordinates") else {
                return Err(EngineError::DataCorruption(
                    "Polygon sub-document is missing 'coordinates'".into(),
                ));
            };
            let ring = coords
                .iter()
                .map(|pair| match pair {
                    NativeValue::Array(p) => match p.as_slice() {
                        [lat, lng] => lat.as_f64().zip(lng.as_f64()).map(|(lat, lng)| GeoPoint::new(lat, lng)),
                        _ => None,
                    },
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| EngineError::DataCorruption("malformed Polygon coordinates".into()))?;
            Value::Polygon(ring)
        }
        "File" => Value::File(FileRef {
            name: member_str(doc, tag, "name")?.to_string(),
        }),
        "ACL" => match doc.get("entries") {
            Some(NativeValue::Document(entries)) => Value::Acl(decode_acl(entries)),
            _ => return Err(EngineError::DataCorruption("ACL sub-document is missing 'entries'".into())),
        },
        _ => return Ok(None),
    }))
}

/// GeoPoints are stored as `[lng, lat]`.
fn geo_pair(point: &GeoPoint) -> NativeValue {
    NativeValue::Array(vec![
        NativeValue::Double(point.longitude),
        NativeValue::Double(point.latitude),
    ])
}

fn decode_geo_pair(pair: &[NativeValue]) -> Option<GeoPoint> {
    match pair {
        [lng, lat] => Some(GeoPoint::new(lat.as_f64()?, lng.as_f64()?)),
        _ => None,
    }
}

/// Polygons are stored as GeoJSON: `{type: "Polygon", coordinates: [[[lng, lat], ...]]}`.
/// The ring is stored exactly as given; closing it is left to the caller.
fn encode_polygon(ring: &[GeoPoint]) -> EngineResult<NativeValue> {
    if ring.len() < 3 {
        return Err(EngineError::SchemaViolation(
            "Polygon must have at least 3 points".into(),
        ));
    }
    for point in ring {
        point.validate()?;
    }
    let mut doc = NativeDocument::new();
    doc.insert("type".to_string(), NativeValue::str("Polygon"));
    doc.insert(
        "coordinates".to_string(),
        NativeValue::Array(vec![NativeValue::Array(ring.iter().map(geo_pair).collect())]),
    );
    Ok(NativeValue::Document(doc))
}

fn decode_polygon(doc: &NativeDocument) -> Option<Vec<GeoPoint>> {
    if doc.get("type").and_then(NativeValue::as_str) != Some("Polygon") {
        return None;
    }
    let NativeValue::Array(rings) = doc.get("coordinates")? else {
        return None;
    };
    let NativeValue::Array(ring) = rings.first()? else {
        return None;
    };
    ring.iter()
        .map(|pair| match pair {
            NativeValue::Array(p) => decode_geo_pair(p),
            _ => None,
        })
        .collect()
}

/// `{subject: {r: true, w: true}}`.
pub(crate) fn encode_acl(acl: &Acl) -> NativeDocument {
    acl.entries
        .iter()
        .map(|(subject, access)| {
            let mut grant = NativeDocument::new();
            if access.read {
                grant.insert("r".to_string(), NativeValue::Bool(true));
            }
            if access.write {
                grant.insert("w".to_string(), NativeValue::Bool(true));
            }
            (subject.clone(), NativeValue::Document(grant))
        })
        .collect()
}

pub(crate) fn decode_acl(doc: &NativeDocument) -> Acl {
    let mut acl = Acl::new();
    for (subject, grant) in doc {
        if let NativeValue::Document(grant) = grant {
            let flag = |k: &str| matches!(grant.get(k), Some(NativeValue::Bool(true)));
            acl.grant(subject, flag("r"), flag("w"));
        }
    }
    acl
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    use super::*;

    fn date(secs: i64) -> Value {
        Value::Date(Utc.timestamp_opt(secs, 0).single().unwrap())
    }

    #[test]
    fn pointer_key_round_trip() {
        let p = Pointer::new("_User", "abc123");
        assert_eq!(pointer_key(&p), "_User$abc123");
        assert_eq!(parse_pointer_key("_User$abc123").unwrap(), p);
    }

    #[test]
    fn malformed_pointer_key_is_corruption() {
        let ty = FieldType::Pointer {
            target_class: "_User".to_string(),
        };
        for bad in ["nodollar", "$abc", "_User$"] {
            let err = decode(&NativeValue::str(bad), &ty).unwrap_err();
            assert!(matches!(err, EngineError::DataCorruption(_)), "{bad}");
        }
    }

    #[test]
    fn pointer_to_wrong_class_is_type_mismatch() {
        let ty = FieldType::Pointer {
            target_class: "_User".to_string(),
        };
        let err = encode(&Value::Pointer(Pointer::new("Post", "p1")), &ty).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { .. }));
    }

    #[test]
    fn unsupported_combination_fails_fast() {
        let err = encode(&Value::String("12".into()), &FieldType::Number).unwrap_err();
        assert_eq!(
            err,
            EngineError::type_mismatch("Number", "String")
        );
    }

    #[test]
    fn geopoint_is_stored_lng_lat() {
        let native = encode(&Value::GeoPoint(GeoPoint::new(10.0, 20.0)), &FieldType::GeoPoint).unwrap();
        assert_eq!(
            native,
            NativeValue::Array(vec![NativeValue::Double(20.0), NativeValue::Double(10.0)])
        );
        assert_eq!(
            decode(&native, &FieldType::GeoPoint).unwrap(),
            Value::GeoPoint(GeoPoint::new(10.0, 20.0))
        );
    }

    #[test]
    fn polygon_ring_kept_exactly() {
        let ring = vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(1.0, 1.0),
        ];
        let native = encode(&Value::Polygon(ring.clone()), &FieldType::Polygon).unwrap();
        assert_eq!(decode(&native, &FieldType::Polygon).unwrap(), Value::Polygon(ring));
    }

    #[test]
    fn unknown_native_types_pass_through() {
        let native = NativeValue::Extended {
            kind: "decimal128".to_string(),
            bytes: vec![1, 2, 3],
        };
        let decoded = decode(&native, &FieldType::Object).unwrap();
        assert_eq!(
            decoded,
            Value::Raw(RawValue {
                kind: "decimal128".to_string(),
                bytes: vec![1, 2, 3],
            })
        );
        assert_eq!(encode_schemaless(&decoded).unwrap(), native);
    }

    #[test]
    fn reserved_object_keys_are_rejected() {
        for key in ["$where", "a.b", "__type"] {
            let value = Value::Object(BTreeMap::from([(key.to_string(), Value::Int(1))]));
            assert!(matches!(
                encode(&value, &FieldType::Object),
                Err(EngineError::InvalidKeyName(_))
            ));
        }
    }

    #[test]
    fn nested_dates_keep_their_tag() {
        let value = Value::Object(BTreeMap::from([(
            "a".to_string(),
            Value::Array(vec![Value::Object(BTreeMap::from([(
                "b".to_string(),
                Value::Array(vec![date(1_700_000_000)]),
            )]))]),
        )]));
        let native = encode(&value, &FieldType::Object).unwrap();
        assert_eq!(decode(&native, &FieldType::Object).unwrap(), value);
    }

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (-1.0e9..1.0e9f64).prop_map(Value::Float),
            "[a-z0-9 ]{0,12}".prop_map(Value::String),
            (0i64..4_000_000_000).prop_map(date),
            proptest::collection::vec(any::<u8>(), 0..8).prop_map(|b| Value::Bytes(STANDARD.encode(b))),
            ("[A-Z][a-z]{1,6}", "[a-zA-Z0-9]{10}")
                .prop_map(|(c, id)| Value::Pointer(Pointer::new(c, id))),
            ((-90.0..90.0f64), (-180.0..180.0f64))
                .prop_map(|(lat, lng)| Value::GeoPoint(GeoPoint::new(lat, lng))),
        ]
    }

    fn nested() -> impl Strategy<Value = Value> {
        scalar().prop_recursive(4, 48, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                proptest::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Object),
            ]
        })
    }

    /// Wraps a date at depth 3: object → array → object → date.
    fn with_deep_date(v: Value, secs: i64) -> Value {
        let deep = Value::Object(BTreeMap::from([
            ("when".to_string(), date(secs)),
            ("other".to_string(), v),
        ]));
        Value::Object(BTreeMap::from([(
            "outer".to_string(),
            Value::Array(vec![deep]),
        )]))
    }

    proptest! {
        #[test]
        fn object_round_trip_keeps_nested_dates(v in nested(), secs in 0i64..4_000_000_000) {
            let value = with_deep_date(v, secs);
            let native = encode(&value, &FieldType::Object).unwrap();
            prop_assert_eq!(decode(&native, &FieldType::Object).unwrap(), value);
        }

        #[test]
        fn array_round_trip(items in proptest::collection::vec(nested(), 0..5)) {
            let value = Value::Array(items);
            let native = encode(&value, &FieldType::Array).unwrap();
            prop_assert_eq!(decode(&native, &FieldType::Array).unwrap(), value);
        }

        #[test]
        fn typed_scalar_round_trip(secs in 0i64..4_000_000_000, n in any::<i64>(), s in ".{0,16}") {
            let cases: Vec<(Value, FieldType)> = vec![
                (date(secs), FieldType::Date),
                (Value::Int(n), FieldType::Number),
                (Value::String(s), FieldType::String),
            ];
            for (value, ty) in cases {
                let native = encode(&value, &ty).unwrap();
                prop_assert_eq!(decode(&native, &ty).unwrap(), value);
            }
        }
    }

    #[test]
    fn date_decodes_from_datetime_only() {
        let dt: DateTime<Utc> = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let native = NativeValue::DateTime(dt);
        assert_eq!(decode(&native, &FieldType::Date).unwrap(), Value::Date(dt));
    }
}
