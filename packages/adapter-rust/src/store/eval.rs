//! Native predicate, sort, projection and update evaluation for [`MemoryStore`](super::MemoryStore).
//!
//! Paths fan out through arrays the way document stores do: `tags` equal to
//! `"a"` matches `{tags: ["a", "b"]}`, and `items.sku` reaches into every
//! element of `items`.

use std::cmp::Ordering;
use std::time::Duration;

use regex::RegexBuilder;
use tessera_core::{EngineError, EngineResult};

use super::sandbox;
use crate::native::{
    Collation, NativeCond, NativeDocument, NativeFilter, NativeGeoRegion, NativeIndex, NativeUpdate,
    NativeValue,
};

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

fn fold_case(s: &str, collation: Option<&Collation>) -> String {
    match collation {
        Some(c) if c.ignores_case() => s.to_lowercase(),
        _ => s.to_string(),
    }
}

/// Equality with numeric widening and optional case folding.
#[must_use]
pub fn values_equal(a: &NativeValue, b: &NativeValue, collation: Option<&Collation>) -> bool {
    match (a, b) {
        (NativeValue::String(x), NativeValue::String(y)) => {
            fold_case(x, collation) == fold_case(y, collation)
        }
        (NativeValue::Int64(_) | NativeValue::Double(_), NativeValue::Int64(_) | NativeValue::Double(_)) => {
            a.as_f64() == b.as_f64()
        }
        (NativeValue::Array(x), NativeValue::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r, collation))
        }
        _ => a == b,
    }
}

/// Ordering between values of comparable types; `None` across types.
#[must_use]
pub fn compare_values(a: &NativeValue, b: &NativeValue, collation: Option<&Collation>) -> Option<Ordering> {
    match (a, b) {
        (NativeValue::Int64(x), NativeValue::Int64(y)) => Some(x.cmp(y)),
        (NativeValue::Int64(_) | NativeValue::Double(_), NativeValue::Int64(_) | NativeValue::Double(_)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (NativeValue::String(x), NativeValue::String(y)) => {
            Some(fold_case(x, collation).cmp(&fold_case(y, collation)))
        }
        (NativeValue::DateTime(x), NativeValue::DateTime(y)) => Some(x.cmp(y)),
        (NativeValue::Bool(x), NativeValue::Bool(y)) => Some(x.cmp(y)),
        (NativeValue::Null, NativeValue::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Cross-type sort rank (null < numbers < strings < objects < arrays < binary < bool < date).
fn type_rank(v: &NativeValue) -> u8 {
    match v {
        NativeValue::Null => 0,
        NativeValue::Int64(_) | NativeValue::Double(_) => 1,
        NativeValue::String(_) => 2,
        NativeValue::Document(_) => 3,
        NativeValue::Array(_) => 4,
        NativeValue::Binary(_) => 5,
        NativeValue::Bool(_) => 6,
        NativeValue::DateTime(_) => 7,
        NativeValue::Extended { .. } => 8,
    }
}

fn sort_cmp(a: &NativeValue, b: &NativeValue, collation: Option<&Collation>) -> Ordering {
    compare_values(a, b, collation).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

fn collect<'a>(value: &'a NativeValue, segments: &[&str], out: &mut Vec<&'a NativeValue>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        NativeValue::Document(doc) => {
            if let Some(child) = doc.get(*head) {
                collect(child, rest, out);
            }
        }
        NativeValue::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    collect(item, rest, out);
                }
            } else {
                for item in items {
                    if matches!(item, NativeValue::Document(_)) {
                        collect(item, segments, out);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Every value reachable at `path`, fanning out through arrays.
#[must_use]
pub fn path_values<'a>(doc: &'a NativeDocument, path: &str) -> Vec<&'a NativeValue> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = doc.get(*head) {
            collect(value, rest, &mut out);
        }
    }
    out
}

/// Values plus the elements of array values.
fn candidates<'a>(values: &[&'a NativeValue]) -> Vec<&'a NativeValue> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        out.push(*value);
        if let NativeValue::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

fn eq_matches(values: &[&NativeValue], target: &NativeValue, collation: Option<&Collation>) -> bool {
    if matches!(target, NativeValue::Null) && values.is_empty() {
        return true;
    }
    candidates(values)
        .into_iter()
        .any(|v| values_equal(v, target, collation))
}

fn point_of(value: &NativeValue) -> Option<(f64, f64)> {
    match value {
        NativeValue::Array(pair) => match pair.as_slice() {
            [lng, lat] => Some((lng.as_f64()?, lat.as_f64()?)),
            _ => None,
        },
        _ => None,
    }
}

fn point_in_ring(point: (f64, f64), ring: &[(f64, f64)]) -> bool {
    let (x, y) = point;
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);
    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn haversine_radians(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lng1, lat1) = (a.0.to_radians(), a.1.to_radians());
    let (lng2, lat2) = (b.0.to_radians(), b.1.to_radians());
    let h = ((lat2 - lat1) / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * ((lng2 - lng1) / 2.0).sin().powi(2);
    2.0 * h.sqrt().asin()
}

fn in_region(point: (f64, f64), region: &NativeGeoRegion) -> bool {
    match region {
        NativeGeoRegion::Box {
            bottom_left,
            upper_right,
        } => {
            (bottom_left.0..=upper_right.0).contains(&point.0)
                && (bottom_left.1..=upper_right.1).contains(&point.1)
        }
        NativeGeoRegion::Polygon(ring) => point_in_ring(point, ring),
        NativeGeoRegion::CenterSphere { center, radius } => {
            haversine_radians(point, *center) <= *radius
        }
    }
}

fn cond_matches(
    values: &[&NativeValue],
    cond: &NativeCond,
    collation: Option<&Collation>,
) -> EngineResult<bool> {
    let ordered = |target: &NativeValue, accept: fn(Ordering) -> bool| {
        candidates(values)
            .into_iter()
            .any(|v| compare_values(v, target, collation).is_some_and(accept))
    };
    Ok(match cond {
        NativeCond::Eq(target) => eq_matches(values, target, collation),
        NativeCond::Ne(target) => !eq_matches(values, target, collation),
        NativeCond::Gt(target) => ordered(target, |o| o == Ordering::Greater),
        NativeCond::Gte(target) => ordered(target, |o| o != Ordering::Less),
        NativeCond::Lt(target) => ordered(target, |o| o == Ordering::Less),
        NativeCond::Lte(target) => ordered(target, |o| o != Ordering::Greater),
        NativeCond::In(targets) => targets.iter().any(|t| eq_matches(values, t, collation)),
        NativeCond::Nin(targets) => !targets.iter().any(|t| eq_matches(values, t, collation)),
        NativeCond::All(targets) => {
            !targets.is_empty() && targets.iter().all(|t| eq_matches(values, t, collation))
        }
        NativeCond::Exists(expected) => values.is_empty() != *expected,
        NativeCond::Regex { pattern, options } => {
            let re = RegexBuilder::new(pattern)
                .case_insensitive(options.contains('i'))
                .multi_line(options.contains('m'))
                .dot_matches_new_line(options.contains('s'))
                .ignore_whitespace(options.contains('x'))
                .build()
                .map_err(|e| EngineError::Store {
                    code: 51091,
                    message: format!("invalid regular expression: {e}"),
                })?;
            candidates(values)
                .into_iter()
                .any(|v| v.as_str().is_some_and(|s| re.is_match(s)))
        }
        NativeCond::GeoWithin(region) => values
            .iter()
            .filter_map(|v| point_of(v))
            .any(|p| in_region(p, region)),
    })
}

/// Evaluates `filter` against `doc`. Sandboxed delays are added to `delay`.
///
/// # Errors
///
/// Returns sandbox errors and `Store` errors for invalid regular expressions.
pub fn matches(
    doc: &NativeDocument,
    filter: &NativeFilter,
    collation: Option<&Collation>,
    delay: &mut Duration,
) -> EngineResult<bool> {
    match filter {
        NativeFilter::All => Ok(true),
        NativeFilter::And(parts) => {
            for part in parts {
                if !matches(doc, part, collation, delay)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        NativeFilter::Or(parts) => {
            for part in parts {
                if matches(doc, part, collation, delay)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        NativeFilter::Nor(parts) => {
            for part in parts {
                if matches(doc, part, collation, delay)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        NativeFilter::Field { path, cond } => cond_matches(&path_values(doc, path), cond, collation),
        NativeFilter::Where { script } => {
            let outcome = sandbox::evaluate(script, doc)?;
            *delay += outcome.delay;
            Ok(outcome.matched)
        }
    }
}

// ---------------------------------------------------------------------------
// Sort / projection
// ---------------------------------------------------------------------------

/// Sorts by `(path, direction)` keys; missing values sort as null.
pub fn sort_documents(docs: &mut [NativeDocument], sort: &[(String, i32)], collation: Option<&Collation>) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (path, direction) in sort {
            let left = path_values(a, path).first().copied().cloned().unwrap_or(NativeValue::Null);
            let right = path_values(b, path).first().copied().cloned().unwrap_or(NativeValue::Null);
            let ord = sort_cmp(&left, &right, collation);
            let ord = if *direction < 0 { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Keeps `_id` and the root segment of each projected path.
#[must_use]
pub fn project(doc: NativeDocument, projection: &[String]) -> NativeDocument {
    doc.into_iter()
        .filter(|(key, _)| {
            key == "_id"
                || projection
                    .iter()
                    .any(|p| p.split('.').next() == Some(key.as_str()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

fn path_conflict(path: &str) -> EngineError {
    EngineError::Store {
        code: 28,
        message: format!("cannot create field in element along path '{path}'"),
    }
}

fn parent_mut<'a, 'p>(doc: &'a mut NativeDocument, path: &'p str) -> EngineResult<(&'a mut NativeDocument, &'p str)> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop().unwrap_or(path);
    let mut current = doc;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| NativeValue::Document(NativeDocument::new()));
        current = match entry {
            NativeValue::Document(inner) => inner,
            _ => return Err(path_conflict(path)),
        };
    }
    Ok((current, leaf))
}

fn get_mut<'a>(doc: &'a mut NativeDocument, path: &str) -> Option<&'a mut NativeValue> {
    let mut segments = path.split('.');
    let mut current = doc.get_mut(segments.next()?)?;
    for segment in segments {
        current = match current {
            NativeValue::Document(inner) => inner.get_mut(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(doc: &mut NativeDocument, path: &str, value: NativeValue) -> EngineResult<()> {
    let (parent, leaf) = parent_mut(doc, path)?;
    parent.insert(leaf.to_string(), value);
    Ok(())
}

fn unset_path(doc: &mut NativeDocument, path: &str) {
    match path.rsplit_once('.') {
        Some((parent, leaf)) => {
            if let Some(NativeValue::Document(inner)) = get_mut(doc, parent) {
                inner.remove(leaf);
            }
        }
        None => {
            doc.remove(path);
        }
    }
}

fn add_numbers(path: &str, current: &NativeValue, amount: &NativeValue) -> EngineResult<NativeValue> {
    match (current, amount) {
        (NativeValue::Int64(a), NativeValue::Int64(b)) => a.checked_add(*b).map(NativeValue::Int64).ok_or_else(|| {
            EngineError::Store {
                code: 2,
                message: format!("integer overflow applying $inc to '{path}'"),
            }
        }),
        _ => match (current.as_f64(), amount.as_f64()) {
            (Some(a), Some(b)) => Ok(NativeValue::Double(a + b)),
            _ => Err(EngineError::Store {
                code: 14,
                message: format!("cannot apply $inc to non-numeric field '{path}'"),
            }),
        },
    }
}

fn array_at<'a>(doc: &'a mut NativeDocument, path: &str, op: &str) -> EngineResult<&'a mut Vec<NativeValue>> {
    let (parent, leaf) = parent_mut(doc, path)?;
    let slot = parent
        .entry(leaf.to_string())
        .or_insert_with(|| NativeValue::Array(Vec::new()));
    match slot {
        NativeValue::Array(items) => Ok(items),
        other => Err(EngineError::Store {
            code: 2,
            message: format!("cannot apply {op} to '{path}' of type {}", other.type_name()),
        }),
    }
}

/// Applies an update in place. `set_on_insert` applies only when `inserting`.
///
/// # Errors
///
/// Returns `Store` errors for path conflicts and operator/type mismatches.
pub fn apply_update(doc: &mut NativeDocument, update: &NativeUpdate, inserting: bool) -> EngineResult<()> {
    for (path, value) in &update.set {
        set_path(doc, path, value.clone())?;
    }
    for path in &update.unset {
        unset_path(doc, path);
    }
    for (path, amount) in &update.inc {
        let next = match get_mut(doc, path) {
            Some(current) => add_numbers(path, current, amount)?,
            None => amount.clone(),
        };
        set_path(doc, path, next)?;
    }
    for (path, values) in &update.push_all {
        array_at(doc, path, "$push")?.extend(values.iter().cloned());
    }
    for (path, values) in &update.add_to_set {
        let items = array_at(doc, path, "$addToSet")?;
        for value in values {
            if !items.iter().any(|existing| values_equal(existing, value, None)) {
                items.push(value.clone());
            }
        }
    }
    for (path, values) in &update.pull_all {
        if let Some(current) = get_mut(doc, path) {
            match current {
                NativeValue::Array(items) => {
                    items.retain(|item| !values.iter().any(|v| values_equal(item, v, None)));
                }
                other => {
                    return Err(EngineError::Store {
                        code: 2,
                        message: format!("cannot apply $pullAll to '{path}' of type {}", other.type_name()),
                    })
                }
            }
        }
    }
    if inserting {
        for (path, value) in &update.set_on_insert {
            set_path(doc, path, value.clone())?;
        }
    }
    Ok(())
}

/// The document an upsert starts from: every top-level equality condition.
#[must_use]
pub fn seed_from_filter(filter: &NativeFilter) -> NativeDocument {
    let mut seed = NativeDocument::new();
    let mut stack = vec![filter];
    while let Some(f) = stack.pop() {
        match f {
            NativeFilter::And(parts) => stack.extend(parts.iter()),
            NativeFilter::Field {
                path,
                cond: NativeCond::Eq(value),
            } if !path.contains('.') => {
                seed.insert(path.clone(), value.clone());
            }
            _ => {}
        }
    }
    seed
}

/// Key under a unique index, or `None` when the document is not indexed
/// (sparse index, every key path missing).
#[must_use]
pub fn index_key(doc: &NativeDocument, index: &NativeIndex) -> Option<Vec<NativeValue>> {
    let mut any_present = false;
    let key: Vec<NativeValue> = index
        .keys
        .iter()
        .map(|(path, _)| match path_values(doc, path).first() {
            Some(value) => {
                any_present = true;
                match (value, &index.collation) {
                    (NativeValue::String(s), Some(c)) if c.ignores_case() => NativeValue::String(s.to_lowercase()),
                    _ => (*value).clone(),
                }
            }
            None => NativeValue::Null,
        })
        .collect();
    if !any_present && index.sparse {
        return None;
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, NativeValue)]) -> NativeDocument {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn check(d: &NativeDocument, f: &NativeFilter) -> bool {
        let mut budget = Duration::ZERO;
        matches(d, f, None, &mut budget).unwrap()
    }

    #[test]
    fn equality_matches_array_elements() {
        let d = doc(&[(
            "tags",
            NativeValue::Array(vec![NativeValue::str("a"), NativeValue::str("b")]),
        )]);
        assert!(check(&d, &NativeFilter::field("tags", NativeCond::Eq(NativeValue::str("b")))));
        assert!(check(
            &d,
            &NativeFilter::field("tags", NativeCond::All(vec![NativeValue::str("a"), NativeValue::str("b")]))
        ));
        assert!(!check(&d, &NativeFilter::field("tags", NativeCond::Eq(NativeValue::str("c")))));
    }

    #[test]
    fn null_equality_matches_missing() {
        let d = doc(&[("a", NativeValue::Int64(1))]);
        assert!(check(&d, &NativeFilter::field("b", NativeCond::Eq(NativeValue::Null))));
        assert!(check(&d, &NativeFilter::field("b", NativeCond::Exists(false))));
        assert!(!check(&d, &NativeFilter::field("a", NativeCond::Exists(false))));
    }

    #[test]
    fn collation_folds_case() {
        let d = doc(&[("email", NativeValue::str("Ann@Example.com"))]);
        let f = NativeFilter::field("email", NativeCond::Eq(NativeValue::str("ann@example.com")));
        assert!(!check(&d, &f));
        let mut budget = Duration::ZERO;
        assert!(matches(&d, &f, Some(&Collation::case_insensitive()), &mut budget).unwrap());
    }

    #[test]
    fn numeric_comparison_widens() {
        let d = doc(&[("n", NativeValue::Double(2.5))]);
        assert!(check(&d, &NativeFilter::field("n", NativeCond::Gt(NativeValue::Int64(2)))));
        assert!(!check(&d, &NativeFilter::field("n", NativeCond::Lte(NativeValue::Int64(2)))));
    }

    #[test]
    fn geo_box_and_sphere() {
        let d = doc(&[(
            "loc",
            NativeValue::Array(vec![NativeValue::Double(10.0), NativeValue::Double(20.0)]),
        )]);
        let inside = NativeGeoRegion::Box {
            bottom_left: (0.0, 0.0),
            upper_right: (15.0, 25.0),
        };
        assert!(check(&d, &NativeFilter::field("loc", NativeCond::GeoWithin(inside))));
        let sphere = NativeGeoRegion::CenterSphere {
            center: (10.0, 20.0),
            radius: 0.01,
        };
        assert!(check(&d, &NativeFilter::field("loc", NativeCond::GeoWithin(sphere))));
        let ring = NativeGeoRegion::Polygon(vec![(0.0, 0.0), (0.0, 5.0), (5.0, 5.0), (5.0, 0.0)]);
        assert!(!check(&d, &NativeFilter::field("loc", NativeCond::GeoWithin(ring))));
    }

    #[test]
    fn update_operators() {
        let mut d = doc(&[
            ("n", NativeValue::Int64(1)),
            (
                "list",
                NativeValue::Array(vec![NativeValue::Int64(1), NativeValue::Int64(2), NativeValue::Int64(1)]),
            ),
        ]);
        let mut update = NativeUpdate::default();
        update.inc.insert("n".to_string(), NativeValue::Int64(2));
        update.pull_all.insert("list".to_string(), vec![NativeValue::Int64(1)]);
        update
            .add_to_set
            .insert("set".to_string(), vec![NativeValue::str("x"), NativeValue::str("x")]);
        update.set.insert("profile.city".to_string(), NativeValue::str("Oslo"));
        update.set_on_insert.insert("created".to_string(), NativeValue::Bool(true));
        apply_update(&mut d, &update, false).unwrap();

        assert_eq!(d["n"], NativeValue::Int64(3));
        assert_eq!(d["list"], NativeValue::Array(vec![NativeValue::Int64(2)]));
        assert_eq!(d["set"], NativeValue::Array(vec![NativeValue::str("x")]));
        assert!(!d.contains_key("created"));
        let NativeValue::Document(profile) = &d["profile"] else {
            panic!("expected subdocument");
        };
        assert_eq!(profile["city"], NativeValue::str("Oslo"));
    }

    #[test]
    fn array_operators_on_dotted_paths() {
        let mut d = doc(&[("title", NativeValue::str("t"))]);
        let mut update = NativeUpdate::default();
        update
            .push_all
            .insert("meta.tags".to_string(), vec![NativeValue::str("a"), NativeValue::str("a")]);
        update
            .add_to_set
            .insert("meta.owners".to_string(), vec![NativeValue::str("u1"), NativeValue::str("u1")]);
        apply_update(&mut d, &update, false).unwrap();

        let NativeValue::Document(meta) = &d["meta"] else {
            panic!("expected subdocument");
        };
        assert_eq!(
            meta["tags"],
            NativeValue::Array(vec![NativeValue::str("a"), NativeValue::str("a")])
        );
        assert_eq!(meta["owners"], NativeValue::Array(vec![NativeValue::str("u1")]));

        let mut push_onto_scalar = NativeUpdate::default();
        push_onto_scalar
            .push_all
            .insert("title".to_string(), vec![NativeValue::str("x")]);
        let err = apply_update(&mut d, &push_onto_scalar, false).unwrap_err();
        assert!(matches!(err, EngineError::Store { code: 2, .. }));
    }

    #[test]
    fn dotted_set_keeps_siblings() {
        let mut inner = NativeDocument::new();
        inner.insert("a".to_string(), NativeValue::Int64(1));
        inner.insert("b".to_string(), NativeValue::Int64(2));
        let mut d = doc(&[("obj", NativeValue::Document(inner))]);
        let mut update = NativeUpdate::default();
        update.set.insert("obj.a".to_string(), NativeValue::Int64(9));
        update.unset.insert("obj.b".to_string());
        apply_update(&mut d, &update, false).unwrap();
        let NativeValue::Document(obj) = &d["obj"] else {
            panic!("expected subdocument");
        };
        assert_eq!(obj.len(), 1);
        assert_eq!(obj["a"], NativeValue::Int64(9));
    }

    #[test]
    fn inc_on_string_fails() {
        let mut d = doc(&[("n", NativeValue::str("x"))]);
        let mut update = NativeUpdate::default();
        update.inc.insert("n".to_string(), NativeValue::Int64(1));
        assert!(matches!(
            apply_update(&mut d, &update, false),
            Err(EngineError::Store { code: 14, .. })
        ));
    }

    #[test]
    fn sort_with_missing_values() {
        let mut docs = vec![
            doc(&[("_id", NativeValue::str("a")), ("n", NativeValue::Int64(2))]),
            doc(&[("_id", NativeValue::str("b"))]),
            doc(&[("_id", NativeValue::str("c")), ("n", NativeValue::Int64(1))]),
        ];
        sort_documents(&mut docs, &[("n".to_string(), -1)], None);
        let ids: Vec<_> = docs.iter().map(|d| d["_id"].as_str().unwrap().to_string()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn seed_takes_top_level_equalities() {
        let f = NativeFilter::id("x").and(NativeFilter::field("n", NativeCond::Gt(NativeValue::Int64(1))));
        let seed = seed_from_filter(&f);
        assert_eq!(seed.len(), 1);
        assert_eq!(seed["_id"], NativeValue::str("x"));
    }
}
