// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filter evaluation for the in-memory collection.
//
// Implements the subset of the document store's query language that the
// translator emits: implicit equality, comparison operators, set membership,
// `$exists`, `$all`, `$size`, `$regex`, `$not`, `$elemMatch` and the logical
// combinators `$and`, `$or`, `$nor`. Dotted paths descend into sub-documents
// and fan out over arrays of sub-documents; a condition on a field holding an
// array matches when the array itself or any of its elements matches.

use std::cmp::Ordering;

use bson::{Bson, Document};
use regex::{Regex, RegexBuilder};

use crate::error::StorageError;

/// Collect every value reachable at a dotted `path`.
///
/// Arrays of sub-documents are traversed element-wise; a numeric path segment
/// indexes into an array directly. A missing path yields no values.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    descend_doc(doc, &parts, &mut out);
    out
}

fn descend_doc<'a>(doc: &'a Document, parts: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = parts.split_first() else {
        return;
    };
    if let Some(value) = doc.get(*head) {
        descend(value, rest, out);
    }
}

fn descend<'a>(value: &'a Bson, parts: &[&str], out: &mut Vec<&'a Bson>) {
    if parts.is_empty() {
        out.push(value);
        return;
    }
    match value {
        Bson::Document(inner) => descend_doc(inner, parts, out),
        Bson::Array(items) => {
            if let Ok(index) = parts[0].parse::<usize>() {
                if let Some(item) = items.get(index) {
                    descend(item, &parts[1..], out);
                }
                return;
            }
            for item in items {
                if let Bson::Document(inner) = item {
                    descend_doc(inner, parts, out);
                }
            }
        }
        _ => {}
    }
}

/// Numeric view of a value, if it is any of the numeric BSON types.
pub fn numeric(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Equality with numeric types compared by value (`1 == 1i64 == 1.0`).
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return x == y;
    }
    match (a, b) {
        (Bson::Array(x), Bson::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Bson::Document(x), Bson::Document(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .zip(y.iter())
                    .all(|((kl, vl), (kr, vr))| kl == kr && values_equal(vl, vr))
        }
        _ => a == b,
    }
}

// Cross-type sort order, loosely following the store's canonical ordering.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) | Bson::Timestamp(_) => 9,
        Bson::RegularExpression(_) => 10,
        _ => 11,
    }
}

/// Total order over values used by `$sort`, `$min`/`$max` and range operators.
pub fn compare_values(a: &Bson, b: &Bson) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            x.timestamp_millis().cmp(&y.timestamp_millis())
        }
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Binary(x), Bson::Binary(y)) => x.bytes.cmp(&y.bytes),
        (Bson::Array(x), Bson::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Document(x), Bson::Document(y)) => {
            for ((kl, vl), (kr, vr)) in x.iter().zip(y.iter()) {
                let ord = kl.cmp(kr).then_with(|| compare_values(vl, vr));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

/// Compile a store regular expression with its option letters.
pub fn build_regex(pattern: &str, options: &str) -> Result<Regex, StorageError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            'u' | 'l' => {}
            other => {
                return Err(StorageError::InvalidCommand(format!(
                    "unknown regex option '{other}'"
                )))
            }
        }
    }
    Ok(builder.build()?)
}

/// Evaluate `filter` against `doc`.
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, StorageError> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_clause(doc, key, condition)?,
            "$nor" => !any_clause(doc, key, condition)?,
            op if op.starts_with('$') => {
                return Err(StorageError::UnsupportedOperator(op.to_string()))
            }
            path => condition_matches(&lookup(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluate a field condition against a single standalone value.
///
/// Used by `$pull`, where the condition applies to array elements.
pub fn value_matches(value: &Bson, condition: &Bson) -> Result<bool, StorageError> {
    match (value, condition) {
        (Bson::Document(inner), Bson::Document(cond)) if !is_operator_document(cond) => {
            matches(inner, cond)
        }
        _ => condition_matches(&[value], condition),
    }
}

fn any_clause(doc: &Document, op: &str, condition: &Bson) -> Result<bool, StorageError> {
    for clause in clauses(op, condition)? {
        if matches(doc, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn clauses<'a>(op: &str, value: &'a Bson) -> Result<Vec<&'a Document>, StorageError> {
    let items = value
        .as_array()
        .ok_or_else(|| StorageError::InvalidCommand(format!("{op} requires an array")))?;
    items
        .iter()
        .map(|item| {
            item.as_document().ok_or_else(|| {
                StorageError::InvalidCommand(format!("{op} entries must be documents"))
            })
        })
        .collect()
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|k| k.starts_with('$'))
}

fn condition_matches(candidates: &[&Bson], condition: &Bson) -> Result<bool, StorageError> {
    match condition {
        Bson::Document(ops) if is_operator_document(ops) => operators_match(candidates, ops),
        other => equals_any(candidates, other),
    }
}

// Apply `test` to each candidate and, for array candidates, to each element.
fn any_value(
    candidates: &[&Bson],
    mut test: impl FnMut(&Bson) -> Result<bool, StorageError>,
) -> Result<bool, StorageError> {
    for candidate in candidates {
        if test(*candidate)? {
            return Ok(true);
        }
        if let Bson::Array(items) = candidate {
            for item in items {
                if test(item)? {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn equals_any(candidates: &[&Bson], operand: &Bson) -> Result<bool, StorageError> {
    if candidates.is_empty() {
        return Ok(matches!(operand, Bson::Null));
    }
    if let Bson::RegularExpression(re) = operand {
        let compiled = build_regex(&re.pattern, &re.options)?;
        return any_value(candidates, |v| Ok(string_matches(&compiled, v)));
    }
    any_value(candidates, |v| Ok(values_equal(v, operand)))
}

fn string_matches(re: &Regex, value: &Bson) -> bool {
    matches!(value, Bson::String(s) if re.is_match(s))
}

fn range_matches(candidate: &Bson, op: &str, operand: &Bson) -> bool {
    if type_rank(candidate) != type_rank(operand) {
        return false;
    }
    let ord = compare_values(candidate, operand);
    match op {
        "$gt" => ord == Ordering::Greater,
        "$gte" => ord != Ordering::Less,
        "$lt" => ord == Ordering::Less,
        "$lte" => ord != Ordering::Greater,
        _ => false,
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => numeric(other).map_or(true, |n| n != 0.0),
    }
}

fn in_list(candidates: &[&Bson], op: &str, operand: &Bson) -> Result<bool, StorageError> {
    let items = operand
        .as_array()
        .ok_or_else(|| StorageError::InvalidCommand(format!("{op} requires an array")))?;
    for item in items {
        if equals_any(candidates, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn operators_match(candidates: &[&Bson], ops: &Document) -> Result<bool, StorageError> {
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => equals_any(candidates, operand)?,
            "$ne" => !equals_any(candidates, operand)?,
            "$gt" | "$gte" | "$lt" | "$lte" => {
                any_value(candidates, |v| Ok(range_matches(v, op, operand)))?
            }
            "$in" => in_list(candidates, op, operand)?,
            "$nin" => !in_list(candidates, op, operand)?,
            "$exists" => !candidates.is_empty() == truthy(operand),
            "$all" => {
                let wanted = operand.as_array().ok_or_else(|| {
                    StorageError::InvalidCommand("$all requires an array".to_string())
                })?;
                let mut all = !wanted.is_empty();
                for item in wanted {
                    if !equals_any(candidates, item)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$size" => {
                let size = numeric(operand).ok_or_else(|| {
                    StorageError::InvalidCommand("$size requires a number".to_string())
                })?;
                candidates
                    .iter()
                    .any(|c| matches!(c, Bson::Array(items) if items.len() as f64 == size))
            }
            "$regex" => {
                let options = ops.get_str("$options").unwrap_or("");
                let compiled = match operand {
                    Bson::String(pattern) => build_regex(pattern, options)?,
                    Bson::RegularExpression(re) => build_regex(&re.pattern, &re.options)?,
                    _ => {
                        return Err(StorageError::InvalidCommand(
                            "$regex requires a pattern".to_string(),
                        ))
                    }
                };
                any_value(candidates, |v| Ok(string_matches(&compiled, v)))?
            }
            "$options" => true,
            "$not" => !condition_matches(candidates, operand)?,
            "$elemMatch" => elem_match(candidates, operand)?,
            other => return Err(StorageError::UnsupportedOperator(other.to_string())),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn elem_match(candidates: &[&Bson], operand: &Bson) -> Result<bool, StorageError> {
    let condition = operand.as_document().ok_or_else(|| {
        StorageError::InvalidCommand("$elemMatch requires a document".to_string())
    })?;
    for candidate in candidates {
        let Bson::Array(items) = candidate else {
            continue;
        };
        for item in items {
            let hit = match item {
                Bson::Document(inner) if !is_operator_document(condition) => {
                    matches(inner, condition)?
                }
                other => operators_match(&[other], condition)?,
            };
            if hit {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn sample() -> Document {
        doc! {
            "name": "Ada",
            "age": 36,
            "score": Bson::Null,
            "tags": ["math", "engines"],
            "address": { "city": "London" },
            "items": [ { "price": 5 }, { "price": 12 } ],
        }
    }

    #[test]
    fn test_implicit_equality_and_numeric_coercion() {
        let d = sample();
        assert!(matches(&d, &doc! { "name": "Ada" }).unwrap());
        assert!(matches(&d, &doc! { "age": 36.0 }).unwrap());
        assert!(!matches(&d, &doc! { "age": 37 }).unwrap());
    }

    #[test]
    fn test_dotted_paths_fan_out_over_arrays() {
        let d = sample();
        assert!(matches(&d, &doc! { "address.city": "London" }).unwrap());
        assert!(matches(&d, &doc! { "items.price": { "$gt": 10 } }).unwrap());
        assert!(!matches(&d, &doc! { "items.price": { "$gt": 20 } }).unwrap());
        assert!(matches(&d, &doc! { "items.1.price": 12 }).unwrap());
    }

    #[test]
    fn test_array_field_matches_element() {
        let d = sample();
        assert!(matches(&d, &doc! { "tags": "math" }).unwrap());
        assert!(matches(&d, &doc! { "tags": { "$all": ["engines", "math"] } }).unwrap());
        assert!(matches(&d, &doc! { "tags": { "$size": 2 } }).unwrap());
    }

    #[test]
    fn test_null_and_missing_semantics() {
        let d = sample();
        assert!(matches(&d, &doc! { "score": Bson::Null }).unwrap());
        assert!(matches(&d, &doc! { "missing": Bson::Null }).unwrap());
        assert!(!matches(&d, &doc! { "missing": { "$ne": Bson::Null } }).unwrap());
        assert!(matches(&d, &doc! { "score": { "$exists": true } }).unwrap());
        assert!(matches(&d, &doc! { "missing": { "$exists": false } }).unwrap());
    }

    #[test]
    fn test_logical_combinators() {
        let d = sample();
        let f = doc! { "$or": [ { "age": 1 }, { "name": "Ada" } ] };
        assert!(matches(&d, &f).unwrap());
        let f = doc! { "$and": [ { "age": 36 }, { "name": "Bob" } ] };
        assert!(!matches(&d, &f).unwrap());
        let f = doc! { "$nor": [ { "age": 1 } ] };
        assert!(matches(&d, &f).unwrap());
    }

    #[test]
    fn test_regex_and_not() {
        let d = sample();
        let re = Bson::RegularExpression(bson::Regex {
            pattern: "^a".to_string(),
            options: "i".to_string(),
        });
        assert!(matches(&d, &doc! { "name": re.clone() }).unwrap());
        assert!(!matches(&d, &doc! { "name": { "$not": re } }).unwrap());
        assert!(matches(&d, &doc! { "name": { "$regex": "d", "$options": "" } }).unwrap());
    }

    #[test]
    fn test_range_respects_type_brackets() {
        let d = sample();
        assert!(!matches(&d, &doc! { "name": { "$gt": 5 } }).unwrap());
        assert!(matches(&d, &doc! { "name": { "$gt": "A" } }).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let d = sample();
        let err = matches(&d, &doc! { "age": { "$near": 5 } }).unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedOperator(_)));
    }

    #[test]
    fn test_compare_values_orders_across_types() {
        assert_eq!(compare_values(&Bson::Null, &Bson::Int32(0)), Ordering::Less);
        assert_eq!(
            compare_values(&Bson::Int64(3), &Bson::Double(2.5)),
            Ordering::Greater
        );
        assert_eq!(
            compare_values(&Bson::String("a".into()), &Bson::String("b".into())),
            Ordering::Less
        );
    }
}
