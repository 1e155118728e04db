// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Aggregation pipeline evaluation for the in-memory collection.
//
// Supports the stages the translator emits (`$match`, `$unwind`, `$group`,
// `$sort`, `$skip`, `$limit`, `$project`). The sort and projection helpers
// are shared with `find`, which applies the same semantics through options.

use bson::{Bson, Document};

use crate::error::StorageError;
use crate::matcher::{compare_values, lookup, matches, numeric, values_equal};

/// Run `pipeline` over `docs`, stage by stage.
pub fn run_pipeline(
    mut docs: Vec<Document>,
    pipeline: &[Document],
) -> Result<Vec<Document>, StorageError> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (name, spec) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(StorageError::InvalidCommand(
                    "pipeline stage must have exactly one key".to_string(),
                ))
            }
        };
        docs = match name.as_str() {
            "$match" => {
                let filter = expect_document(name, spec)?;
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$unwind" => unwind(docs, spec)?,
            "$group" => group(docs, expect_document(name, spec)?)?,
            "$sort" => {
                sort_documents(&mut docs, expect_document(name, spec)?)?;
                docs
            }
            "$skip" => {
                let n = expect_count(name, spec)?;
                docs.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = expect_count(name, spec)?;
                docs.into_iter().take(n).collect()
            }
            "$project" => {
                let spec = expect_document(name, spec)?;
                docs.iter()
                    .map(|doc| project(doc, spec))
                    .collect::<Result<Vec<_>, _>>()?
            }
            other => return Err(StorageError::UnsupportedOperator(other.to_string())),
        };
    }
    Ok(docs)
}

fn expect_document<'a>(stage: &str, spec: &'a Bson) -> Result<&'a Document, StorageError> {
    spec.as_document()
        .ok_or_else(|| StorageError::InvalidCommand(format!("{stage} requires a document")))
}

/// Interpret a non-negative integer argument (`$skip`, `$limit`, `skip`, `limit`).
pub fn expect_count(stage: &str, spec: &Bson) -> Result<usize, StorageError> {
    match numeric(spec) {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        _ => Err(StorageError::InvalidCommand(format!(
            "{stage} requires a non-negative integer"
        ))),
    }
}

/// Sort in place by a `{field: 1 | -1}` specification. Missing fields sort first.
pub fn sort_documents(docs: &mut [Document], spec: &Document) -> Result<(), StorageError> {
    let mut keys = Vec::with_capacity(spec.len());
    for (field, direction) in spec {
        let descending = match numeric(direction) {
            Some(d) if d < 0.0 => true,
            Some(_) => false,
            None => {
                return Err(StorageError::InvalidCommand(format!(
                    "sort direction for '{field}' must be numeric"
                )))
            }
        };
        // `$natural` keeps insertion order, which is what we already have.
        if field != "$natural" {
            keys.push((field.clone(), descending));
        }
    }
    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let left = first_value(a, field);
            let right = first_value(b, field);
            let ord = compare_values(&left, &right);
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(())
}

fn first_value(doc: &Document, path: &str) -> Bson {
    lookup(doc, path).first().map_or(Bson::Null, |v| (*v).clone())
}

/// Apply a projection: inclusion (`1`/`true`), exclusion (`0`/`false`) or a
/// `"$field"` reference. `_id` is kept unless excluded explicitly.
pub fn project(doc: &Document, spec: &Document) -> Result<Document, StorageError> {
    let is_exclusion = spec
        .iter()
        .filter(|(k, _)| k.as_str() != "_id")
        .all(|(_, v)| is_falsy_flag(v))
        && !spec.is_empty();

    if is_exclusion {
        let mut out = doc.clone();
        for (field, _) in spec {
            remove_path(&mut out, field);
        }
        return Ok(out);
    }

    let mut out = Document::new();
    let keep_id = spec.get("_id").map_or(true, |v| !is_falsy_flag(v));
    if keep_id {
        if let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for (field, rule) in spec {
        if field == "_id" {
            continue;
        }
        match rule {
            Bson::String(reference) if reference.starts_with('$') => {
                out.insert(field.clone(), first_value(doc, &reference[1..]));
            }
            flag if !is_falsy_flag(flag) => {
                if let Some(value) = lookup(doc, field).first() {
                    set_path(&mut out, field, (*value).clone());
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

fn is_falsy_flag(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => !*b,
        other => numeric(other) == Some(0.0),
    }
}

/// Set a dotted path, creating intermediate sub-documents as needed.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

/// Remove a dotted path. Returns the removed value, if any.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Bson::Document(inner)) => remove_path(inner, rest),
            _ => None,
        },
    }
}

fn unwind(docs: Vec<Document>, spec: &Bson) -> Result<Vec<Document>, StorageError> {
    let reference = match spec {
        Bson::String(path) => path.as_str(),
        Bson::Document(options) => options.get_str("path").map_err(|_| {
            StorageError::InvalidCommand("$unwind requires a path".to_string())
        })?,
        _ => {
            return Err(StorageError::InvalidCommand(
                "$unwind requires a string or document".to_string(),
            ))
        }
    };
    let path = reference.strip_prefix('$').ok_or_else(|| {
        StorageError::InvalidCommand("$unwind path must start with '$'".to_string())
    })?;

    let mut out = Vec::new();
    for doc in docs {
        let items = match lookup(&doc, path).first() {
            Some(Bson::Array(items)) => items.clone(),
            Some(Bson::Null) | None => continue,
            Some(other) => vec![(*other).clone()],
        };
        for item in items {
            let mut copy = doc.clone();
            set_path(&mut copy, path, item);
            out.push(copy);
        }
    }
    Ok(out)
}

// Evaluate a group expression: `"$path"`, a sub-document of expressions,
// or a literal.
fn evaluate(doc: &Document, expr: &Bson) -> Bson {
    match expr {
        Bson::String(reference) if reference.starts_with('$') => {
            first_value(doc, &reference[1..])
        }
        Bson::Document(fields) => {
            let mut out = Document::new();
            for (k, v) in fields {
                out.insert(k.clone(), evaluate(doc, v));
            }
            Bson::Document(out)
        }
        literal => literal.clone(),
    }
}

#[derive(Debug)]
enum Accumulator {
    First(Option<Bson>),
    Last(Bson),
    Sum(f64, bool),
    Avg(f64, u64),
    Min(Option<Bson>),
    Max(Option<Bson>),
}

impl Accumulator {
    fn new(op: &str) -> Result<Self, StorageError> {
        Ok(match op {
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Bson::Null),
            "$sum" => Accumulator::Sum(0.0, true),
            "$avg" => Accumulator::Avg(0.0, 0),
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            other => return Err(StorageError::UnsupportedOperator(other.to_string())),
        })
    }

    fn feed(&mut self, value: Bson) {
        match self {
            Accumulator::First(slot) => {
                if slot.is_none() {
                    *slot = Some(value);
                }
            }
            Accumulator::Last(slot) => *slot = value,
            Accumulator::Sum(total, integral) => {
                if let Some(n) = numeric(&value) {
                    *total += n;
                    *integral &= !matches!(value, Bson::Double(_));
                }
            }
            Accumulator::Avg(total, count) => {
                if let Some(n) = numeric(&value) {
                    *total += n;
                    *count += 1;
                }
            }
            Accumulator::Min(slot) => {
                if !matches!(value, Bson::Null)
                    && slot
                        .as_ref()
                        .map_or(true, |cur| compare_values(&value, cur).is_lt())
                {
                    *slot = Some(value);
                }
            }
            Accumulator::Max(slot) => {
                if !matches!(value, Bson::Null)
                    && slot
                        .as_ref()
                        .map_or(true, |cur| compare_values(&value, cur).is_gt())
                {
                    *slot = Some(value);
                }
            }
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::First(slot) | Accumulator::Min(slot) | Accumulator::Max(slot) => {
                slot.unwrap_or(Bson::Null)
            }
            Accumulator::Last(value) => value,
            Accumulator::Sum(total, true) if total.abs() < i64::MAX as f64 => {
                Bson::Int64(total as i64)
            }
            Accumulator::Sum(total, _) => Bson::Double(total),
            Accumulator::Avg(_, 0) => Bson::Null,
            Accumulator::Avg(total, count) => Bson::Double(total / count as f64),
        }
    }
}

fn group(docs: Vec<Document>, spec: &Document) -> Result<Vec<Document>, StorageError> {
    let id_expr = spec
        .get("_id")
        .ok_or_else(|| StorageError::InvalidCommand("$group requires an _id".to_string()))?;

    let mut fields = Vec::new();
    for (name, rule) in spec {
        if name == "_id" {
            continue;
        }
        let rule = rule.as_document().ok_or_else(|| {
            StorageError::InvalidCommand(format!("group field '{name}' must be an accumulator"))
        })?;
        let (op, expr) = rule.iter().next().ok_or_else(|| {
            StorageError::InvalidCommand(format!("group field '{name}' is empty"))
        })?;
        Accumulator::new(op)?;
        fields.push((name.clone(), op.clone(), expr.clone()));
    }

    // Linear probing keeps first-seen group order stable.
    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();
    for doc in &docs {
        let key = evaluate(doc, id_expr);
        let slot = match groups.iter().position(|(k, _)| values_equal(k, &key)) {
            Some(i) => i,
            None => {
                let accs = fields
                    .iter()
                    .map(|(_, op, _)| Accumulator::new(op))
                    .collect::<Result<Vec<_>, _>>()?;
                groups.push((key, accs));
                groups.len() - 1
            }
        };
        for (acc, (_, _, expr)) in groups[slot].1.iter_mut().zip(&fields) {
            acc.feed(evaluate(doc, expr));
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accs)| {
            let mut out = Document::new();
            out.insert("_id", key);
            for (acc, (name, _, _)) in accs.into_iter().zip(&fields) {
                out.insert(name.clone(), acc.finish());
            }
            out
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn orders() -> Vec<Document> {
        vec![
            doc! { "_id": 1, "user": "a", "total": 10, "items": [ { "price": 1 }, { "price": 2 } ] },
            doc! { "_id": 2, "user": "b", "total": 5, "items": [ { "price": 7 } ] },
            doc! { "_id": 3, "user": "a", "total": 20, "items": [] },
        ]
    }

    #[test]
    fn test_group_with_last_and_sum() {
        let pipeline = vec![doc! {
            "$group": {
                "_id": { "user": "$user" },
                "user": { "$last": "$user" },
                "aggregate": { "$sum": "$total" },
            }
        }];
        let out = run_pipeline(orders(), &pipeline).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_document("_id").unwrap(), &doc! { "user": "a" });
        assert_eq!(out[0].get_i64("aggregate").unwrap(), 30);
        assert_eq!(out[1].get_str("user").unwrap(), "b");
    }

    #[test]
    fn test_unwind_then_sum_flattened_path() {
        let pipeline = vec![
            doc! { "$unwind": "$items" },
            doc! { "$group": { "_id": Bson::Null, "aggregate": { "$sum": "$items.price" } } },
        ];
        let out = run_pipeline(orders(), &pipeline).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_i64("aggregate").unwrap(), 10);
    }

    #[test]
    fn test_sort_skip_limit_project() {
        let pipeline = vec![
            doc! { "$sort": { "total": -1 } },
            doc! { "$skip": 1 },
            doc! { "$limit": 1 },
            doc! { "$project": { "total": 1 } },
        ];
        let out = run_pipeline(orders(), &pipeline).unwrap();
        assert_eq!(out, vec![doc! { "_id": 1, "total": 10 }]);
    }

    #[test]
    fn test_avg_min_max() {
        let pipeline = vec![doc! {
            "$group": {
                "_id": Bson::Null,
                "avg": { "$avg": "$total" },
                "min": { "$min": "$total" },
                "max": { "$max": "$total" },
            }
        }];
        let out = run_pipeline(orders(), &pipeline).unwrap();
        let avg = out[0].get_f64("avg").unwrap();
        assert!((avg - 35.0 / 3.0).abs() < 1e-9);
        assert_eq!(out[0].get_i32("min").unwrap(), 5);
        assert_eq!(out[0].get_i32("max").unwrap(), 20);
    }

    #[test]
    fn test_exclusion_projection() {
        let doc = doc! { "_id": 1, "a": 1, "b": { "c": 2, "d": 3 } };
        let out = project(&doc, &doc! { "b.c": 0 }).unwrap();
        assert_eq!(out, doc! { "_id": 1, "a": 1, "b": { "d": 3 } });
    }

    #[test]
    fn test_multi_key_stage_rejected() {
        let pipeline = vec![doc! { "$skip": 1, "$limit": 1 }];
        assert!(run_pipeline(orders(), &pipeline).is_err());
    }
}
