// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Update-operator application for the in-memory collection.

use bson::{Bson, Document};

use crate::aggregate::{remove_path, set_path};
use crate::error::StorageError;
use crate::matcher::{lookup, value_matches, values_equal};

/// Apply an operator-style update document to `doc`.
///
/// Returns `true` when the document changed. Replacement-style documents
/// (no `$` keys) are rejected; `update_many` only accepts operators.
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<bool, StorageError> {
    let before = doc.clone();
    for (op, fields) in update {
        let fields = fields.as_document().ok_or_else(|| {
            StorageError::InvalidCommand(format!("{op} requires a document of fields"))
        })?;
        for (path, arg) in fields {
            match op.as_str() {
                "$set" => set_path(doc, path, arg.clone()),
                "$unset" => {
                    remove_path(doc, path);
                }
                "$inc" => increment(doc, path, arg)?,
                "$push" => push(doc, path, arg, false)?,
                "$addToSet" => push(doc, path, arg, true)?,
                "$pull" => pull(doc, path, |item| value_matches(item, arg))?,
                "$pullAll" => {
                    let values = arg.as_array().ok_or_else(|| {
                        StorageError::InvalidCommand("$pullAll requires an array".to_string())
                    })?;
                    pull(doc, path, |item| {
                        Ok(values.iter().any(|v| values_equal(item, v)))
                    })?
                }
                other if other.starts_with('$') => {
                    return Err(StorageError::UnsupportedOperator(other.to_string()))
                }
                other => {
                    return Err(StorageError::InvalidCommand(format!(
                        "update document key '{other}' is not an operator"
                    )))
                }
            }
        }
    }
    Ok(*doc != before)
}

fn current(doc: &Document, path: &str) -> Option<Bson> {
    lookup(doc, path).first().map(|v| (*v).clone())
}

fn increment(doc: &mut Document, path: &str, amount: &Bson) -> Result<(), StorageError> {
    let next = match (current(doc, path), amount) {
        (None, amount) => amount.clone(),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(a) + i64::from(*b)),
        },
        (Some(Bson::Int32(a)), Bson::Int64(b)) => Bson::Int64(i64::from(a) + b),
        (Some(Bson::Int64(a)), Bson::Int32(b)) => Bson::Int64(a + i64::from(*b)),
        (Some(Bson::Int64(a)), Bson::Int64(b)) => Bson::Int64(a + b),
        (Some(Bson::Double(a)), Bson::Double(b)) => Bson::Double(a + b),
        (Some(Bson::Double(a)), Bson::Int32(b)) => Bson::Double(a + f64::from(*b)),
        (Some(Bson::Double(a)), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Some(Bson::Int32(a)), Bson::Double(b)) => Bson::Double(f64::from(a) + b),
        (Some(Bson::Int64(a)), Bson::Double(b)) => Bson::Double(a as f64 + b),
        (Some(other), _) => {
            return Err(StorageError::TypeMismatch {
                path: path.to_string(),
                reason: format!("cannot apply $inc to a value of type {:?}", other.element_type()),
            })
        }
    };
    if !matches!(next, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) {
        return Err(StorageError::InvalidCommand(format!(
            "$inc amount for '{path}' must be numeric"
        )));
    }
    set_path(doc, path, next);
    Ok(())
}

fn push(doc: &mut Document, path: &str, arg: &Bson, unique: bool) -> Result<(), StorageError> {
    let additions = match arg {
        Bson::Document(modifier) if modifier.contains_key("$each") => modifier
            .get_array("$each")
            .map_err(|_| StorageError::InvalidCommand("$each requires an array".to_string()))?
            .clone(),
        single => vec![single.clone()],
    };
    let mut items = match current(doc, path) {
        None => Vec::new(),
        Some(Bson::Array(items)) => items,
        Some(other) => {
            return Err(StorageError::TypeMismatch {
                path: path.to_string(),
                reason: format!("cannot push onto a value of type {:?}", other.element_type()),
            })
        }
    };
    for value in additions {
        if unique && items.iter().any(|existing| values_equal(existing, &value)) {
            continue;
        }
        items.push(value);
    }
    set_path(doc, path, Bson::Array(items));
    Ok(())
}

fn pull(
    doc: &mut Document,
    path: &str,
    mut remove: impl FnMut(&Bson) -> Result<bool, StorageError>,
) -> Result<(), StorageError> {
    let items = match current(doc, path) {
        Some(Bson::Array(items)) => items,
        // Pulling from a missing or scalar field is a no-op.
        _ => return Ok(()),
    };
    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        if !remove(&item)? {
            kept.push(item);
        }
    }
    set_path(doc, path, Bson::Array(kept));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_set_and_unset() {
        let mut d = doc! { "a": 1, "b": 2 };
        let changed = apply_update(&mut d, &doc! { "$set": { "c.d": 3 }, "$unset": { "b": 1 } })
            .unwrap();
        assert!(changed);
        assert_eq!(d, doc! { "a": 1, "c": { "d": 3 } });
    }

    #[test]
    fn test_inc_creates_missing_field_and_rejects_null() {
        let mut d = doc! { "n": 1 };
        apply_update(&mut d, &doc! { "$inc": { "n": 4, "m": 2 } }).unwrap();
        assert_eq!(d, doc! { "n": 5, "m": 2 });

        let mut d = doc! { "n": Bson::Null };
        let err = apply_update(&mut d, &doc! { "$inc": { "n": 1 } }).unwrap_err();
        assert!(matches!(err, StorageError::TypeMismatch { .. }));
    }

    #[test]
    fn test_push_each_and_add_to_set() {
        let mut d = doc! { "tags": ["a"] };
        apply_update(&mut d, &doc! { "$push": { "tags": { "$each": ["b", "a"] } } }).unwrap();
        assert_eq!(d, doc! { "tags": ["a", "b", "a"] });

        let mut d = doc! { "tags": ["a"] };
        apply_update(&mut d, &doc! { "$addToSet": { "tags": { "$each": ["b", "a"] } } }).unwrap();
        assert_eq!(d, doc! { "tags": ["a", "b"] });
    }

    #[test]
    fn test_pull_and_pull_all() {
        let mut d = doc! { "n": [1, 2, 3, 2] };
        apply_update(&mut d, &doc! { "$pull": { "n": 2 } }).unwrap();
        assert_eq!(d, doc! { "n": [1, 3] });

        let mut d = doc! { "n": [1, 2, 3] };
        apply_update(&mut d, &doc! { "$pullAll": { "n": [1, 3] } }).unwrap();
        assert_eq!(d, doc! { "n": [2] });

        let mut d = doc! { "n": [1, 5, 9] };
        apply_update(&mut d, &doc! { "$pull": { "n": { "$gte": 5 } } }).unwrap();
        assert_eq!(d, doc! { "n": [1] });
    }

    #[test]
    fn test_unchanged_document_reports_false() {
        let mut d = doc! { "a": 1 };
        assert!(!apply_update(&mut d, &doc! { "$set": { "a": 1 } }).unwrap());
    }

    #[test]
    fn test_replacement_document_rejected() {
        let mut d = doc! { "a": 1 };
        assert!(apply_update(&mut d, &doc! { "a": 2 }).is_err());
    }
}
