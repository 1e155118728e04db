// SPDX-License-Identifier: PMPL-1.0-or-later
//! Update command builder.
//!
//! Builds the store's mutation documents (`$set`, `$inc`, `$push`,
//! `$addToSet`, `$pull`, `$pullAll`, `$unset`) from relational verbs.
//! Values go through [`Value::into_bson`], so dates are stored natively at
//! any depth.

use bson::{doc, Bson, Document};
use docbridge_storage::UpdateResult;
use tracing::warn;

use crate::clause::{ClauseKind, WhereClause};
use crate::config::TranslatorConfig;
use crate::error::QueryError;
use crate::plan::QueryPlan;
use crate::value::Value;

/// A mutation document plus the scope restriction it needs, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCommand {
    operations: Document,
    guard: Option<WhereClause>,
}

impl UpdateCommand {
    fn new(operations: Document) -> Self {
        Self {
            operations,
            guard: None,
        }
    }

    /// The operator document sent to the store.
    pub fn operations(&self) -> &Document {
        &self.operations
    }

    /// A clause that must be appended to the query scope before running.
    pub fn guard(&self) -> Option<&WhereClause> {
        self.guard.as_ref()
    }

    pub fn into_parts(self) -> (Document, Option<WhereClause>) {
        (self.operations, self.guard)
    }
}

/// `update(values)`. A map without any `$`-prefixed key is wrapped in
/// `$set`; otherwise it is used as the operator document.
pub fn update(values: impl Into<Value>) -> Result<UpdateCommand, QueryError> {
    let values = into_document(values.into(), "update")?;
    if values.keys().any(|k| k.starts_with('$')) {
        Ok(UpdateCommand::new(values))
    } else {
        Ok(UpdateCommand::new(doc! { "$set": values }))
    }
}

/// `column += amount`, setting `extra` columns in the same write.
///
/// The returned command carries a guard restricting the write to documents
/// where `column` is absent or non-null, so an explicit null is never turned
/// into a type error by the store.
pub fn increment(
    column: &str,
    amount: impl Into<Value>,
    extra: Option<Value>,
) -> Result<UpdateCommand, QueryError> {
    let amount = numeric(amount.into())?;
    build_increment(column, amount, extra)
}

/// `column -= amount`.
pub fn decrement(
    column: &str,
    amount: impl Into<Value>,
    extra: Option<Value>,
) -> Result<UpdateCommand, QueryError> {
    let amount = negate(numeric(amount.into())?)?;
    build_increment(column, amount, extra)
}

fn build_increment(
    column: &str,
    amount: Bson,
    extra: Option<Value>,
) -> Result<UpdateCommand, QueryError> {
    let mut inc = Document::new();
    inc.insert(column, amount);
    let mut operations = doc! { "$inc": inc };

    if let Some(extra) = extra {
        let set = into_document(extra, "increment extra columns")?;
        if !set.is_empty() {
            operations.insert("$set", set);
        }
    }

    let guard = QueryPlan::new()
        .filter(column, "exists", false)
        .or_filter_not_null(column);
    Ok(UpdateCommand {
        operations,
        guard: Some(WhereClause::and(ClauseKind::Nested {
            subplan: Box::new(guard),
        })),
    })
}

/// Append to the array at `column`. A list appends every element in one
/// write (`$each`); anything else is appended as a single element. `unique`
/// switches to `$addToSet`.
pub fn push(column: &str, value: impl Into<Value>, unique: bool) -> UpdateCommand {
    let value = value.into();
    let element = if value.is_list() {
        Bson::Document(doc! { "$each": value.into_bson() })
    } else {
        value.into_bson()
    };
    let mut fields = Document::new();
    fields.insert(column, element);
    UpdateCommand::new(single(push_operator(unique), fields))
}

/// Push into several columns at once; `values` maps column to element.
pub fn push_many(values: impl Into<Value>, unique: bool) -> Result<UpdateCommand, QueryError> {
    let fields = into_document(values.into(), "push")?;
    Ok(UpdateCommand::new(single(push_operator(unique), fields)))
}

/// Remove from the array at `column`. A list removes every listed value
/// (`$pullAll`); anything else is a `$pull` condition.
pub fn pull(column: &str, value: impl Into<Value>) -> UpdateCommand {
    let value = value.into();
    let operator = if value.is_list() { "$pullAll" } else { "$pull" };
    let mut fields = Document::new();
    fields.insert(column, value.into_bson());
    UpdateCommand::new(single(operator, fields))
}

/// Pull from several columns at once; `values` maps column to condition.
pub fn pull_many(values: impl Into<Value>) -> Result<UpdateCommand, QueryError> {
    let fields = into_document(values.into(), "pull")?;
    Ok(UpdateCommand::new(single("$pull", fields)))
}

/// Remove `columns` from matching documents.
pub fn drop<S: AsRef<str>>(columns: impl IntoIterator<Item = S>) -> UpdateCommand {
    let mut fields = Document::new();
    for column in columns {
        fields.insert(column.as_ref(), 1);
    }
    UpdateCommand::new(single("$unset", fields))
}

/// Write options: `multiple` defaults from the config; caller options win.
pub fn write_options(config: &TranslatorConfig, caller: &Document) -> Document {
    let mut options = doc! { "multiple": config.multiple_by_default };
    for (key, value) in caller {
        options.insert(key.clone(), value.clone());
    }
    options
}

/// Documents affected by an update: the modified count, or the upserted
/// count when nothing was modified. An unacknowledged write counts as zero.
pub fn affected_count(result: &UpdateResult) -> u64 {
    if !result.acknowledged {
        warn!("write was not acknowledged, reporting zero affected documents");
        return 0;
    }
    if result.modified_count > 0 {
        result.modified_count
    } else {
        result.upserted_count
    }
}

fn push_operator(unique: bool) -> &'static str {
    if unique {
        "$addToSet"
    } else {
        "$push"
    }
}

fn single(operator: &str, fields: Document) -> Document {
    let mut doc = Document::new();
    doc.insert(operator, fields);
    doc
}

fn into_document(value: Value, verb: &str) -> Result<Document, QueryError> {
    match value.into_bson() {
        Bson::Document(doc) => Ok(doc),
        other => Err(QueryError::InvalidUpdate(format!(
            "{verb} expects a map of columns, got {other}"
        ))),
    }
}

fn numeric(amount: Value) -> Result<Bson, QueryError> {
    match amount.into_bson() {
        n @ (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => Ok(n),
        other => Err(QueryError::InvalidUpdate(format!(
            "increment amount must be numeric, got {other}"
        ))),
    }
}

fn negate(amount: Bson) -> Result<Bson, QueryError> {
    match amount {
        Bson::Int32(i) => Ok(i
            .checked_neg()
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(-i64::from(i)))),
        Bson::Int64(i) => i.checked_neg().map(Bson::Int64).ok_or_else(|| {
            QueryError::InvalidUpdate(format!("cannot decrement by {i}"))
        }),
        Bson::Double(f) => Ok(Bson::Double(-f)),
        other => Err(QueryError::InvalidUpdate(format!(
            "decrement amount must be numeric, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_plain_values_are_wrapped_in_set() {
        let values: Value = [("name", Value::from("Ada")), ("age", Value::from(36))]
            .into_iter()
            .collect();
        let cmd = update(values).unwrap();
        assert_eq!(cmd.operations(), &doc! { "$set": { "name": "Ada", "age": 36 } });
        assert!(cmd.guard().is_none());
    }

    #[test]
    fn test_operator_documents_pass_through() {
        let cmd = update(doc! { "$unset": { "tmp": 1 }, "$set": { "a": 1 } }).unwrap();
        assert_eq!(
            cmd.operations(),
            &doc! { "$unset": { "tmp": 1 }, "$set": { "a": 1 } }
        );
    }

    #[test]
    fn test_update_converts_nested_dates() {
        let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let values: Value = [(
            "meta",
            [("seen_at", Value::from(when))].into_iter().collect::<Value>(),
        )]
        .into_iter()
        .collect();
        let cmd = update(values).unwrap();
        let seen = cmd
            .operations()
            .get_document("$set")
            .unwrap()
            .get_document("meta")
            .unwrap()
            .get("seen_at")
            .unwrap();
        assert_eq!(seen, &Bson::DateTime(bson::DateTime::from_chrono(when)));
    }

    #[test]
    fn test_update_rejects_scalars() {
        assert!(matches!(update(5), Err(QueryError::InvalidUpdate(_))));
    }

    #[test]
    fn test_increment_carries_guard() {
        let cmd = increment("score", 5, None).unwrap();
        assert_eq!(cmd.operations(), &doc! { "$inc": { "score": 5 } });

        let guard = cmd.guard().cloned().unwrap();
        let compiled = filter::compile(&[guard], &TranslatorConfig::default()).unwrap();
        assert_eq!(
            compiled.into_document(),
            doc! { "$or": [
                { "score": { "$exists": false } },
                { "score": { "$ne": Bson::Null } },
            ] }
        );
    }

    #[test]
    fn test_increment_with_extra_columns() {
        let extra: Value = [("updated_by", Value::from("cron"))].into_iter().collect();
        let cmd = increment("visits", 1, Some(extra)).unwrap();
        assert_eq!(
            cmd.operations(),
            &doc! { "$inc": { "visits": 1 }, "$set": { "updated_by": "cron" } }
        );
    }

    #[test]
    fn test_decrement_negates() {
        let cmd = decrement("stock", 3, None).unwrap();
        assert_eq!(cmd.operations(), &doc! { "$inc": { "stock": -3 } });
        let cmd = decrement("ratio", 0.5, None).unwrap();
        assert_eq!(cmd.operations(), &doc! { "$inc": { "ratio": -0.5 } });
        assert!(decrement("x", "one", None).is_err());
        assert!(decrement("x", i64::MIN, None).is_err());
    }

    #[test]
    fn test_push_batch_and_unique() {
        assert_eq!(
            push("tags", vec![1, 2, 3], false).operations(),
            &doc! { "$push": { "tags": { "$each": [1, 2, 3] } } }
        );
        assert_eq!(
            push("tags", vec![1, 2, 3], true).operations(),
            &doc! { "$addToSet": { "tags": { "$each": [1, 2, 3] } } }
        );
        assert_eq!(
            push("tags", "red", false).operations(),
            &doc! { "$push": { "tags": "red" } }
        );
    }

    #[test]
    fn test_push_many_columns() {
        let values: Value = [("a", Value::from(1)), ("b", Value::from(2))]
            .into_iter()
            .collect();
        assert_eq!(
            push_many(values, false).unwrap().operations(),
            &doc! { "$push": { "a": 1, "b": 2 } }
        );
    }

    #[test]
    fn test_pull_batch_and_single() {
        assert_eq!(
            pull("tags", vec![1, 2]).operations(),
            &doc! { "$pullAll": { "tags": [1, 2] } }
        );
        assert_eq!(
            pull("tags", 1).operations(),
            &doc! { "$pull": { "tags": 1 } }
        );
        let cond = pull_many(doc! { "items": { "qty": { "$lt": 1 } } }).unwrap();
        assert_eq!(
            cond.operations(),
            &doc! { "$pull": { "items": { "qty": { "$lt": 1 } } } }
        );
    }

    #[test]
    fn test_drop_unsets_each_column() {
        assert_eq!(
            drop(["a", "b"]).operations(),
            &doc! { "$unset": { "a": 1, "b": 1 } }
        );
    }

    #[test]
    fn test_write_options_default_multiple() {
        let config = TranslatorConfig::default();
        assert_eq!(write_options(&config, &Document::new()), doc! { "multiple": true });
        assert_eq!(
            write_options(&config, &doc! { "multiple": false, "upsert": true }),
            doc! { "multiple": false, "upsert": true }
        );
    }

    #[test]
    fn test_affected_count() {
        let modified = UpdateResult {
            acknowledged: true,
            matched_count: 2,
            modified_count: 2,
            ..Default::default()
        };
        assert_eq!(affected_count(&modified), 2);

        let upserted = UpdateResult {
            acknowledged: true,
            upserted_count: 1,
            ..Default::default()
        };
        assert_eq!(affected_count(&upserted), 1);

        let unacknowledged = UpdateResult {
            acknowledged: false,
            modified_count: 4,
            ..Default::default()
        };
        assert_eq!(affected_count(&unacknowledged), 0);
    }
}
