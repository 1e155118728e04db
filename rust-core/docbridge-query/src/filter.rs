// SPDX-License-Identifier: PMPL-1.0-or-later
//! Filter compiler.
//!
//! Folds an ordered clause list into a single filter document. Each clause
//! compiles to a fragment; when there is more than one clause every fragment
//! is wrapped in `$and` or `$or` according to its combinator, and the wrapped
//! fragments are merged key by key. The first clause takes the second
//! clause's combinator when its own is `and`, so `[a AND, b OR]` compiles as
//! `a OR b`.

use bson::{Bson, Document, Regex};
use tracing::debug;

use crate::clause::{Boolean, ClauseKind, WhereClause};
use crate::config::TranslatorConfig;
use crate::error::QueryError;
use crate::key;
use crate::operator::Operator;
use crate::value::Value;

/// Keys whose values are clause lists and concatenate on merge.
const LIST_KEYS: [&str; 2] = ["$and", "$or"];

/// The value accumulated under one top-level filter key.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldConstraint {
    Single(Bson),
    Many(Vec<Bson>),
}

impl FieldConstraint {
    fn into_bson(self) -> Bson {
        match self {
            FieldConstraint::Single(value) => value,
            FieldConstraint::Many(values) => Bson::Array(values),
        }
    }
}

/// A compiled filter: top-level keys in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    entries: Vec<(String, FieldConstraint)>,
}

impl CompiledFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the filter matches every document.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&FieldConstraint> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, c)| c)
    }

    /// Merge a fragment into the accumulator.
    ///
    /// `$and` and `$or` lists concatenate. Any other key seen twice is
    /// promoted from [`FieldConstraint::Single`] to [`FieldConstraint::Many`].
    pub fn merge(&mut self, fragment: Document) {
        for (key, value) in fragment {
            let incoming = if LIST_KEYS.contains(&key.as_str()) {
                match value {
                    Bson::Array(items) => FieldConstraint::Many(items),
                    other => FieldConstraint::Many(vec![other]),
                }
            } else {
                FieldConstraint::Single(value)
            };

            let Some(pos) = self.entries.iter().position(|(k, _)| *k == key) else {
                self.entries.push((key, incoming));
                continue;
            };
            let slot = &mut self.entries[pos].1;
            let mut list = match std::mem::replace(slot, FieldConstraint::Many(Vec::new())) {
                FieldConstraint::Single(first) => vec![first],
                FieldConstraint::Many(existing) => existing,
            };
            match incoming {
                FieldConstraint::Single(value) => list.push(value),
                FieldConstraint::Many(values) => list.extend(values),
            }
            *slot = FieldConstraint::Many(list);
        }
    }

    /// Render as a native filter document.
    pub fn to_document(&self) -> Document {
        self.clone().into_document()
    }

    pub fn into_document(self) -> Document {
        let mut doc = Document::new();
        for (key, constraint) in self.entries {
            doc.insert(key, constraint.into_bson());
        }
        doc
    }
}

/// Compile `clauses` into a filter.
pub fn compile(
    clauses: &[WhereClause],
    config: &TranslatorConfig,
) -> Result<CompiledFilter, QueryError> {
    let mut compiled = CompiledFilter::new();
    let chained = clauses.len() > 1;

    for (i, clause) in clauses.iter().enumerate() {
        let mut boolean = clause.boolean;
        if i == 0 && chained && boolean == Boolean::And {
            boolean = clauses[1].boolean;
        }

        let fragment = compile_clause(&clause.kind, config)?;
        let wrapped = match boolean {
            Boolean::Or => wrap("$or", fragment),
            Boolean::And if chained => wrap("$and", fragment),
            Boolean::And => fragment,
        };
        compiled.merge(wrapped);
    }

    debug!(clause_count = clauses.len(), keys = compiled.len(), "compiled filter");
    Ok(compiled)
}

fn wrap(key: &str, fragment: Document) -> Document {
    let mut doc = Document::new();
    doc.insert(key, vec![Bson::Document(fragment)]);
    doc
}

fn single(column: &str, condition: Bson) -> Document {
    let mut doc = Document::new();
    doc.insert(column, condition);
    doc
}

fn operator_doc(key: &str, operand: Bson) -> Bson {
    Bson::Document(single(key, operand))
}

/// Convert a clause value, normalizing identifiers on the id field.
fn prepare(column: &str, value: &Value, config: &TranslatorConfig) -> Bson {
    if column == config.id_field {
        key::normalize(value.clone())
    } else {
        value.clone().into_bson()
    }
}

fn prepare_all(column: &str, values: &[Value], config: &TranslatorConfig) -> Bson {
    Bson::Array(values.iter().map(|v| prepare(column, v, config)).collect())
}

fn compile_clause(kind: &ClauseKind, config: &TranslatorConfig) -> Result<Document, QueryError> {
    let fragment = match kind {
        ClauseKind::Basic {
            column,
            operator,
            value,
            negate,
        } => {
            let op: Operator = operator.parse()?;
            compile_basic(column, op, prepare(column, value, config), *negate)?
        }
        ClauseKind::In { column, values } => single(
            column,
            operator_doc("$in", prepare_all(column, values, config)),
        ),
        ClauseKind::NotIn { column, values } => single(
            column,
            operator_doc("$nin", prepare_all(column, values, config)),
        ),
        ClauseKind::Null { column } => compile_basic(column, Operator::Eq, Bson::Null, false)?,
        ClauseKind::NotNull { column } => compile_basic(column, Operator::Ne, Bson::Null, false)?,
        ClauseKind::Between {
            column,
            low,
            high,
            negate,
        } => {
            let low = prepare(column, low, config);
            let high = prepare(column, high, config);
            if *negate {
                let mut doc = Document::new();
                doc.insert(
                    "$or",
                    vec![
                        Bson::Document(single(column, operator_doc("$lte", low))),
                        Bson::Document(single(column, operator_doc("$gte", high))),
                    ],
                );
                doc
            } else {
                let mut range = Document::new();
                range.insert("$gte", low);
                range.insert("$lte", high);
                single(column, Bson::Document(range))
            }
        }
        ClauseKind::All { column, values } => single(
            column,
            operator_doc("$all", prepare_all(column, values, config)),
        ),
        ClauseKind::Nested { subplan } => compile(&subplan.clauses, config)?.into_document(),
        ClauseKind::Raw { native } => native.clone(),
    };
    Ok(fragment)
}

fn compile_basic(
    column: &str,
    op: Operator,
    value: Bson,
    negate: bool,
) -> Result<Document, QueryError> {
    let operand = match op {
        Operator::Like | Operator::NotLike => like_to_regex(&value)?,
        Operator::Regex | Operator::NotRegex => parse_regex(value)?,
        _ => value,
    };

    let condition = match (op.native_key(), negate) {
        (None, false) => operand,
        // Negated equality: a pattern is inverted with $not, a value with $ne.
        (None, true) => match operand {
            regex @ Bson::RegularExpression(_) => operator_doc("$not", regex),
            other => operator_doc("$ne", other),
        },
        // Negating a negated pattern leaves the bare pattern.
        (Some(_), true) if op.is_negated_pattern() => operand,
        (Some(key), false) => operator_doc(&key, operand),
        (Some(key), true) => operator_doc("$not", operator_doc(&key, operand)),
    };
    Ok(single(column, condition))
}

/// Translate a SQL `LIKE` pattern into a case-insensitive regular expression.
///
/// Literal text is escaped, `%` becomes `.*` unless preceded by a backslash,
/// and the pattern is anchored at each end that has no `%`.
pub fn like_to_regex(value: &Bson) -> Result<Bson, QueryError> {
    let raw = match value {
        Bson::String(s) => s.clone(),
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Boolean(_) => value.to_string(),
        other => return Err(QueryError::MalformedRegex(other.to_string())),
    };

    let mut pattern = String::with_capacity(raw.len() + 4);
    if !raw.starts_with('%') {
        pattern.push('^');
    }
    let mut literal = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'%') => {
                chars.next();
                literal.push('%');
            }
            '%' => {
                pattern.push_str(&regex::escape(&literal));
                literal.clear();
                pattern.push_str(".*");
            }
            other => literal.push(other),
        }
    }
    pattern.push_str(&regex::escape(&literal));
    if !raw.ends_with('%') {
        pattern.push('$');
    }

    Ok(Bson::RegularExpression(Regex {
        pattern,
        options: "i".to_string(),
    }))
}

/// Accept a native regular expression, a `/pattern/flags` string, or a bare
/// pattern string without flags.
pub fn parse_regex(value: Bson) -> Result<Bson, QueryError> {
    let raw = match value {
        regex @ Bson::RegularExpression(_) => return Ok(regex),
        Bson::String(s) => s,
        other => return Err(QueryError::MalformedRegex(other.to_string())),
    };

    let Some(body) = raw.strip_prefix('/') else {
        return Ok(Bson::RegularExpression(Regex {
            pattern: raw,
            options: String::new(),
        }));
    };
    let Some(close) = body.rfind('/') else {
        return Err(QueryError::MalformedRegex(raw));
    };
    let flags = &body[close + 1..];
    if !flags.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(QueryError::MalformedRegex(raw));
    }
    let mut options: Vec<char> = flags.chars().collect();
    options.sort_unstable();
    options.dedup();

    Ok(Bson::RegularExpression(Regex {
        pattern: body[..close].to_string(),
        options: options.into_iter().collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::QueryPlan;
    use bson::{doc, oid::ObjectId};
    use chrono::{TimeZone, Utc};

    fn compile_plan(plan: QueryPlan) -> Document {
        compile(&plan.clauses, &TranslatorConfig::default())
            .unwrap()
            .into_document()
    }

    fn regex(pattern: &str, options: &str) -> Bson {
        Bson::RegularExpression(Regex {
            pattern: pattern.to_string(),
            options: options.to_string(),
        })
    }

    #[test]
    fn test_empty_clause_list_matches_everything() {
        assert!(compile(&[], &TranslatorConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn test_single_equality_and_not_null() {
        assert_eq!(compile_plan(QueryPlan::new().filter("a", "=", 1)), doc! { "a": 1 });
        assert_eq!(
            compile_plan(QueryPlan::new().filter_not_null("a")),
            doc! { "a": { "$ne": Bson::Null } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter_null("a")),
            doc! { "a": Bson::Null }
        );
    }

    #[test]
    fn test_comparison_operators() {
        assert_eq!(
            compile_plan(QueryPlan::new().filter("age", ">=", 21)),
            doc! { "age": { "$gte": 21 } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter("age", "<>", 21)),
            doc! { "age": { "$ne": 21 } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter("tags", "size", 3)),
            doc! { "tags": { "$size": 3 } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter("x", "$Exists", false)),
            doc! { "x": { "$exists": false } }
        );
    }

    #[test]
    fn test_between() {
        assert_eq!(
            compile_plan(QueryPlan::new().filter_between("n", 1, 5)),
            doc! { "n": { "$gte": 1, "$lte": 5 } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter_not_between("n", 1, 5)),
            doc! { "$or": [ { "n": { "$lte": 1 } }, { "n": { "$gte": 5 } } ] }
        );
    }

    #[test]
    fn test_first_clause_inherits_second_combinator() {
        let plan = QueryPlan::new().filter("a", "=", 1).or_filter("b", "=", 2);
        assert_eq!(
            compile_plan(plan),
            doc! { "$or": [ { "a": 1 }, { "b": 2 } ] }
        );
    }

    #[test]
    fn test_and_chain_wraps_every_fragment() {
        let plan = QueryPlan::new()
            .filter("a", "=", 1)
            .filter("b", ">", 2)
            .or_filter("c", "=", 3);
        assert_eq!(
            compile_plan(plan),
            doc! {
                "$and": [ { "a": 1 }, { "b": { "$gt": 2 } } ],
                "$or": [ { "c": 3 } ],
            }
        );
    }

    #[test]
    fn test_nested_group() {
        let plan = QueryPlan::new()
            .filter("a", "=", 1)
            .filter_nested(|q| q.filter("b", "=", 2).or_filter("c", "=", 3));
        assert_eq!(
            compile_plan(plan),
            doc! { "$and": [ { "a": 1 }, { "$or": [ { "b": 2 }, { "c": 3 } ] } ] }
        );
    }

    #[test]
    fn test_in_not_in_all() {
        assert_eq!(
            compile_plan(QueryPlan::new().filter_in("s", ["a", "b"])),
            doc! { "s": { "$in": ["a", "b"] } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter_not_in("s", [1, 2])),
            doc! { "s": { "$nin": [1, 2] } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter_all("tags", ["x", "y"])),
            doc! { "tags": { "$all": ["x", "y"] } }
        );
    }

    #[test]
    fn test_raw_fragment_is_verbatim() {
        let native = doc! { "$where": "this.a > 1", "b": { "$type": "string" } };
        assert_eq!(compile_plan(QueryPlan::new().filter_raw(native.clone())), native);
    }

    #[test]
    fn test_id_values_are_normalized() {
        let hex = "507f1f77bcf86cd799439011";
        let oid = ObjectId::parse_str(hex).unwrap();
        assert_eq!(compile_plan(QueryPlan::new().filter("_id", "=", hex)), doc! { "_id": oid });
        assert_eq!(
            compile_plan(QueryPlan::new().filter_in("_id", [hex, "plain"])),
            doc! { "_id": { "$in": [oid, "plain"] } }
        );
        // Other columns keep hex strings as strings.
        assert_eq!(compile_plan(QueryPlan::new().filter("ref", "=", hex)), doc! { "ref": hex });
    }

    #[test]
    fn test_custom_id_field() {
        let config = TranslatorConfig {
            id_field: "uid".to_string(),
            ..TranslatorConfig::default()
        };
        let plan = QueryPlan::new().filter("uid", "=", "507f1f77bcf86cd799439011");
        let compiled = compile(&plan.clauses, &config).unwrap().into_document();
        assert!(matches!(compiled.get("uid"), Some(Bson::ObjectId(_))));
    }

    #[test]
    fn test_dates_become_native_timestamps() {
        let when = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let native = bson::DateTime::from_millis(when.timestamp_millis());
        assert_eq!(
            compile_plan(QueryPlan::new().filter("at", "<", when)),
            doc! { "at": { "$lt": native } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter_in("at", [when])),
            doc! { "at": { "$in": [native] } }
        );
    }

    #[test]
    fn test_like_patterns() {
        assert_eq!(
            compile_plan(QueryPlan::new().filter("name", "like", "jo%")),
            doc! { "name": regex("^jo.*", "i") }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter("name", "LIKE", "%a.b%")),
            doc! { "name": regex(".*a\\.b.*", "i") }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter("name", "like", "exact")),
            doc! { "name": regex("^exact$", "i") }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter("name", "not like", "%son")),
            doc! { "name": { "$not": regex(".*son$", "i") } }
        );
    }

    #[test]
    fn test_escaped_percent_is_literal() {
        let Bson::RegularExpression(re) = like_to_regex(&Bson::from("50\\%")).unwrap() else {
            panic!("expected regex");
        };
        // The value ends with '%', so no end anchor.
        assert_eq!(re.pattern, "^50%");
    }

    #[test]
    fn test_regex_forms() {
        assert_eq!(
            compile_plan(QueryPlan::new().filter("s", "regexp", "/^ab+c/im")),
            doc! { "s": { "$regex": regex("^ab+c", "im") } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter("s", "regex", "ab+c")),
            doc! { "s": { "$regex": regex("ab+c", "") } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter("s", "not regexp", "/a/b/i")),
            doc! { "s": { "$not": regex("a/b", "i") } }
        );
        let native = regex("x", "s");
        assert_eq!(
            compile_plan(QueryPlan::new().filter("s", "regex", native.clone())),
            doc! { "s": { "$regex": native } }
        );
    }

    #[test]
    fn test_malformed_regex_is_a_programming_error() {
        let plan = QueryPlan::new().filter("s", "regex", "/unterminated");
        let err = compile(&plan.clauses, &TranslatorConfig::default()).unwrap_err();
        assert!(matches!(err, QueryError::MalformedRegex(_)));
        assert!(err.is_programming_error());

        let plan = QueryPlan::new().filter("s", "regex", "/a/ i");
        assert!(compile(&plan.clauses, &TranslatorConfig::default()).is_err());
    }

    #[test]
    fn test_negated_basic_clauses() {
        assert_eq!(
            compile_plan(QueryPlan::new().filter_not("a", "=", 1)),
            doc! { "a": { "$ne": 1 } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter_not("a", ">", 1)),
            doc! { "a": { "$not": { "$gt": 1 } } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter_not("a", "like", "x%")),
            doc! { "a": { "$not": regex("^x.*", "i") } }
        );
        assert_eq!(
            compile_plan(QueryPlan::new().filter_not("a", "not like", "x%")),
            doc! { "a": regex("^x.*", "i") }
        );
    }

    #[test]
    fn test_unknown_operator() {
        let plan = QueryPlan::new().filter("a", "===", 1);
        let err = compile(&plan.clauses, &TranslatorConfig::default()).unwrap_err();
        assert!(matches!(err, QueryError::UnknownOperator(_)));
    }

    #[test]
    fn test_colliding_keys_promote_to_many() {
        let mut filter = CompiledFilter::new();
        filter.merge(doc! { "a": 1 });
        filter.merge(doc! { "a": 2, "$or": [ { "b": 1 } ] });
        filter.merge(doc! { "a": 3, "$or": [ { "c": 1 } ] });
        assert_eq!(
            filter.get("a"),
            Some(&FieldConstraint::Many(vec![
                Bson::Int32(1),
                Bson::Int32(2),
                Bson::Int32(3)
            ]))
        );
        assert_eq!(
            filter.into_document(),
            doc! { "a": [1, 2, 3], "$or": [ { "b": 1 }, { "c": 1 } ] }
        );
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let plan = QueryPlan::new()
            .filter("a", "like", "%x%")
            .or_filter_not_null("b")
            .filter_in("_id", ["507f1f77bcf86cd799439011"]);
        let first = compile(&plan.clauses, &TranslatorConfig::default()).unwrap();
        let second = compile(&plan.clauses, &TranslatorConfig::default()).unwrap();
        assert_eq!(
            bson::to_vec(&first.into_document()).unwrap(),
            bson::to_vec(&second.into_document()).unwrap()
        );
    }
}
