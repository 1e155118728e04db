// SPDX-License-Identifier: PMPL-1.0-or-later
//! Query plan builder.
//!
//! A [`QueryPlan`] collects everything a caller says about a read or the
//! scope of a write. Builder methods take the plan by value and hand it
//! back, so a plan is assembled in one expression and then consumed by the
//! planner or the update builder.

use std::fmt;
use std::str::FromStr;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::clause::{Boolean, ClauseKind, WhereClause};
use crate::error::QueryError;
use crate::value::Value;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// The store's numeric sort direction.
    pub fn as_i32(self) -> i32 {
        match self {
            Direction::Asc => 1,
            Direction::Desc => -1,
        }
    }
}

impl From<&str> for Direction {
    /// `asc` in any case is ascending; every other spelling is descending.
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("asc") {
            Direction::Asc
        } else {
            Direction::Desc
        }
    }
}

/// Aggregate functions supported by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    /// The `$group` accumulator for this function.
    pub fn accumulator(self) -> &'static str {
        match self {
            AggregateFunction::Count => "$sum",
            AggregateFunction::Sum => "$sum",
            AggregateFunction::Avg => "$avg",
            AggregateFunction::Min => "$min",
            AggregateFunction::Max => "$max",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Count => write!(f, "count"),
            AggregateFunction::Sum => write!(f, "sum"),
            AggregateFunction::Avg => write!(f, "avg"),
            AggregateFunction::Min => write!(f, "min"),
            AggregateFunction::Max => write!(f, "max"),
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "count" => Ok(AggregateFunction::Count),
            "sum" => Ok(AggregateFunction::Sum),
            "avg" | "average" => Ok(AggregateFunction::Avg),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            _ => Err(QueryError::UnknownAggregate(s.to_string())),
        }
    }
}

/// An aggregate function applied to one or more columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    pub columns: Vec<String>,
}

/// A relational description of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Where-clauses, compiled left to right.
    pub clauses: Vec<WhereClause>,
    /// Selected columns. Empty, or containing `*`, selects everything.
    pub columns: Vec<String>,
    /// Custom projection merged over the selected columns.
    pub projection: Option<Document>,
    /// Sort keys in priority order.
    pub orders: Vec<(String, Direction)>,
    pub groups: Vec<String>,
    pub aggregate: Option<AggregateSpec>,
    pub distinct: bool,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Server-side cursor timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Index hint, by name or key pattern.
    pub hint: Option<Bson>,
    /// Passthrough options, applied last and winning over computed ones.
    pub options: Document,
}

impl QueryPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a clause as-is.
    pub fn with_clause(mut self, clause: WhereClause) -> Self {
        self.clauses.push(clause);
        self
    }

    fn push(self, boolean: Boolean, kind: ClauseKind) -> Self {
        self.with_clause(WhereClause::new(boolean, kind))
    }

    fn basic(
        self,
        boolean: Boolean,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
        negate: bool,
    ) -> Self {
        self.push(
            boolean,
            ClauseKind::Basic {
                column: column.into(),
                operator: operator.into(),
                value: value.into(),
                negate,
            },
        )
    }

    /// `AND column <operator> value`.
    pub fn filter(
        self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.basic(Boolean::And, column, operator, value, false)
    }

    /// `OR column <operator> value`.
    pub fn or_filter(
        self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.basic(Boolean::Or, column, operator, value, false)
    }

    /// `AND NOT (column <operator> value)`.
    pub fn filter_not(
        self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.basic(Boolean::And, column, operator, value, true)
    }

    pub fn filter_in<V: Into<Value>>(
        self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push(
            Boolean::And,
            ClauseKind::In {
                column: column.into(),
                values,
            },
        )
    }

    pub fn filter_not_in<V: Into<Value>>(
        self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push(
            Boolean::And,
            ClauseKind::NotIn {
                column: column.into(),
                values,
            },
        )
    }

    pub fn filter_null(self, column: impl Into<String>) -> Self {
        self.push(
            Boolean::And,
            ClauseKind::Null {
                column: column.into(),
            },
        )
    }

    pub fn filter_not_null(self, column: impl Into<String>) -> Self {
        self.push(
            Boolean::And,
            ClauseKind::NotNull {
                column: column.into(),
            },
        )
    }

    pub fn or_filter_not_null(self, column: impl Into<String>) -> Self {
        self.push(
            Boolean::Or,
            ClauseKind::NotNull {
                column: column.into(),
            },
        )
    }

    pub fn filter_between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push(
            Boolean::And,
            ClauseKind::Between {
                column: column.into(),
                low: low.into(),
                high: high.into(),
                negate: false,
            },
        )
    }

    pub fn filter_not_between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push(
            Boolean::And,
            ClauseKind::Between {
                column: column.into(),
                low: low.into(),
                high: high.into(),
                negate: true,
            },
        )
    }

    /// The array at `column` must contain all of `values`.
    pub fn filter_all<V: Into<Value>>(
        self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push(
            Boolean::And,
            ClauseKind::All {
                column: column.into(),
                values,
            },
        )
    }

    /// `AND ( ... )`: the closure builds the parenthesized group.
    pub fn filter_nested(self, build: impl FnOnce(QueryPlan) -> QueryPlan) -> Self {
        let subplan = build(QueryPlan::new());
        self.push(
            Boolean::And,
            ClauseKind::Nested {
                subplan: Box::new(subplan),
            },
        )
    }

    /// `OR ( ... )`.
    pub fn or_filter_nested(self, build: impl FnOnce(QueryPlan) -> QueryPlan) -> Self {
        let subplan = build(QueryPlan::new());
        self.push(
            Boolean::Or,
            ClauseKind::Nested {
                subplan: Box::new(subplan),
            },
        )
    }

    /// A native filter document, used verbatim.
    pub fn filter_raw(self, native: Document) -> Self {
        self.push(Boolean::And, ClauseKind::Raw { native })
    }

    /// Replace the selected columns.
    pub fn select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Merge `projection` into the custom projection.
    pub fn project(mut self, projection: Document) -> Self {
        let merged = self.projection.get_or_insert_with(Document::new);
        for (key, value) in projection {
            merged.insert(key, value);
        }
        self
    }

    /// Add a sort key. Sorting the same column again replaces its direction
    /// but keeps its position.
    pub fn order_by(mut self, column: impl Into<String>, direction: impl Into<Direction>) -> Self {
        let column = column.into();
        let direction = direction.into();
        match self.orders.iter().position(|(c, _)| *c == column) {
            Some(pos) => self.orders[pos].1 = direction,
            None => self.orders.push((column, direction)),
        }
        self
    }

    pub fn group_by<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.groups.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn aggregate<S: Into<String>>(
        mut self,
        function: AggregateFunction,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.aggregate = Some(AggregateSpec {
            function,
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Request distinct values, of `column` when given, otherwise of the
    /// first selected column.
    pub fn distinct(mut self, column: Option<&str>) -> Self {
        self.distinct = true;
        if let Some(column) = column {
            self.columns = vec![column.to_string()];
        }
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Page `page` (1-based) of `per_page` results.
    pub fn for_page(self, page: u64, per_page: u64) -> Self {
        self.skip(page.saturating_sub(1).saturating_mul(per_page)).limit(per_page)
    }

    /// The `per_page` results after `last_id`, in ascending `column` order.
    /// A null `last_id` starts from the beginning. Any earlier sort on
    /// `column` is dropped so it becomes the last sort key.
    pub fn for_page_after_id(
        mut self,
        per_page: u64,
        last_id: impl Into<Value>,
        column: impl Into<String>,
    ) -> Self {
        let column = column.into();
        let last_id = last_id.into();
        self.orders.retain(|(existing, _)| *existing != column);
        if !matches!(last_id, Value::Null) {
            self = self.filter(column.clone(), ">", last_id);
        }
        self.order_by(column, Direction::Asc).limit(per_page)
    }

    pub fn timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn hint(mut self, hint: impl Into<Bson>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Merge passthrough options. Later calls win on key collisions.
    pub fn options(mut self, options: Document) -> Self {
        for (key, value) in options {
            self.options.insert(key, value);
        }
        self
    }

    /// Selected columns with the `*` wildcard resolved to "everything".
    pub fn effective_columns(&self) -> &[String] {
        if self.columns.iter().any(|c| c == "*") {
            &[]
        } else {
            &self.columns
        }
    }
}
