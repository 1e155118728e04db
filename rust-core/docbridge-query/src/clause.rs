// SPDX-License-Identifier: PMPL-1.0-or-later
//! Where-clause model.

use bson::Document;
use serde::{Deserialize, Serialize};

use crate::plan::QueryPlan;
use crate::value::Value;

/// How a clause joins the clause before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boolean {
    #[default]
    And,
    Or,
}

/// The shape of a single where-clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClauseKind {
    /// `column <operator> value`. `negate` inverts the comparison.
    Basic {
        column: String,
        operator: String,
        value: Value,
        negate: bool,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    NotIn {
        column: String,
        values: Vec<Value>,
    },
    Null {
        column: String,
    },
    NotNull {
        column: String,
    },
    /// Inclusive range. Negated, it matches values at or outside the bounds.
    Between {
        column: String,
        low: Value,
        high: Value,
        negate: bool,
    },
    /// The array at `column` contains every one of `values`.
    All {
        column: String,
        values: Vec<Value>,
    },
    /// A parenthesized group of clauses.
    Nested { subplan: Box<QueryPlan> },
    /// A native filter document, used verbatim.
    Raw { native: Document },
}

impl ClauseKind {
    /// The column the clause filters on, if it targets a single column.
    pub fn column(&self) -> Option<&str> {
        match self {
            ClauseKind::Basic { column, .. }
            | ClauseKind::In { column, .. }
            | ClauseKind::NotIn { column, .. }
            | ClauseKind::Null { column }
            | ClauseKind::NotNull { column }
            | ClauseKind::Between { column, .. }
            | ClauseKind::All { column, .. } => Some(column.as_str()),
            ClauseKind::Nested { .. } | ClauseKind::Raw { .. } => None,
        }
    }
}

/// A clause plus the combinator joining it to its predecessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    pub boolean: Boolean,
    pub kind: ClauseKind,
}

impl WhereClause {
    pub fn new(boolean: Boolean, kind: ClauseKind) -> Self {
        Self { boolean, kind }
    }

    pub fn and(kind: ClauseKind) -> Self {
        Self::new(Boolean::And, kind)
    }

    pub fn or(kind: ClauseKind) -> Self {
        Self::new(Boolean::Or, kind)
    }
}
