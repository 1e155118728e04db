// SPDX-License-Identifier: PMPL-1.0-or-later
//! Operator table.
//!
//! Maps relational operator spellings onto the store's operator vocabulary.
//! Lookup is case-insensitive and tolerates one leading `$`.

use std::fmt;
use std::str::FromStr;

use crate::error::QueryError;

/// Structural operators passed through as `$<name>`, keyed by their
/// lower-cased spelling. The second column is the store's spelling.
const STRUCTURAL: &[(&str, &str)] = &[
    ("between", "between"),
    ("ilike", "ilike"),
    ("&", "&"),
    ("|", "|"),
    ("^", "^"),
    ("<<", "<<"),
    (">>", ">>"),
    ("rlike", "rlike"),
    ("exists", "exists"),
    ("type", "type"),
    ("mod", "mod"),
    ("where", "where"),
    ("all", "all"),
    ("size", "size"),
    ("text", "text"),
    ("slice", "slice"),
    ("elemmatch", "elemMatch"),
    ("geowithin", "geoWithin"),
    ("geointersects", "geoIntersects"),
    ("near", "near"),
    ("nearsphere", "nearSphere"),
    ("geometry", "geometry"),
    ("maxdistance", "maxDistance"),
    ("center", "center"),
    ("centersphere", "centerSphere"),
    ("box", "box"),
    ("polygon", "polygon"),
    ("uniquedocs", "uniqueDocs"),
];

/// A normalized clause operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`: plain equality, no operator document.
    Eq,
    /// `!=` or `<>`.
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    /// `regex` or its alias `regexp`.
    Regex,
    NotRegex,
    /// Any other known operator, emitted as `$<name>`.
    Structural(&'static str),
}

impl Operator {
    /// The store's comparison operator, for the six relational comparisons
    /// other than equality.
    pub fn comparison(self) -> Option<&'static str> {
        match self {
            Operator::Ne => Some("$ne"),
            Operator::Lt => Some("$lt"),
            Operator::Lte => Some("$lte"),
            Operator::Gt => Some("$gt"),
            Operator::Gte => Some("$gte"),
            _ => None,
        }
    }

    /// The operator key this operator compiles to, or `None` for equality.
    pub fn native_key(self) -> Option<String> {
        match self {
            Operator::Eq | Operator::Like => None,
            Operator::NotLike | Operator::NotRegex => Some("$not".to_string()),
            Operator::Regex => Some("$regex".to_string()),
            Operator::Structural(name) => Some(format!("${name}")),
            other => other.comparison().map(str::to_string),
        }
    }

    /// True for the negated pattern operators.
    pub fn is_negated_pattern(self) -> bool {
        matches!(self, Operator::NotLike | Operator::NotRegex)
    }
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let lowered = trimmed.strip_prefix('$').unwrap_or(trimmed).to_lowercase();
        let op = match lowered.as_str() {
            "=" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "like" => Operator::Like,
            "not like" => Operator::NotLike,
            "regex" | "regexp" => Operator::Regex,
            "not regex" | "not regexp" => Operator::NotRegex,
            other => STRUCTURAL
                .iter()
                .find(|(key, _)| *key == other)
                .map(|(_, native)| Operator::Structural(*native))
                .ok_or_else(|| QueryError::UnknownOperator(raw.to_string()))?,
        };
        Ok(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::Regex => "regex",
            Operator::NotRegex => "not regex",
            Operator::Structural(name) => *name,
        };
        f.write_str(s)
    }
}
