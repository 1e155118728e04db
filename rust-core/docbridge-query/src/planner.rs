// SPDX-License-Identifier: PMPL-1.0-or-later
//! Command planner.
//!
//! Turns a [`QueryPlan`] into exactly one [`Strategy`]. The decision is
//! ordered:
//!
//! 1. grouping or an aggregate spec plans an aggregation pipeline, except a
//!    `count(*)` without grouping, which becomes a plain count;
//! 2. a distinct request plans a distinct lookup;
//! 3. everything else is a find with options.

use bson::{doc, Bson, Document};
use tracing::debug;

use crate::config::TranslatorConfig;
use crate::error::QueryError;
use crate::filter;
use crate::pipeline::{as_i64, Pipeline, Stage};
use crate::plan::{AggregateFunction, QueryPlan};

/// Marker inside an aggregate column meaning "each element of the array".
const UNWIND_MARKER: &str = ".*.";

/// Key the aggregate result is stored under in `$group` output rows.
pub const AGGREGATE_FIELD: &str = "aggregate";

/// The command a plan compiles to.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Find {
        filter: Document,
        options: Document,
    },
    Aggregate {
        pipeline: Pipeline,
        options: Document,
    },
    Distinct {
        column: String,
        filter: Document,
    },
    /// `count(*)` without grouping: a direct count against the filter.
    CountShortcut {
        filter: Document,
    },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Find { .. } => "find",
            Strategy::Aggregate { .. } => "aggregate",
            Strategy::Distinct { .. } => "distinct",
            Strategy::CountShortcut { .. } => "count",
        }
    }

    /// True for strategies whose results can be streamed.
    pub fn is_streamable(&self) -> bool {
        matches!(self, Strategy::Find { .. } | Strategy::Aggregate { .. })
    }
}

/// Plan `query` against `config`.
pub fn plan(query: &QueryPlan, config: &TranslatorConfig) -> Result<Strategy, QueryError> {
    let filter = filter::compile(&query.clauses, config)?.into_document();

    let strategy = if !query.groups.is_empty() || query.aggregate.is_some() {
        plan_aggregate(query, filter, config)?
    } else if query.distinct {
        let column = query
            .effective_columns()
            .first()
            .cloned()
            .unwrap_or_else(|| config.id_field.clone());
        Strategy::Distinct { column, filter }
    } else {
        plan_find(query, filter, config)
    };

    let stage_count = match &strategy {
        Strategy::Aggregate { pipeline, .. } => pipeline.len(),
        _ => 0,
    };
    debug!(strategy = strategy.name(), stage_count, "planned query");
    Ok(strategy)
}

fn plan_aggregate(
    query: &QueryPlan,
    filter: Document,
    config: &TranslatorConfig,
) -> Result<Strategy, QueryError> {
    if let Some(spec) = &query.aggregate {
        let wildcard = spec.columns.iter().any(|c| c == "*");
        if spec.function == AggregateFunction::Count && wildcard && query.groups.is_empty() {
            return Ok(Strategy::CountShortcut { filter });
        }
    }

    let mut group = Document::new();
    if query.groups.is_empty() {
        group.insert("_id", Bson::Null);
    } else {
        let mut id = Document::new();
        for column in &query.groups {
            id.insert(column.as_str(), format!("${column}"));
        }
        group.insert("_id", id);
        for column in &query.groups {
            group.insert(column.as_str(), last(column));
        }
        for column in query.effective_columns() {
            group.insert(column.replace('.', "_"), last(column));
        }
    }

    let mut unwinds = Vec::new();
    if let Some(spec) = &query.aggregate {
        let mut target = None;
        for column in &spec.columns {
            let parts: Vec<&str> = column.split(UNWIND_MARKER).collect();
            let column = match parts.as_slice() {
                [_] => column.clone(),
                [array, rest] => {
                    unwinds.push((*array).to_string());
                    format!("{array}.{rest}")
                }
                _ => return Err(QueryError::InvalidUnwindPath(column.clone())),
            };
            target = Some(column);
        }

        match (spec.function, target) {
            (AggregateFunction::Count, _) => {
                group.insert(AGGREGATE_FIELD, doc! { "$sum": 1 });
            }
            (function, Some(column)) => {
                let mut acc = Document::new();
                acc.insert(function.accumulator(), format!("${column}"));
                group.insert(AGGREGATE_FIELD, acc);
            }
            (_, None) => {}
        }
    }

    let mut pipeline = Pipeline::new();
    if !filter.is_empty() {
        pipeline.push(Stage::Match(filter));
    }
    for path in unwinds {
        pipeline.push(Stage::Unwind(path));
    }
    pipeline.push(Stage::Group(group));
    let sort = sort_document(query, config);
    if !sort.is_empty() {
        pipeline.push(Stage::Sort(sort));
    }
    if let Some(n) = query.skip.filter(|n| *n > 0) {
        pipeline.push(Stage::Skip(n));
    }
    if let Some(n) = query.limit.filter(|n| *n > 0) {
        pipeline.push(Stage::Limit(n));
    }
    if let Some(projection) = query.projection.as_ref().filter(|p| !p.is_empty()) {
        pipeline.push(Stage::Project(projection.clone()));
    }

    let mut options = doc! { "typeMap": config.type_map.clone() };
    merge_into(&mut options, &query.options);
    Ok(Strategy::Aggregate { pipeline, options })
}

fn plan_find(query: &QueryPlan, filter: Document, config: &TranslatorConfig) -> Strategy {
    let mut projection = Document::new();
    for column in query.effective_columns() {
        projection.insert(column.as_str(), true);
    }
    if let Some(custom) = &query.projection {
        merge_into(&mut projection, custom);
    }

    let mut options = Document::new();
    if let Some(ms) = query.timeout_ms {
        options.insert("maxTimeMS", as_i64(ms));
    }
    let sort = sort_document(query, config);
    if !sort.is_empty() {
        options.insert("sort", sort);
    }
    if let Some(n) = query.skip.filter(|n| *n > 0) {
        options.insert("skip", as_i64(n));
    }
    if let Some(n) = query.limit.filter(|n| *n > 0) {
        options.insert("limit", as_i64(n));
    }
    if let Some(hint) = &query.hint {
        options.insert("hint", hint.clone());
    }
    if !projection.is_empty() {
        options.insert("projection", projection);
    }
    options.insert("typeMap", config.type_map.clone());
    merge_into(&mut options, &query.options);

    Strategy::Find { filter, options }
}

fn sort_document(query: &QueryPlan, config: &TranslatorConfig) -> Document {
    let mut sort = Document::new();
    for (column, direction) in &query.orders {
        let key = if *column == config.natural_sort_column {
            "$natural"
        } else {
            column.as_str()
        };
        sort.insert(key, direction.as_i32());
    }
    sort
}

fn last(column: &str) -> Document {
    doc! { "$last": format!("${column}") }
}

/// Copy `extra` over `target`; keys in `extra` win.
fn merge_into(target: &mut Document, extra: &Document) {
    for (key, value) in extra {
        target.insert(key.clone(), value.clone());
    }
}
