// SPDX-License-Identifier: PMPL-1.0-or-later
//! DocBridge Query
//!
//! Translates SQL-shaped query descriptions into document-store commands:
//! filter documents, aggregation pipelines, and update operators.
//! Translation is pure; [`Query`] runs the result against any
//! [`docbridge_storage::Collection`].
//!
//! ```rust
//! use bson::doc;
//! use docbridge_query::{planner, QueryPlan, Strategy, TranslatorConfig};
//!
//! let plan = QueryPlan::new()
//!     .filter("age", ">=", 18)
//!     .order_by("name", "asc")
//!     .limit(20);
//! let Strategy::Find { filter, options } =
//!     planner::plan(&plan, &TranslatorConfig::default()).unwrap()
//! else {
//!     unreachable!()
//! };
//! assert_eq!(filter, doc! { "age": { "$gte": 18 } });
//! assert_eq!(options.get_document("sort").unwrap(), &doc! { "name": 1 });
//! ```

pub mod clause;
pub mod config;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod key;
pub mod operator;
pub mod pipeline;
pub mod plan;
pub mod planner;
pub mod query;
pub mod update;
pub mod value;

pub use clause::{Boolean, ClauseKind, WhereClause};
pub use config::TranslatorConfig;
pub use error::QueryError;
pub use filter::{compile, CompiledFilter, FieldConstraint};
pub use fingerprint::{fingerprint, Fingerprint};
pub use operator::Operator;
pub use pipeline::{Pipeline, Stage};
pub use plan::{AggregateFunction, AggregateSpec, Direction, QueryPlan};
pub use planner::{plan, Strategy};
pub use query::{Query, ResultSet};
pub use update::UpdateCommand;
pub use value::Value;
