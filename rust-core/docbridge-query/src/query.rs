// SPDX-License-Identifier: PMPL-1.0-or-later
//! Query executor.
//!
//! [`Query`] binds a [`QueryPlan`] to a [`Collection`]: reads plan the query
//! and run the chosen strategy, writes compile the scope into a filter and
//! send the mutation document. The executor adds no retries; storage errors
//! reach the caller as [`QueryError::Storage`].

use bson::{doc, Bson, Document};
use docbridge_storage::matcher::lookup;
use docbridge_storage::{Collection, Cursor};
use futures::TryStreamExt;
use tracing::{debug, info, warn};

use crate::config::TranslatorConfig;
use crate::error::QueryError;
use crate::filter;
use crate::fingerprint::{self, Fingerprint};
use crate::plan::{AggregateFunction, Direction, QueryPlan};
use crate::planner::{self, Strategy, AGGREGATE_FIELD};
use crate::update::{self, UpdateCommand};
use crate::value::Value;

/// Materialized results of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSet {
    /// Rows from a find, an aggregation, or a count.
    Documents(Vec<Document>),
    /// Distinct values of `column`.
    Values { column: String, values: Vec<Bson> },
}

impl ResultSet {
    pub fn len(&self) -> usize {
        match self {
            ResultSet::Documents(docs) => docs.len(),
            ResultSet::Values { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows as documents. Distinct values become `{column: value}` rows.
    pub fn into_documents(self) -> Vec<Document> {
        match self {
            ResultSet::Documents(docs) => docs,
            ResultSet::Values { column, values } => values
                .into_iter()
                .map(|value| {
                    let mut row = Document::new();
                    row.insert(column.as_str(), value);
                    row
                })
                .collect(),
        }
    }
}

/// A query plan bound to a collection.
pub struct Query<'a> {
    collection: &'a dyn Collection,
    plan: QueryPlan,
    config: TranslatorConfig,
    write_options: Document,
}

impl<'a> Query<'a> {
    pub fn new(collection: &'a dyn Collection) -> Self {
        Self {
            collection,
            plan: QueryPlan::new(),
            config: TranslatorConfig::default(),
            write_options: Document::new(),
        }
    }

    /// Use `config` instead of the default translator settings.
    pub fn with_config(mut self, config: TranslatorConfig) -> Result<Self, QueryError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Replace the plan wholesale.
    pub fn with_plan(mut self, plan: QueryPlan) -> Self {
        self.plan = plan;
        self
    }

    /// Edit the plan with its own builder methods.
    pub fn scope(mut self, build: impl FnOnce(QueryPlan) -> QueryPlan) -> Self {
        self.plan = build(self.plan);
        self
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    pub fn filter(
        self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.scope(|p| p.filter(column, operator, value))
    }

    pub fn or_filter(
        self,
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.scope(|p| p.or_filter(column, operator, value))
    }

    pub fn select<S: Into<String>>(self, columns: impl IntoIterator<Item = S>) -> Self {
        self.scope(|p| p.select(columns))
    }

    pub fn order_by(self, column: impl Into<String>, direction: impl Into<Direction>) -> Self {
        self.scope(|p| p.order_by(column, direction))
    }

    pub fn group_by<S: Into<String>>(self, columns: impl IntoIterator<Item = S>) -> Self {
        self.scope(|p| p.group_by(columns))
    }

    pub fn skip(self, n: u64) -> Self {
        self.scope(|p| p.skip(n))
    }

    pub fn limit(self, n: u64) -> Self {
        self.scope(|p| p.limit(n))
    }

    pub fn for_page(self, page: u64, per_page: u64) -> Self {
        self.scope(|p| p.for_page(page, per_page))
    }

    /// The `per_page` results after `last_id`, ordered by `column`.
    pub fn for_page_after_id(
        self,
        per_page: u64,
        last_id: impl Into<Value>,
        column: impl Into<String>,
    ) -> Self {
        self.scope(|p| p.for_page_after_id(per_page, last_id, column))
    }

    /// Options sent with every write (`upsert`, `multiple`, ...).
    pub fn with_write_options(mut self, options: Document) -> Self {
        for (key, value) in options {
            self.write_options.insert(key, value);
        }
        self
    }

    /// The strategy this query would run.
    pub fn strategy(&self) -> Result<Strategy, QueryError> {
        planner::plan(&self.plan, &self.config)
    }

    // -- reads --------------------------------------------------------------

    /// Run the query and materialize every result.
    pub async fn get(&self) -> Result<ResultSet, QueryError> {
        run(self.collection, planner::plan(&self.plan, &self.config)?).await
    }

    /// Run the query and stream the results. Only find and aggregate
    /// strategies can stream.
    pub async fn cursor(&self) -> Result<Cursor, QueryError> {
        match planner::plan(&self.plan, &self.config)? {
            Strategy::Find { filter, options } => Ok(self.collection.find(filter, options).await?),
            Strategy::Aggregate { pipeline, options } => Ok(self
                .collection
                .aggregate(pipeline.to_documents(), options)
                .await?),
            other => Err(QueryError::IncompatibleMode {
                strategy: other.name(),
            }),
        }
    }

    /// The first result, if any.
    pub async fn first(&self) -> Result<Option<Document>, QueryError> {
        let plan = self.plan.clone().limit(1);
        let rows = run(self.collection, planner::plan(&plan, &self.config)?).await?;
        Ok(rows.into_documents().into_iter().next())
    }

    /// The document whose identifier is `id`.
    pub async fn find(&self, id: impl Into<Value>) -> Result<Option<Document>, QueryError> {
        let plan = self
            .plan
            .clone()
            .filter(self.config.id_field.clone(), "=", id)
            .limit(1);
        let rows = run(self.collection, planner::plan(&plan, &self.config)?).await?;
        Ok(rows.into_documents().into_iter().next())
    }

    /// `column` of the first result.
    pub async fn value(&self, column: &str) -> Result<Option<Bson>, QueryError> {
        let plan = self.plan.clone().select([column]).limit(1);
        let rows = run(self.collection, planner::plan(&plan, &self.config)?).await?;
        Ok(rows
            .into_documents()
            .first()
            .and_then(|row| lookup(row, column).first().map(|v| (*v).clone())))
    }

    /// `column` of every result, skipping rows without it.
    pub async fn pluck(&self, column: &str) -> Result<Vec<Bson>, QueryError> {
        let plan = self.plan.clone().select([column]);
        let rows = run(self.collection, planner::plan(&plan, &self.config)?).await?;
        Ok(rows
            .into_documents()
            .iter()
            .filter_map(|row| lookup(row, column).first().map(|v| (*v).clone()))
            .collect())
    }

    /// `(key, column)` pairs of every result in order, skipping rows without
    /// `column`. ObjectId keys become their hex strings; a missing key is null.
    pub async fn pluck_with_key(
        &self,
        column: &str,
        key: &str,
    ) -> Result<Vec<(Bson, Bson)>, QueryError> {
        let plan = self.plan.clone().select([column, key]);
        let rows = run(self.collection, planner::plan(&plan, &self.config)?).await?;
        Ok(rows
            .into_documents()
            .iter()
            .filter_map(|row| {
                let value = lookup(row, column).first().map(|v| (*v).clone())?;
                let row_key = match lookup(row, key).first() {
                    Some(Bson::ObjectId(id)) => Bson::String(id.to_hex()),
                    Some(other) => (*other).clone(),
                    None => Bson::Null,
                };
                Some((row_key, value))
            })
            .collect())
    }

    pub async fn exists(&self) -> Result<bool, QueryError> {
        Ok(self.first().await?.is_some())
    }

    /// Run `function` over `columns` and return the first row's aggregate.
    pub async fn aggregate_value<S: Into<String>>(
        &self,
        function: AggregateFunction,
        columns: impl IntoIterator<Item = S>,
    ) -> Result<Option<Bson>, QueryError> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let plan = self
            .plan
            .clone()
            .select(columns.clone())
            .aggregate(function, columns);
        let rows = run(self.collection, planner::plan(&plan, &self.config)?).await?;
        Ok(rows
            .into_documents()
            .first()
            .and_then(|row| row.get(AGGREGATE_FIELD).cloned()))
    }

    pub async fn count(&self) -> Result<u64, QueryError> {
        let value = self.aggregate_value(AggregateFunction::Count, ["*"]).await?;
        Ok(match value {
            Some(Bson::Int32(n)) => u64::try_from(n).unwrap_or(0),
            Some(Bson::Int64(n)) => u64::try_from(n).unwrap_or(0),
            Some(Bson::Double(n)) if n > 0.0 => n as u64,
            _ => 0,
        })
    }

    pub async fn sum(&self, column: &str) -> Result<Option<Bson>, QueryError> {
        self.aggregate_value(AggregateFunction::Sum, [column]).await
    }

    pub async fn avg(&self, column: &str) -> Result<Option<Bson>, QueryError> {
        self.aggregate_value(AggregateFunction::Avg, [column]).await
    }

    pub async fn min(&self, column: &str) -> Result<Option<Bson>, QueryError> {
        self.aggregate_value(AggregateFunction::Min, [column]).await
    }

    pub async fn max(&self, column: &str) -> Result<Option<Bson>, QueryError> {
        self.aggregate_value(AggregateFunction::Max, [column]).await
    }

    /// Distinct values of `column`, or of the first selected column.
    pub async fn distinct_values(&self, column: Option<&str>) -> Result<Vec<Bson>, QueryError> {
        let plan = self.plan.clone().distinct(column);
        match run(self.collection, planner::plan(&plan, &self.config)?).await? {
            ResultSet::Values { values, .. } => Ok(values),
            ResultSet::Documents(_) => Ok(Vec::new()),
        }
    }

    /// Fingerprint of this query, namespaced by the collection name.
    pub fn fingerprint(&self) -> Result<Fingerprint, QueryError> {
        fingerprint::fingerprint(self.collection.name(), &self.plan)
    }

    // -- writes -------------------------------------------------------------

    /// Insert a batch of rows. Returns whether the write was acknowledged.
    pub async fn insert<V: Into<Value>>(
        &self,
        rows: impl IntoIterator<Item = V>,
    ) -> Result<bool, QueryError> {
        let docs = rows
            .into_iter()
            .map(|row| row_document(row.into()))
            .collect::<Result<Vec<_>, _>>()?;
        if docs.is_empty() {
            return Ok(true);
        }
        let count = docs.len();
        let result = self.collection.insert_many(docs).await?;
        info!(collection = self.collection.name(), count, "inserted documents");
        Ok(result.acknowledged)
    }

    /// Insert one row and return its identifier, or `None` when the write
    /// was not acknowledged.
    pub async fn insert_get_id(&self, row: impl Into<Value>) -> Result<Option<Bson>, QueryError> {
        let doc = row_document(row.into())?;
        let result = self.collection.insert_one(doc).await?;
        info!(collection = self.collection.name(), "inserted document");
        Ok(result.acknowledged.then_some(result.inserted_id))
    }

    /// Update every document in scope. Plain maps are wrapped in `$set`.
    pub async fn update(&self, values: impl Into<Value>) -> Result<u64, QueryError> {
        self.perform(update::update(values)?).await
    }

    pub async fn increment(
        &self,
        column: &str,
        amount: impl Into<Value>,
        extra: Option<Value>,
    ) -> Result<u64, QueryError> {
        self.perform(update::increment(column, amount, extra)?).await
    }

    pub async fn decrement(
        &self,
        column: &str,
        amount: impl Into<Value>,
        extra: Option<Value>,
    ) -> Result<u64, QueryError> {
        self.perform(update::decrement(column, amount, extra)?).await
    }

    pub async fn push(
        &self,
        column: &str,
        value: impl Into<Value>,
        unique: bool,
    ) -> Result<u64, QueryError> {
        self.perform(update::push(column, value, unique)).await
    }

    pub async fn pull(&self, column: &str, value: impl Into<Value>) -> Result<u64, QueryError> {
        self.perform(update::pull(column, value)).await
    }

    /// Remove `columns` from every document in scope.
    pub async fn drop<S: AsRef<str>>(
        &self,
        columns: impl IntoIterator<Item = S>,
    ) -> Result<u64, QueryError> {
        self.perform(update::drop(columns)).await
    }

    pub async fn unset<S: AsRef<str>>(
        &self,
        columns: impl IntoIterator<Item = S>,
    ) -> Result<u64, QueryError> {
        self.drop(columns).await
    }

    /// Delete every document in scope. An unacknowledged delete counts as
    /// zero.
    pub async fn delete(&self) -> Result<u64, QueryError> {
        let filter = filter::compile(&self.plan.clauses, &self.config)?.into_document();
        let result = self.collection.delete_many(filter).await?;
        if !result.acknowledged {
            warn!(collection = self.collection.name(), "delete was not acknowledged");
            return Ok(0);
        }
        info!(
            collection = self.collection.name(),
            deleted = result.deleted_count,
            "deleted documents"
        );
        Ok(result.deleted_count)
    }

    /// Delete the document whose identifier is `id`.
    pub async fn delete_id(&self, id: impl Into<Value>) -> Result<u64, QueryError> {
        let id_field = self.config.id_field.clone();
        Query {
            collection: self.collection,
            plan: self.plan.clone().filter(id_field, "=", id),
            config: self.config.clone(),
            write_options: self.write_options.clone(),
        }
        .delete()
        .await
    }

    /// Remove every document in the collection, ignoring the scope.
    pub async fn truncate(&self) -> Result<bool, QueryError> {
        let result = self.collection.delete_many(Document::new()).await?;
        info!(
            collection = self.collection.name(),
            deleted = result.deleted_count,
            "truncated collection"
        );
        Ok(result.acknowledged)
    }

    async fn perform(&self, command: UpdateCommand) -> Result<u64, QueryError> {
        let (operations, guard) = command.into_parts();
        let mut plan = self.plan.clone();
        if let Some(guard) = guard {
            plan = plan.with_clause(guard);
        }
        let filter = filter::compile(&plan.clauses, &self.config)?.into_document();
        let options = update::write_options(&self.config, &self.write_options);

        let result = self
            .collection
            .update_many(filter, operations, options)
            .await?;
        let affected = update::affected_count(&result);
        info!(
            collection = self.collection.name(),
            matched = result.matched_count,
            affected,
            "updated documents"
        );
        Ok(affected)
    }
}

async fn run(collection: &dyn Collection, strategy: Strategy) -> Result<ResultSet, QueryError> {
    debug!(collection = collection.name(), strategy = strategy.name(), "running query");
    let rows = match strategy {
        Strategy::Find { filter, options } => {
            let cursor = collection.find(filter, options).await?;
            ResultSet::Documents(cursor.try_collect().await?)
        }
        Strategy::Aggregate { pipeline, options } => {
            let cursor = collection.aggregate(pipeline.to_documents(), options).await?;
            ResultSet::Documents(cursor.try_collect().await?)
        }
        Strategy::Distinct { column, filter } => {
            let values = collection.distinct(&column, filter).await?;
            ResultSet::Values { column, values }
        }
        Strategy::CountShortcut { filter } => {
            let n = collection.count(filter).await?;
            let mut row = doc! { "_id": Bson::Null };
            row.insert(AGGREGATE_FIELD, i64::try_from(n).unwrap_or(i64::MAX));
            ResultSet::Documents(vec![row])
        }
    };
    Ok(rows)
}

fn row_document(row: Value) -> Result<Document, QueryError> {
    match row.into_bson() {
        Bson::Document(doc) => Ok(doc),
        other => Err(QueryError::InvalidUpdate(format!(
            "insert expects a map of columns, got {other}"
        ))),
    }
}
