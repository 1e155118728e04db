// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metrics-collecting wrapper for DocBridge collections.
//
// Wraps any `Collection` and counts reads and writes, sums their wall-clock
// latency, and tallies documents written. Tests use it to assert how many
// round trips a translated query costs.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bson::{Bson, Document};
use tokio::sync::RwLock;

use crate::collection::{
    Collection, Cursor, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult,
};
use crate::error::StorageError;

/// Accumulated statistics for a collection.
///
/// All counters are monotonically increasing for the lifetime of the
/// [`MetricsCollection`] that owns them.
#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    /// Number of `find` calls.
    pub find_count: u64,
    /// Number of `aggregate` calls.
    pub aggregate_count: u64,
    /// Number of `distinct` calls.
    pub distinct_count: u64,
    /// Number of `count` calls.
    pub count_count: u64,
    /// Number of `insert_one` and `insert_many` calls.
    pub insert_count: u64,
    /// Number of `update_many` calls.
    pub update_count: u64,
    /// Number of `delete_many` calls.
    pub delete_count: u64,
    /// Calls that returned an error.
    pub error_count: u64,
    /// Cumulative latency of all read calls, in milliseconds.
    pub read_latency_sum_ms: f64,
    /// Cumulative latency of all write calls, in milliseconds.
    pub write_latency_sum_ms: f64,
    /// Documents passed to `insert_one`/`insert_many`.
    pub documents_inserted: u64,
}

impl CollectionStats {
    /// Total round trips of any kind.
    pub fn total_calls(&self) -> u64 {
        self.find_count
            + self.aggregate_count
            + self.distinct_count
            + self.count_count
            + self.insert_count
            + self.update_count
            + self.delete_count
    }
}

#[derive(Clone, Copy)]
enum Call {
    Find,
    Aggregate,
    Distinct,
    Count,
    Insert(u64),
    Update,
    Delete,
}

/// A collection wrapper that collects call metrics.
///
/// # Example
///
/// ```rust
/// use bson::doc;
/// use docbridge_storage::collection::Collection;
/// use docbridge_storage::memory::InMemoryCollection;
/// use docbridge_storage::metrics::MetricsCollection;
///
/// # tokio_test::block_on(async {
/// let metered = MetricsCollection::new(InMemoryCollection::named("users"));
/// metered.insert_one(doc! { "a": 1 }).await.unwrap();
/// metered.count(doc! {}).await.unwrap();
///
/// let stats = metered.stats().await;
/// assert_eq!(stats.insert_count, 1);
/// assert_eq!(stats.count_count, 1);
/// # });
/// ```
pub struct MetricsCollection<C: Collection> {
    inner: C,
    stats: Arc<RwLock<CollectionStats>>,
}

impl<C: Collection> MetricsCollection<C> {
    /// Wrap `inner` with metrics collection.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            stats: Arc::new(RwLock::new(CollectionStats::default())),
        }
    }

    /// Return a snapshot of the current statistics.
    pub async fn stats(&self) -> CollectionStats {
        self.stats.read().await.clone()
    }

    /// Reset all statistics to zero.
    pub async fn reset_stats(&self) {
        let mut s = self.stats.write().await;
        *s = CollectionStats::default();
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn record(&self, call: Call, started: Instant, ok: bool) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut s = self.stats.write().await;
        match call {
            Call::Find => s.find_count += 1,
            Call::Aggregate => s.aggregate_count += 1,
            Call::Distinct => s.distinct_count += 1,
            Call::Count => s.count_count += 1,
            Call::Insert(docs) => {
                s.insert_count += 1;
                if ok {
                    s.documents_inserted += docs;
                }
            }
            Call::Update => s.update_count += 1,
            Call::Delete => s.delete_count += 1,
        }
        match call {
            Call::Find | Call::Aggregate | Call::Distinct | Call::Count => {
                s.read_latency_sum_ms += elapsed_ms
            }
            _ => s.write_latency_sum_ms += elapsed_ms,
        }
        if !ok {
            s.error_count += 1;
        }
    }
}

#[async_trait]
impl<C: Collection> Collection for MetricsCollection<C> {
    async fn find(&self, filter: Document, options: Document) -> Result<Cursor, StorageError> {
        let start = Instant::now();
        let result = self.inner.find(filter, options).await;
        self.record(Call::Find, start, result.is_ok()).await;
        result
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: Document,
    ) -> Result<Cursor, StorageError> {
        let start = Instant::now();
        let result = self.inner.aggregate(pipeline, options).await;
        self.record(Call::Aggregate, start, result.is_ok()).await;
        result
    }

    async fn distinct(&self, column: &str, filter: Document) -> Result<Vec<Bson>, StorageError> {
        let start = Instant::now();
        let result = self.inner.distinct(column, filter).await;
        self.record(Call::Distinct, start, result.is_ok()).await;
        result
    }

    async fn count(&self, filter: Document) -> Result<u64, StorageError> {
        let start = Instant::now();
        let result = self.inner.count(filter).await;
        self.record(Call::Count, start, result.is_ok()).await;
        result
    }

    async fn insert_one(&self, doc: Document) -> Result<InsertOneResult, StorageError> {
        let start = Instant::now();
        let result = self.inner.insert_one(doc).await;
        self.record(Call::Insert(1), start, result.is_ok()).await;
        result
    }

    async fn insert_many(&self, docs: Vec<Document>) -> Result<InsertManyResult, StorageError> {
        let n = docs.len() as u64;
        let start = Instant::now();
        let result = self.inner.insert_many(docs).await;
        self.record(Call::Insert(n), start, result.is_ok()).await;
        result
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: Document,
    ) -> Result<UpdateResult, StorageError> {
        let start = Instant::now();
        let result = self.inner.update_many(filter, update, options).await;
        self.record(Call::Update, start, result.is_ok()).await;
        result
    }

    async fn delete_many(&self, filter: Document) -> Result<DeleteResult, StorageError> {
        let start = Instant::now();
        let result = self.inner.delete_many(filter).await;
        self.record(Call::Delete, start, result.is_ok()).await;
        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCollection;
    use bson::doc;

    #[tokio::test]
    async fn test_counts_each_call_kind() {
        let metered = MetricsCollection::new(InMemoryCollection::new());
        metered
            .insert_many(vec![doc! { "a": 1 }, doc! { "a": 2 }])
            .await
            .unwrap();
        metered.find(doc! {}, doc! {}).await.unwrap();
        metered.aggregate(vec![], doc! {}).await.unwrap();
        metered.distinct("a", doc! {}).await.unwrap();
        metered.count(doc! {}).await.unwrap();
        metered
            .update_many(doc! {}, doc! { "$set": { "b": 1 } }, doc! {})
            .await
            .unwrap();
        metered.delete_many(doc! { "a": 1 }).await.unwrap();

        let stats = metered.stats().await;
        assert_eq!(stats.insert_count, 1);
        assert_eq!(stats.documents_inserted, 2);
        assert_eq!(stats.find_count, 1);
        assert_eq!(stats.aggregate_count, 1);
        assert_eq!(stats.distinct_count, 1);
        assert_eq!(stats.count_count, 1);
        assert_eq!(stats.update_count, 1);
        assert_eq!(stats.delete_count, 1);
        assert_eq!(stats.total_calls(), 7);
        assert_eq!(stats.error_count, 0);
    }

    #[tokio::test]
    async fn test_errors_are_counted() {
        let inner = InMemoryCollection::new();
        inner.take_offline();
        let metered = MetricsCollection::new(inner);
        assert!(metered.count(doc! {}).await.is_err());
        assert!(metered.insert_one(doc! { "a": 1 }).await.is_err());

        let stats = metered.stats().await;
        assert_eq!(stats.error_count, 2);
        assert_eq!(stats.documents_inserted, 0);
    }

    #[tokio::test]
    async fn test_latency_is_recorded() {
        let metered = MetricsCollection::new(InMemoryCollection::new());
        metered.insert_one(doc! { "a": 1 }).await.unwrap();
        metered.count(doc! {}).await.unwrap();
        let stats = metered.stats().await;
        assert!(stats.read_latency_sum_ms >= 0.0);
        assert!(stats.write_latency_sum_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let metered = MetricsCollection::new(InMemoryCollection::new());
        metered.count(doc! {}).await.unwrap();
        metered.reset_stats().await;
        assert_eq!(metered.stats().await.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_name_delegates_to_inner() {
        let metered = MetricsCollection::new(InMemoryCollection::named("orders"));
        assert_eq!(metered.name(), "orders");
        assert_eq!(metered.inner().name(), "orders");
    }
}
