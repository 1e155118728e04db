// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core collection trait for DocBridge.
//
// Defines the `Collection` trait the query translator hands its compiled
// commands to: filter documents for `find`/`count`/`distinct`/`delete_many`,
// aggregation pipelines for `aggregate`, and update documents for
// `update_many`. Implementations must be thread-safe and fully asynchronous.

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;

use crate::error::StorageError;

/// A forward-only, single-pass stream of documents produced by a read.
///
/// Items are pulled lazily from the backend; dropping the stream releases the
/// underlying cursor.
pub type Cursor = BoxStream<'static, Result<Document, StorageError>>;

/// Outcome of inserting a single document.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// Whether the write was acknowledged by the backend.
    pub acknowledged: bool,
    /// The `_id` of the inserted document.
    pub inserted_id: Bson,
}

/// Outcome of a batch insert.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    pub acknowledged: bool,
    pub inserted_ids: Vec<Bson>,
}

/// Outcome of an `update_many` call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateResult {
    /// Whether the write was acknowledged by the backend.
    pub acknowledged: bool,
    /// Documents matched by the filter.
    pub matched_count: u64,
    /// Documents actually changed by the update.
    pub modified_count: u64,
    /// Documents created because `upsert` was requested and nothing matched.
    pub upserted_count: u64,
    /// `_id` of the upserted document, if any.
    pub upserted_id: Option<Bson>,
}

/// Outcome of a `delete_many` call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

/// A schema-less document collection.
///
/// The translator never inspects how a collection evaluates a command; it
/// only relies on the shapes below. Errors are returned as-is to the caller
/// of the translator, which adds no retry logic.
#[async_trait]
pub trait Collection: Send + Sync {
    /// Run a filter with find options (`sort`, `skip`, `limit`, `projection`,
    /// `maxTimeMS`, `hint`, ...), returning a lazy cursor.
    async fn find(&self, filter: Document, options: Document) -> Result<Cursor, StorageError>;

    /// Run an aggregation pipeline, returning a lazy cursor.
    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: Document,
    ) -> Result<Cursor, StorageError>;

    /// Return the distinct values of `column` across documents matching
    /// `filter`, in first-seen order.
    async fn distinct(&self, column: &str, filter: Document) -> Result<Vec<Bson>, StorageError>;

    /// Count documents matching `filter`.
    async fn count(&self, filter: Document) -> Result<u64, StorageError>;

    /// Insert one document.
    async fn insert_one(&self, doc: Document) -> Result<InsertOneResult, StorageError>;

    /// Insert a batch of documents.
    async fn insert_many(&self, docs: Vec<Document>) -> Result<InsertManyResult, StorageError>;

    /// Apply `update` to every document matching `filter`.
    ///
    /// Recognised options: `multiple` (default true) and `upsert`.
    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: Document,
    ) -> Result<UpdateResult, StorageError>;

    /// Remove every document matching `filter`.
    async fn delete_many(&self, filter: Document) -> Result<DeleteResult, StorageError>;

    /// The collection name, used in logging and query fingerprints.
    fn name(&self) -> &str;
}
