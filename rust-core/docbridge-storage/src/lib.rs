// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DocBridge Collection Abstraction
//
// This crate defines the document-collection contract the DocBridge query
// translator executes against, plus an in-memory reference collection. The
// `Collection` trait accepts the native command shapes (filter documents,
// aggregation pipelines, update documents) so any document-store driver can
// sit behind it.
//
// # Modules
//
// - [`collection`] -- The `Collection` trait, cursor type and write results.
// - [`error`] -- The `StorageError` enum covering all collection failure modes.
// - [`memory`] -- An in-memory collection for tests and ephemeral workloads.
// - [`metrics`] -- A transparent wrapper that counts calls and latency.
// - [`matcher`], [`aggregate`], [`mutate`] -- Filter, pipeline and update
//   evaluation used by the in-memory collection.
//
// # Example
//
// ```rust
// use bson::doc;
// use docbridge_storage::{Collection, InMemoryCollection, MetricsCollection};
//
// # tokio_test::block_on(async {
// let metered = MetricsCollection::new(InMemoryCollection::named("users"));
// metered.insert_one(doc! { "name": "ada" }).await.unwrap();
// assert_eq!(metered.count(doc! { "name": "ada" }).await.unwrap(), 1);
// # });
// ```

pub mod aggregate;
pub mod collection;
pub mod error;
pub mod matcher;
pub mod memory;
pub mod metrics;
pub mod mutate;

pub use collection::{
    Collection, Cursor, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult,
};
pub use error::StorageError;
pub use memory::{InMemoryCollection, MemoryConfig};
pub use metrics::{CollectionStats, MetricsCollection};
