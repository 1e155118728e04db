// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory collection for DocBridge.
//
// Keeps documents in insertion order inside a tokio `RwLock` and evaluates
// filters, pipelines and update operators with the matcher, aggregate and
// mutate modules. Intended for tests, development and small ephemeral
// datasets; it honours the command shapes the translator emits but does not
// try to be a complete document database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use futures::stream::{self, StreamExt};
use tokio::sync::RwLock;
use tracing::debug;

use crate::aggregate::{expect_count, project, run_pipeline, set_path, sort_documents};
use crate::collection::{
    Collection, Cursor, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult,
};
use crate::error::StorageError;
use crate::matcher::{lookup, matches, values_equal};
use crate::mutate::apply_update;

/// Settings for an [`InMemoryCollection`].
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Collection name reported by [`Collection::name`].
    pub name: String,
    /// When false, writes still happen but report an unacknowledged result
    /// with zero counts, like a fire-and-forget write concern.
    pub acknowledged: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            name: "in-memory".to_string(),
            acknowledged: true,
        }
    }
}

/// An in-memory document collection.
///
/// Cloning is cheap and clones share the same documents.
///
/// # Example
///
/// ```rust
/// use bson::doc;
/// use docbridge_storage::collection::Collection;
/// use docbridge_storage::memory::InMemoryCollection;
///
/// # tokio_test::block_on(async {
/// let users = InMemoryCollection::named("users");
/// users.insert_one(doc! { "name": "ada", "age": 36 }).await.unwrap();
/// assert_eq!(users.count(doc! { "age": { "$gt": 30 } }).await.unwrap(), 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryCollection {
    config: MemoryConfig,
    docs: Arc<RwLock<Vec<Document>>>,
    available: Arc<AtomicBool>,
}

impl InMemoryCollection {
    /// Create an empty collection with the default configuration.
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Create an empty, acknowledged collection called `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self::with_config(MemoryConfig {
            name: name.into(),
            ..MemoryConfig::default()
        })
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            config,
            docs: Arc::new(RwLock::new(Vec::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// Copy of every stored document, in insertion order.
    pub async fn snapshot(&self) -> Vec<Document> {
        self.docs.read().await.clone()
    }

    /// Make every subsequent call fail with [`StorageError::BackendUnavailable`].
    pub fn take_offline(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    pub fn bring_online(&self) {
        self.available.store(true, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::BackendUnavailable(format!(
                "collection '{}' is offline",
                self.config.name
            )))
        }
    }

    async fn matching(&self, filter: &Document) -> Result<Vec<Document>, StorageError> {
        let docs = self.docs.read().await;
        let mut out = Vec::new();
        for doc in docs.iter() {
            if matches(doc, filter)? {
                out.push(doc.clone());
            }
        }
        Ok(out)
    }
}

impl Default for InMemoryCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// Put an `_id` at the front of `doc` when it has none.
fn with_id(doc: Document) -> (Document, Bson) {
    if let Some(id) = doc.get("_id") {
        let id = id.clone();
        return (doc, id);
    }
    let id = Bson::ObjectId(ObjectId::new());
    let mut out = Document::new();
    out.insert("_id", id.clone());
    for (key, value) in doc {
        out.insert(key, value);
    }
    (out, id)
}

/// Build the starting document for an upsert from the equality parts of
/// `filter`. Operator conditions and `$or` branches contribute nothing.
fn upsert_seed(filter: &Document, seed: &mut Document) {
    for (key, value) in filter {
        if key == "$and" {
            if let Bson::Array(clauses) = value {
                for clause in clauses {
                    if let Bson::Document(clause) = clause {
                        upsert_seed(clause, seed);
                    }
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        let is_operator = matches!(
            value,
            Bson::Document(inner) if inner.keys().next().is_some_and(|k| k.starts_with('$'))
        );
        if !is_operator {
            set_path(seed, key, value.clone());
        }
    }
}

#[async_trait]
impl Collection for InMemoryCollection {
    async fn find(&self, filter: Document, options: Document) -> Result<Cursor, StorageError> {
        self.ensure_available()?;
        let mut docs = self.matching(&filter).await?;

        if let Ok(sort) = options.get_document("sort") {
            sort_documents(&mut docs, sort)?;
        }
        if let Some(skip) = options.get("skip") {
            let skip = expect_count("skip", skip)?;
            docs = docs.into_iter().skip(skip).collect();
        }
        if let Some(limit) = options.get("limit") {
            // A zero limit means no limit.
            let limit = expect_count("limit", limit)?;
            if limit > 0 {
                docs.truncate(limit);
            }
        }
        if let Ok(spec) = options.get_document("projection") {
            docs = docs
                .iter()
                .map(|doc| project(doc, spec))
                .collect::<Result<_, _>>()?;
        }

        debug!(collection = %self.config.name, returned = docs.len(), "find");
        Ok(stream::iter(docs.into_iter().map(Ok)).boxed())
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        _options: Document,
    ) -> Result<Cursor, StorageError> {
        self.ensure_available()?;
        let docs = self.snapshot().await;
        let out = run_pipeline(docs, &pipeline)?;
        debug!(
            collection = %self.config.name,
            stages = pipeline.len(),
            returned = out.len(),
            "aggregate"
        );
        Ok(stream::iter(out.into_iter().map(Ok)).boxed())
    }

    async fn distinct(&self, column: &str, filter: Document) -> Result<Vec<Bson>, StorageError> {
        self.ensure_available()?;
        let docs = self.matching(&filter).await?;
        let mut seen: Vec<Bson> = Vec::new();
        for doc in &docs {
            for value in lookup(doc, column) {
                let flattened = match value {
                    Bson::Array(items) => items.iter().collect::<Vec<_>>(),
                    other => vec![other],
                };
                for item in flattened {
                    if !seen.iter().any(|s| values_equal(s, item)) {
                        seen.push(item.clone());
                    }
                }
            }
        }
        Ok(seen)
    }

    async fn count(&self, filter: Document) -> Result<u64, StorageError> {
        self.ensure_available()?;
        let docs = self.docs.read().await;
        let mut n = 0u64;
        for doc in docs.iter() {
            if matches(doc, &filter)? {
                n += 1;
            }
        }
        Ok(n)
    }

    async fn insert_one(&self, doc: Document) -> Result<InsertOneResult, StorageError> {
        self.ensure_available()?;
        let (doc, id) = with_id(doc);
        self.docs.write().await.push(doc);
        debug!(collection = %self.config.name, "insert_one");
        Ok(InsertOneResult {
            acknowledged: self.config.acknowledged,
            inserted_id: id,
        })
    }

    async fn insert_many(&self, docs: Vec<Document>) -> Result<InsertManyResult, StorageError> {
        self.ensure_available()?;
        let mut ids = Vec::with_capacity(docs.len());
        let mut store = self.docs.write().await;
        for doc in docs {
            let (doc, id) = with_id(doc);
            store.push(doc);
            ids.push(id);
        }
        debug!(collection = %self.config.name, inserted = ids.len(), "insert_many");
        Ok(InsertManyResult {
            acknowledged: self.config.acknowledged,
            inserted_ids: ids,
        })
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: Document,
    ) -> Result<UpdateResult, StorageError> {
        self.ensure_available()?;
        let multiple = options.get_bool("multiple").unwrap_or(true);
        let upsert = options.get_bool("upsert").unwrap_or(false);

        let mut result = UpdateResult {
            acknowledged: true,
            ..UpdateResult::default()
        };
        let mut store = self.docs.write().await;
        for doc in store.iter_mut() {
            if !matches(doc, &filter)? {
                continue;
            }
            // Apply to a copy so a failing operator leaves the document intact.
            let mut next = doc.clone();
            result.matched_count += 1;
            if apply_update(&mut next, &update)? {
                *doc = next;
                result.modified_count += 1;
            }
            if !multiple {
                break;
            }
        }

        if result.matched_count == 0 && upsert {
            let mut seed = Document::new();
            upsert_seed(&filter, &mut seed);
            apply_update(&mut seed, &update)?;
            let (seed, id) = with_id(seed);
            store.push(seed);
            result.upserted_count = 1;
            result.upserted_id = Some(id);
        }
        debug!(
            collection = %self.config.name,
            matched = result.matched_count,
            modified = result.modified_count,
            upserted = result.upserted_count,
            "update_many"
        );

        if !self.config.acknowledged {
            return Ok(UpdateResult::default());
        }
        Ok(result)
    }

    async fn delete_many(&self, filter: Document) -> Result<DeleteResult, StorageError> {
        self.ensure_available()?;
        let mut store = self.docs.write().await;
        let mut keep = Vec::with_capacity(store.len());
        for doc in store.iter() {
            keep.push(!matches(doc, &filter)?);
        }
        let before = store.len();
        let mut flags = keep.into_iter();
        store.retain(|_| flags.next().unwrap_or(true));
        let deleted = (before - store.len()) as u64;
        debug!(collection = %self.config.name, deleted, "delete_many");

        if !self.config.acknowledged {
            return Ok(DeleteResult::default());
        }
        Ok(DeleteResult {
            acknowledged: true,
            deleted_count: deleted,
        })
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
