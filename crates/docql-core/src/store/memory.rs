//! In-process document store.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use docql_proto::document::{path_values, select_paths};
use docql_proto::{Document, Lookup, Pipeline, Projection, Stage, Unwind, ID_FIELD};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use super::eval::{flatten, validate_path, values_equal, QueryEvaluator};
use super::DocumentStore;
use crate::catalog::Catalog;
use crate::error::StoreError;

/// Document store backed by in-memory collections.
///
/// Collections must exist before they are queried; inserting into a
/// collection creates it. Every `aggregate` call is counted and recorded so
/// callers can observe how many round trips a request made.
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<String, Vec<Document>>,
    calls: AtomicUsize,
    executed: Mutex<Vec<(String, Pipeline)>>,
}

impl MemoryStore {
    /// Create an empty store with no collections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with an empty collection for every catalog entity.
    pub fn for_catalog(catalog: &Catalog) -> Self {
        let store = Self::new();
        for entity in catalog.entities() {
            store.create_collection(&entity.collection);
        }
        store
    }

    /// Load collections from a seed object of the form
    /// `{"collection": [documents...]}`.
    pub fn load_seed(&self, seed: Value) -> Result<(), StoreError> {
        let Value::Object(collections) = seed else {
            return Err(StoreError::Backend(
                "seed data must be an object of collections".to_string(),
            ));
        };
        for (name, docs) in collections {
            let Value::Array(docs) = docs else {
                return Err(StoreError::Backend(format!(
                    "seed collection '{name}' must be an array"
                )));
            };
            self.create_collection(&name);
            for doc in docs {
                match doc {
                    Value::Object(doc) => self.insert(&name, doc),
                    _ => {
                        return Err(StoreError::Backend(format!(
                            "seed collection '{name}' contains a non-object document"
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    pub fn create_collection(&self, name: &str) {
        self.collections.entry(name.to_string()).or_default();
    }

    /// Append a document to a collection, creating the collection if needed.
    pub fn insert(&self, collection: &str, doc: Document) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |docs| docs.len())
    }

    /// Number of `aggregate` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every pipeline executed so far, with its collection.
    pub fn executed(&self) -> Vec<(String, Pipeline)> {
        self.executed.lock().clone()
    }

    fn snapshot(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        // Clone out so the shard lock is released before nested lookups.
        self.collections
            .get(collection)
            .map(|docs| docs.value().clone())
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))
    }

    fn run(&self, mut docs: Vec<Document>, stages: &[Stage]) -> Result<Vec<Document>, StoreError> {
        for stage in stages {
            docs = match stage {
                Stage::Match(query) => {
                    let mut kept = Vec::with_capacity(docs.len());
                    for doc in docs {
                        if QueryEvaluator::matches(query, &doc)? {
                            kept.push(doc);
                        }
                    }
                    kept
                }
                Stage::Lookup(lookup) => self.lookup(docs, lookup)?,
                Stage::Unwind(unwind) => unwind_docs(docs, unwind)?,
                Stage::Project(projection) => project_docs(docs, projection)?,
            };
        }
        Ok(docs)
    }

    fn lookup(&self, docs: Vec<Document>, lookup: &Lookup) -> Result<Vec<Document>, StoreError> {
        validate_path(&lookup.local_field)?;
        validate_path(&lookup.foreign_field)?;
        validate_path(&lookup.alias)?;

        let foreign = self.run(self.snapshot(&lookup.from)?, &lookup.pipeline)?;

        Ok(docs
            .into_iter()
            .map(|mut doc| {
                let local = flatten(path_values(&doc, &lookup.local_field));
                let joined: Vec<Value> = foreign
                    .iter()
                    .filter(|candidate| {
                        flatten(path_values(candidate, &lookup.foreign_field))
                            .into_iter()
                            .any(|value| local.iter().any(|l| values_equal(l, value)))
                    })
                    .cloned()
                    .map(Value::Object)
                    .collect();
                doc.insert(lookup.alias.clone(), Value::Array(joined));
                doc
            })
            .collect())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
    ) -> Result<Vec<Document>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed
            .lock()
            .push((collection.to_string(), pipeline.clone()));

        let docs = self.run(self.snapshot(collection)?, pipeline.stages())?;
        trace!(collection, stages = pipeline.len(), returned = docs.len(), "aggregate");
        Ok(docs)
    }
}

/// One output document per array element. Hosts whose value is missing,
/// null or an empty array are dropped.
fn unwind_docs(docs: Vec<Document>, unwind: &Unwind) -> Result<Vec<Document>, StoreError> {
    validate_path(&unwind.path)?;
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match doc.get(&unwind.path) {
            Some(Value::Array(items)) => {
                for item in items {
                    let mut copy = doc.clone();
                    copy.insert(unwind.path.clone(), item.clone());
                    out.push(copy);
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

/// Inclusion projection keeps `_id` unless it is explicitly excluded. A
/// projection with no included paths removes the excluded top-level paths.
fn project_docs(docs: Vec<Document>, projection: &Projection) -> Result<Vec<Document>, StoreError> {
    for (path, _) in projection.entries() {
        validate_path(path)?;
    }

    let mut included: Vec<&str> = projection.paths().collect();

    if included.is_empty() {
        let excluded: Vec<&str> = projection.entries().map(|(path, _)| path).collect();
        return Ok(docs
            .into_iter()
            .map(|mut doc| {
                for path in &excluded {
                    remove_path(&mut doc, path);
                }
                doc
            })
            .collect());
    }

    let keep_id = !projection
        .entries()
        .any(|(path, included)| path == ID_FIELD && !included);
    if keep_id {
        included.push(ID_FIELD);
    }

    Ok(docs
        .iter()
        .map(|doc| select_paths(doc, included.iter().copied()))
        .collect())
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Value::Object(child)) => remove_path(child, rest),
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::Object(child) = item {
                        remove_path(child, rest);
                    }
                }
            }
            _ => {}
        },
    }
}
