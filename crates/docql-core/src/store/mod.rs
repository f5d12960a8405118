//! Document store seam.
//!
//! The query core hands complete pipelines to a [`DocumentStore`] and gets
//! raw documents back. [`MemoryStore`] executes pipelines in process.

mod eval;
mod memory;

pub use eval::{validate_path, QueryEvaluator};
pub use memory::MemoryStore;

pub(crate) use eval::flatten;

use std::time::Duration;

use async_trait::async_trait;
use docql_proto::{Document, Pipeline};

use crate::error::StoreError;

/// A store that executes aggregation pipelines against named collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run `pipeline` over `collection` and return the resulting documents.
    async fn aggregate(&self, collection: &str, pipeline: &Pipeline)
        -> Result<Vec<Document>, StoreError>;
}

/// Run a pipeline, failing with [`StoreError::Timeout`] when `limit` elapses
/// first.
pub async fn aggregate_within(
    store: &dyn DocumentStore,
    collection: &str,
    pipeline: &Pipeline,
    limit: Option<Duration>,
) -> Result<Vec<Document>, StoreError> {
    let fetch = store.aggregate(collection, pipeline);
    match limit {
        Some(limit) => tokio::time::timeout(limit, fetch)
            .await
            .map_err(|_| StoreError::Timeout(limit.as_millis() as u64))?,
        None => fetch.await,
    }
}
