//! DocQL Core - Filter compilation, listing pipelines, and batched loading.
//!
//! This crate turns structured field selections and filter trees into
//! storage pipelines for a document store, and resolves entities by id
//! through request-scoped batch loaders.

pub mod catalog;
pub mod config;
pub mod error;
pub mod loader;
pub mod query;
pub mod resolver;
pub mod store;

pub use catalog::{Catalog, EntityDef, EntityKind, Link, RelationDef};
pub use config::{ContextConfig, LoaderConfig, DEFAULT_MAX_BATCH_SIZE};
pub use error::{Error, StoreError};
pub use loader::{BatchLoader, LoadResult, LoaderStats, RequestContext};
pub use query::{
    selection_paths, FieldSelector, FilterCompiler, ListingPlan, ListingPlanner, Partition,
    PipelineBuilder,
};
pub use resolver::Resolver;
pub use store::{aggregate_within, DocumentStore, MemoryStore, QueryEvaluator};

/// Re-export protocol types.
pub use docql_proto as proto;
