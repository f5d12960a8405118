//! Per-request resolution state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::{Catalog, EntityDef, EntityKind};
use crate::config::ContextConfig;
use crate::error::Error;
use crate::store::DocumentStore;

use super::{BatchLoader, LoaderStats};

/// Everything one query resolution needs: the store, the catalog and one
/// loader per entity type.
///
/// Build a fresh context for every incoming query and drop it when the
/// query is answered. Loader caches live exactly as long as the context.
pub struct RequestContext {
    store: Arc<dyn DocumentStore>,
    catalog: Arc<Catalog>,
    config: ContextConfig,
    loaders: HashMap<EntityKind, BatchLoader>,
}

impl RequestContext {
    pub fn new(store: Arc<dyn DocumentStore>, catalog: Arc<Catalog>, config: ContextConfig) -> Self {
        let loaders = catalog
            .entities()
            .map(|def| {
                (
                    def.kind,
                    BatchLoader::new(def.collection.clone(), store.clone(), config.loader.clone()),
                )
            })
            .collect();

        Self {
            store,
            catalog,
            config,
            loaders,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Definition of an entity type.
    pub fn entity(&self, kind: EntityKind) -> Result<&EntityDef, Error> {
        self.catalog.get(kind).ok_or(Error::UnknownEntity(kind))
    }

    /// Loader for an entity type.
    pub fn loader(&self, kind: EntityKind) -> Result<&BatchLoader, Error> {
        self.loaders.get(&kind).ok_or(Error::UnknownEntity(kind))
    }

    /// Counters summed over every loader of this context.
    pub fn stats(&self) -> LoaderStats {
        self.loaders
            .values()
            .map(BatchLoader::stats)
            .fold(LoaderStats::default(), |mut total, stats| {
                total.fetches += stats.fetches;
                total.ids_requested += stats.ids_requested;
                total.cache_hits += stats.cache_hits;
                total
            })
    }
}
