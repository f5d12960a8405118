//! Request-scoped batch loading.
//!
//! A [`BatchLoader`] caches the records of one entity type for the lifetime
//! of a single request. Loads are registered synchronously and collected
//! into a window; the window is dispatched as one storage fetch (or one per
//! `max_batch_size` ids) when any of its loads is first awaited or when
//! [`BatchLoader::dispatch`] is called. Loads registered after that point
//! start the next window.

mod context;

pub use context::RequestContext;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use docql_proto::document::{document_paths, merge_documents};
use docql_proto::{Document, NativeQuery, Pipeline, Projection, Stage, ID_FIELD};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::LoaderConfig;
use crate::error::StoreError;
use crate::store::{aggregate_within, DocumentStore};

/// Result of a single load. `None` means the id does not exist.
pub type LoadResult = Result<Option<Document>, StoreError>;

type WindowHandle = Shared<BoxFuture<'static, Result<(), StoreError>>>;

/// Loader counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Storage fetches issued.
    pub fetches: usize,
    /// Ids sent to the store across all fetches.
    pub ids_requested: usize,
    /// Loads answered from the cache without joining a window.
    pub cache_hits: usize,
}

enum Slot {
    Pending {
        generation: u64,
        handle: WindowHandle,
    },
    Resolved {
        record: Option<Document>,
        present: BTreeSet<String>,
    },
}

struct Window {
    generation: u64,
    order: Vec<String>,
    paths: HashMap<String, BTreeSet<String>>,
    handle: WindowHandle,
}

impl Window {
    fn request(&mut self, id: &str, paths: impl IntoIterator<Item = String>) {
        if !self.paths.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.paths.entry(id.to_string()).or_default().extend(paths);
    }
}

#[derive(Default)]
struct LoaderState {
    slots: HashMap<String, Slot>,
    window: Option<Window>,
    next_generation: u64,
    stats: LoaderStats,
}

struct LoaderInner {
    collection: String,
    store: Arc<dyn DocumentStore>,
    config: LoaderConfig,
    state: Mutex<LoaderState>,
}

enum Step {
    Ready(Option<Document>),
    Wait(WindowHandle),
}

/// Per-entity-type cache with batched fetches.
///
/// Cloning a loader yields another handle to the same cache.
#[derive(Clone)]
pub struct BatchLoader {
    inner: Arc<LoaderInner>,
}

impl BatchLoader {
    pub fn new(
        collection: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                collection: collection.into(),
                store,
                config,
                state: Mutex::new(LoaderState::default()),
            }),
        }
    }

    /// Collection this loader reads from.
    pub fn collection(&self) -> &str {
        &self.inner.collection
    }

    /// Load a record by id with at least `fields` present.
    ///
    /// The load is registered before this method returns, so every load
    /// issued before the window is dispatched shares its fetch. A cached
    /// record that already carries every requested path resolves without a
    /// storage call.
    pub fn load(&self, id: &str, fields: &Projection) -> BoxFuture<'static, LoadResult> {
        let wanted: BTreeSet<String> = fields
            .paths()
            .map(str::to_string)
            .chain(std::iter::once(ID_FIELD.to_string()))
            .collect();

        let first = {
            let mut state = self.inner.state.lock();
            let step = self.step(&mut state, id, &wanted);
            if matches!(step, Step::Ready(_)) {
                state.stats.cache_hits += 1;
            }
            step
        };

        let loader = self.clone();
        let id = id.to_string();
        async move {
            let mut step = first;
            loop {
                match step {
                    Step::Ready(record) => return Ok(record),
                    Step::Wait(handle) => handle.await?,
                }
                step = {
                    let mut state = loader.inner.state.lock();
                    loader.step(&mut state, &id, &wanted)
                };
            }
        }
        .boxed()
    }

    /// Dispatch the open window, if any, and wait for it to complete.
    pub async fn dispatch(&self) -> Result<(), StoreError> {
        let handle = {
            let state = self.inner.state.lock();
            state.window.as_ref().map(|window| window.handle.clone())
        };
        match handle {
            Some(handle) => handle.await,
            None => Ok(()),
        }
    }

    /// Seed the cache with records fetched elsewhere.
    ///
    /// Every dotted path present on a record is marked known. Existing
    /// entries are never overwritten; records without an id are skipped.
    pub fn prime_many<'a, I>(&self, records: I)
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut state = self.inner.state.lock();
        let mut primed = 0usize;
        for record in records {
            let Some(id) = record.get(ID_FIELD).map(id_key) else {
                continue;
            };
            state.slots.entry(id).or_insert_with(|| {
                primed += 1;
                Slot::Resolved {
                    present: document_paths(record),
                    record: Some(record.clone()),
                }
            });
        }
        trace!(collection = %self.inner.collection, primed, "primed loader cache");
    }

    /// Snapshot of the loader counters.
    pub fn stats(&self) -> LoaderStats {
        self.inner.state.lock().stats
    }

    /// Decide what a load for `id` needs next, registering it in the open
    /// window when a fetch is required.
    fn step(&self, state: &mut LoaderState, id: &str, wanted: &BTreeSet<String>) -> Step {
        let open = state.window.as_ref().map(|window| window.generation);

        match state.slots.get(id) {
            Some(Slot::Resolved { record: None, .. }) => Step::Ready(None),
            Some(Slot::Resolved {
                record: Some(record),
                present,
            }) => {
                let missing: Vec<String> = wanted
                    .iter()
                    .filter(|path| !is_known(present, path))
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    return Step::Ready(Some(record.clone()));
                }
                let window = self.open_window(state);
                window.request(id, missing.into_iter().chain([ID_FIELD.to_string()]));
                Step::Wait(window.handle.clone())
            }
            Some(Slot::Pending { generation, handle }) => {
                if Some(*generation) != open {
                    // Already in flight; re-check once it lands.
                    return Step::Wait(handle.clone());
                }
                let window = self.open_window(state);
                window.request(id, wanted.iter().cloned());
                Step::Wait(window.handle.clone())
            }
            None => {
                let window = self.open_window(state);
                window.request(id, wanted.iter().cloned());
                let generation = window.generation;
                let handle = window.handle.clone();
                state.slots.insert(
                    id.to_string(),
                    Slot::Pending {
                        generation,
                        handle: handle.clone(),
                    },
                );
                Step::Wait(handle)
            }
        }
    }

    fn open_window<'s>(&self, state: &'s mut LoaderState) -> &'s mut Window {
        let LoaderState {
            window,
            next_generation,
            ..
        } = state;
        window.get_or_insert_with(|| {
            let generation = *next_generation;
            *next_generation += 1;
            let handle = run_window(Arc::downgrade(&self.inner), generation)
                .boxed()
                .shared();
            Window {
                generation,
                order: Vec::new(),
                paths: HashMap::new(),
                handle,
            }
        })
    }
}

/// Take window `generation` and fetch it. Runs when the window's handle is
/// first polled; later polls share the outcome.
async fn run_window(inner: Weak<LoaderInner>, generation: u64) -> Result<(), StoreError> {
    let inner = inner
        .upgrade()
        .ok_or_else(|| StoreError::Backend("loader dropped before dispatch".to_string()))?;

    let window = {
        let mut state = inner.state.lock();
        match state.window.take() {
            Some(window) if window.generation == generation => window,
            other => {
                state.window = other;
                return Ok(());
            }
        }
    };

    let requests: Vec<(String, BTreeSet<String>)> = window
        .order
        .iter()
        .filter_map(|id| window.paths.get(id).map(|paths| (id.clone(), paths.clone())))
        .collect();
    let batch_size = inner.config.max_batch_size.max(1);

    debug!(
        collection = %inner.collection,
        generation,
        ids = requests.len(),
        fetches = requests.len().div_ceil(batch_size),
        "dispatching load window"
    );

    let mut fetched: HashMap<String, Document> = HashMap::new();
    for chunk in requests.chunks(batch_size) {
        match fetch_chunk(&inner, chunk).await {
            Ok(docs) => {
                for doc in docs {
                    if let Some(id) = doc.get(ID_FIELD).map(id_key) {
                        fetched.insert(id, doc);
                    }
                }
            }
            Err(err) => {
                // Pending slots of this window are dropped so a later
                // request starts over; resolved records stay cached.
                let mut state = inner.state.lock();
                for (id, _) in &requests {
                    if matches!(state.slots.get(id), Some(Slot::Pending { generation: g, .. }) if *g == generation)
                    {
                        state.slots.remove(id);
                    }
                }
                return Err(err);
            }
        }
    }

    let mut state = inner.state.lock();
    for (id, paths) in requests {
        let incoming = fetched.remove(&id);
        match state.slots.get_mut(&id) {
            Some(Slot::Resolved {
                record: Some(record),
                present,
            }) => {
                if let Some(doc) = incoming {
                    merge_documents(record, doc);
                }
                present.extend(paths);
            }
            Some(Slot::Resolved { record: None, .. }) => {}
            Some(Slot::Pending { .. }) | None => {
                state.slots.insert(
                    id,
                    Slot::Resolved {
                        record: incoming,
                        present: paths,
                    },
                );
            }
        }
    }
    Ok(())
}

async fn fetch_chunk(
    inner: &LoaderInner,
    chunk: &[(String, BTreeSet<String>)],
) -> Result<Vec<Document>, StoreError> {
    let query = NativeQuery::Or(
        chunk
            .iter()
            .map(|(id, _)| NativeQuery::eq(ID_FIELD, id.as_str()))
            .collect(),
    );
    let projection: Projection = chunk
        .iter()
        .flat_map(|(_, paths)| paths.iter().cloned())
        .collect();
    let pipeline = Pipeline::new()
        .with_stage(Stage::Match(query))
        .with_stage(Stage::Project(projection));

    {
        let mut state = inner.state.lock();
        state.stats.fetches += 1;
        state.stats.ids_requested += chunk.len();
    }

    aggregate_within(
        inner.store.as_ref(),
        &inner.collection,
        &pipeline,
        inner.config.fetch_timeout,
    )
    .await
}

/// A path is known when it, or an object it lives in, was fetched whole.
fn is_known(present: &BTreeSet<String>, path: &str) -> bool {
    present.contains(path)
        || path
            .match_indices('.')
            .any(|(end, _)| present.contains(&path[..end]))
}

/// Cache key of a record id.
pub(crate) fn id_key(value: &Value) -> String {
    match value {
        Value::String(id) => id.clone(),
        other => other.to_string(),
    }
}
