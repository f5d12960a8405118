//! Request context configuration.

use std::time::Duration;

/// Default number of ids fetched per storage call.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Batch loader configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Maximum ids per storage fetch; larger windows are split.
    pub max_batch_size: usize,

    /// Per-fetch timeout. None waits indefinitely.
    pub fetch_timeout: Option<Duration>,
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            fetch_timeout: None,
        }
    }

    /// Set the maximum batch size (at least 1).
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Set the per-fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration applied to every request context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextConfig {
    /// Settings shared by all loaders of a context.
    pub loader: LoaderConfig,
}

impl ContextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the loader configuration.
    pub fn with_loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }
}
