//! Runner configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use docql_core::{ContextConfig, LoaderConfig, DEFAULT_MAX_BATCH_SIZE};

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Seed file of the form `{"collection": [documents...]}`.
    pub data_path: PathBuf,

    /// Query request file.
    pub query_path: PathBuf,

    /// Per-request context settings.
    pub context: ContextConfig,

    /// Pretty-print the JSON result.
    pub pretty: bool,
}

impl CliConfig {
    pub fn new(data_path: impl Into<PathBuf>, query_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            query_path: query_path.into(),
            context: ContextConfig::default(),
            pretty: true,
        }
    }

    /// Set the context configuration.
    pub fn with_context(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    /// Emit compact JSON.
    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "docql")]
#[command(version, about = "Run a DocQL query against seeded documents", long_about = None)]
pub struct Args {
    /// Seed data file.
    #[arg(short, long)]
    pub data: PathBuf,

    /// Query request file.
    #[arg(short, long)]
    pub query: PathBuf,

    /// Maximum ids per loader fetch.
    #[arg(long, default_value_t = DEFAULT_MAX_BATCH_SIZE)]
    pub max_batch_size: usize,

    /// Per-fetch timeout in milliseconds. Set to 0 to wait indefinitely.
    #[arg(long, default_value_t = 0)]
    pub fetch_timeout_ms: u64,

    /// Print compact JSON instead of pretty JSON.
    #[arg(long)]
    pub compact: bool,
}

impl Args {
    /// Convert command-line arguments to runner configuration.
    pub fn into_config(self) -> CliConfig {
        let mut loader = LoaderConfig::new().with_max_batch_size(self.max_batch_size);
        if self.fetch_timeout_ms > 0 {
            loader = loader.with_fetch_timeout(Duration::from_millis(self.fetch_timeout_ms));
        }

        let config = CliConfig::new(self.data, self.query)
            .with_context(ContextConfig::new().with_loader(loader));
        if self.compact {
            config.compact()
        } else {
            config
        }
    }
}
