//! DocQL runner binary.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use docql_cli::{Args, QueryRequest};
use docql_core::{Catalog, MemoryStore, RequestContext};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docql=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Args::parse().into_config();
    tracing::debug!(
        data = %config.data_path.display(),
        query = %config.query_path.display(),
        max_batch_size = config.context.loader.max_batch_size,
        fetch_timeout = ?config.context.loader.fetch_timeout,
        "configuration loaded"
    );

    let catalog = Arc::new(Catalog::standard());
    let store = MemoryStore::for_catalog(&catalog);
    let seed = std::fs::read_to_string(&config.data_path)
        .with_context(|| format!("reading seed data {}", config.data_path.display()))?;
    store.load_seed(serde_json::from_str(&seed).context("decoding seed data")?)?;

    let text = std::fs::read_to_string(&config.query_path)
        .with_context(|| format!("reading query {}", config.query_path.display()))?;
    let request = QueryRequest::from_json(&text)?;

    let store = Arc::new(store);
    let ctx = RequestContext::new(store.clone(), catalog, config.context.clone());
    let result = request.execute(&ctx).await?;

    let stats = ctx.stats();
    tracing::info!(
        entity = %request.entity,
        store_calls = store.call_count(),
        loader_fetches = stats.fetches,
        cache_hits = stats.cache_hits,
        "query answered"
    );

    let output = if config.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{output}");
    Ok(())
}
