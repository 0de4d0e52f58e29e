use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::{info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use keystash::prelude::*;

/// Bootstraps a database declaration against the in-memory engine, seeds it and prints the
/// number of records per store.
#[derive(Parser)]
struct Args {
    /// JSON file with the database name, version and object stores.
    #[clap(long, short)]
    config: PathBuf,

    /// Records to add, as `STORE=JSON`. May be repeated.
    #[clap(long = "seed", short)]
    seeds: Vec<String>,

    /// Used when `RUST_LOG` is not set.
    #[clap(long, default_value_t = Level::INFO)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    enable_logging(args.log_level);

    let json = std::fs::read_to_string(&args.config)
        .with_context(|| format!("Could not read {:?}", args.config))?;
    let config = DbConfig::from_json(&json)?;
    let store_names = config
        .object_stores_meta
        .iter()
        .map(|schema| schema.name.clone())
        .collect::<Vec<_>>();

    let stash = KeyStash::open(MemoryDriver::new(), config).await?;
    info!("Opened {} at version {}", stash.name(), stash.version());

    for seed in &args.seeds {
        let (store, value) = parse_seed(seed)?;
        let key = stash.add(store, &value, None).await?;
        info!("Added {} to {}", key.to_value(), store);
    }

    for store in &store_names {
        let count = stash.count(store, KeyRange::All).await?;
        println!("{store}: {count}");
    }

    Ok(())
}

fn parse_seed(seed: &str) -> Result<(&str, Value)> {
    let (store, json) = seed
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected STORE=JSON, got '{}'", seed))?;
    let value = serde_json::from_str(json).with_context(|| format!("Invalid JSON for {store}"))?;
    Ok((store, value))
}

fn enable_logging(max_level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(max_level.as_str().to_lowercase()));

    Registry::default()
        .with(tracing_subscriber::fmt::Layer::new().with_filter(filter))
        .init();
}
