//! Entry point for `zbar-probe`.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Set up `tracing` output.
//! 3. Build the loader for this platform and print its plan.
//! 4. Load the library (unless `--dry-run`) and check the requested symbols.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use zbar_loader::config::Config;
use zbar_loader::Loader;

fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log level {:?}", config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let loader = Loader::system(config.loader_config());
    println!("platform: {}", loader.profile());

    let plan = loader.plan().context("failed to resolve zbar")?;
    println!("plan:\n{}", plan);
    if config.dry_run {
        return Ok(());
    }

    let loaded = loader.execute(&plan).context("failed to load zbar")?;
    println!("loaded {}", loaded.path().display());
    if !loaded.dependencies().is_empty() {
        println!("dependencies loaded: {}", loaded.dependencies().len());
    }

    let mut missing = Vec::new();
    for symbol in &config.symbols {
        let found = loaded.symbol_exists(symbol);
        println!("symbol {}: {}", symbol, if found { "found" } else { "missing" });
        if !found {
            missing.push(symbol.as_str());
        }
    }
    if !missing.is_empty() {
        anyhow::bail!("missing symbols: {}", missing.join(", "));
    }

    Ok(())
}
