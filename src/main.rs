//! wordcount-server: accepts document streams and answers with word counts.

use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wordcount_bench::config::Config;
use wordcount_bench::runtime;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) if e.is_usage() => {
            println!("{e}");
            process::exit(0);
        }
        Err(e) => return Err(e.into()),
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        cleaning = config.cleaning,
        workers = config.workers,
        percentiles = config.percentiles,
        "Starting wordcount server"
    );

    runtime::run(&config)?;
    Ok(())
}
