//! # NVD Watch
//!
//! A vulnerability monitoring pipeline that scrapes the NVD search results
//! for entries matching a query, deduplicates them against the records
//! previous runs persisted, and pushes a webhook alert for anything
//! genuinely new.
//!
//! ## Usage
//!
//! ```sh
//! nvd_watch -c config.yaml
//! ```
//!
//! ## Architecture
//!
//! One invocation is one run of a strictly sequential pipeline:
//! 1. **Window**: compute the publication boundary from the day offset
//! 2. **History**: load what earlier runs already saw for that date
//! 3. **Scrape**: fetch each configured result page (bounded retries,
//!    paced requests) and extract in-window records
//! 4. **Dedup**: keep the identifiers history has never seen
//! 5. **Persist & notify**: overwrite the structured dump with the union,
//!    append new entries to the report, send at most one alert
//!
//! Scheduling is someone else's job: run this from cron or a timer loop,
//! one instance at a time. Fatal configuration errors exit non-zero;
//! page, persistence, and notification failures degrade gracefully.

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod cli;
mod config;
mod dedup;
mod extract;
mod fetch;
mod history;
mod models;
mod notify;
mod pipeline;
mod utils;

use cli::Cli;
use config::Config;
use fetch::{HttpFetcher, RetryFetch};
use notify::WebhookSink;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("nvd_watch starting up");

    let args = Cli::parse();
    debug!(?args.config, ?args.json_dir, ?args.report_dir, "Parsed CLI arguments");

    let mut config = match Config::load(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config, error = %e, "configuration error; refusing to start");
            return Err(e.into());
        }
    };
    if let Some(dir) = args.json_dir {
        config.json_dir = dir;
    }
    if let Some(dir) = args.report_dir {
        config.report_dir = dir;
    }

    let fetcher = RetryFetch::new(HttpFetcher::new(&config.fetch)?, &config.fetch);
    let sink = match &config.webhook_url {
        Some(url) => Some(WebhookSink::new(url.clone())?),
        None => None,
    };
    if sink.is_none() {
        info!("no webhook configured; alerts disabled for this run");
    }

    let result = pipeline::run(&config, &fetcher, sink.as_ref()).await?;

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        in_window = result.all_in_window.len(),
        new = result.newly_unseen.len(),
        "scan complete"
    );

    Ok(())
}
