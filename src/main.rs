//! # heapmeter
//!
//! Runs a built-in sample workload through the measurement protocol and
//! prints the net heap it retained.
//!
//! The binary installs [`TrackingAllocator`] as its global allocator, so
//! the default allocation probe can attribute every heap byte a workload
//! allocates to that workload's measurement.
//!
//! ## Configuration
//!
//! Timeouts come from an optional TOML file (`--config`); missing keys keep
//! their defaults. Log verbosity follows `RUST_LOG` and defaults to `info`.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;

use std::hint::black_box;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use heapmeter_measure::{MeasureConfig, MeasurementResult, Meter, TrackingAllocator};

use crate::cli::{Cli, Workload};

#[global_allocator]
static ALLOC: TrackingAllocator = TrackingAllocator::new();

const CHURN_CHUNK: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let meter = Meter::default().with_config(config);

    info!(workload = cli.command.name(), repeat = cli.repeat, "Measuring");

    for run in 1..=cli.repeat {
        let report = measure_workload(&meter, cli.command).await;
        debug!(run, "Measurement finished");
        println!("{}: {}", cli.command.name(), report);
    }

    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load the measurement config, or the defaults when no file is given.
fn load_config(path: Option<&Path>) -> Result<MeasureConfig> {
    let Some(path) = path else {
        return Ok(MeasureConfig::default());
    };
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    MeasureConfig::from_toml_str(&source)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

async fn measure_workload(meter: &Meter, workload: Workload) -> String {
    match workload {
        Workload::Noop => describe(&meter.measure(|| ()).await),
        Workload::Vec { bytes } => {
            describe(&meter.measure(move || black_box(vec![0u8; bytes])).await)
        }
        Workload::Churn { bytes } => describe(&meter.measure(move || churn(bytes)).await),
        Workload::Panic => {
            let result: MeasurementResult<()> = meter
                .measure(|| std::panic::resume_unwind(Box::new("panic workload")))
                .await;
            describe(&result)
        }
    }
}

/// Allocate `bytes` in fixed-size chunks, dropping each one immediately.
fn churn(bytes: usize) -> usize {
    let chunks = bytes.div_ceil(CHURN_CHUNK);
    (0..chunks)
        .map(|_| black_box(vec![1u8; CHURN_CHUNK]).len())
        .sum()
}

fn describe<T>(result: &MeasurementResult<T>) -> String {
    match (result.is_failure(), result.bytes) {
        (true, _) => "failed".to_string(),
        (false, Some(bytes)) => format!("{bytes} bytes"),
        (false, None) => "unmeasurable".to_string(),
    }
}
