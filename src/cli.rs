//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// heapmeter - net heap retained by one unit of work
#[derive(Parser, Debug)]
#[command(name = "heapmeter")]
#[command(version)]
#[command(about = "Measure the net heap a workload retains")]
#[command(
    long_about = "heapmeter runs a sample workload once under the tracking allocator and reports how many bytes it left allocated, or that it could not be measured."
)]
pub struct Cli {
    /// TOML file with measurement timeouts
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of times to measure the workload
    #[arg(short, long, global = true, default_value_t = 1)]
    pub repeat: u32,

    #[command(subcommand)]
    pub command: Workload,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    /// Do nothing
    Noop,

    /// Allocate a buffer and keep it
    Vec {
        /// Buffer size in bytes
        bytes: usize,
    },

    /// Allocate scratch buffers and drop them before returning
    Churn {
        /// Total bytes allocated across all scratch buffers
        bytes: usize,
    },

    /// Panic halfway through
    Panic,
}

impl Workload {
    /// Short name used when reporting.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Vec { .. } => "vec",
            Self::Churn { .. } => "churn",
            Self::Panic => "panic",
        }
    }
}
