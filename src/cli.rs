#![forbid(unsafe_code)]

// Command-line arguments

use crate::report::OutputMode;
use clap::Parser;
use std::path::PathBuf;

/// Simulate many devices sending notifications to a DeviceHive-style server.
#[derive(Debug, Parser)]
#[command(name = "dh-stress", version, about, allow_negative_numbers = true)]
pub struct Cli {
    /// Number of simulated devices to run
    #[arg(default_value_t = 1)]
    pub threads: i64,

    /// Print debug info
    #[arg(short, long)]
    pub debug: bool,

    /// Be verbose (everything down to trace)
    #[arg(short, long)]
    pub verbose: bool,

    /// Print statistics as timestamped metric lines
    #[arg(short, long)]
    pub metrics: bool,

    /// Configuration file [default: dh-stress.toml when present]
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run against an in-process loopback instead of a server
    #[arg(long)]
    pub loopback: bool,
}

impl Cli {
    /// Log filter forced by the flags; `None` defers to `RUST_LOG`.
    pub fn log_filter(&self) -> Option<&'static str> {
        if self.verbose {
            Some("trace")
        } else if self.debug {
            Some("debug")
        } else {
            None
        }
    }

    pub fn output_mode(&self) -> OutputMode {
        if self.metrics {
            OutputMode::Metrics
        } else {
            OutputMode::Human
        }
    }
}
