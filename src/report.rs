#![forbid(unsafe_code)]

// Operator-facing output: banner, per-tick status line and final summary

use chrono::Local;
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;
use tokio::time::Instant;

/// How status lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Overwrite the previous line in place
    #[default]
    Human,
    /// Timestamped, one line per tick
    Metrics,
}

/// Rolling send rate between successive observations.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    last_count: u64,
    last_at: Instant,
}

impl ThroughputMeter {
    pub fn new(baseline: u64, at: Instant) -> Self {
        Self {
            last_count: baseline,
            last_at: at,
        }
    }

    /// Notifications per second since the previous observation.
    pub fn observe(&mut self, count: u64, at: Instant) -> f64 {
        let delta = count.saturating_sub(self.last_count);
        let secs = at.saturating_duration_since(self.last_at).as_secs_f64();
        self.last_count = count;
        self.last_at = at;
        if secs > 0.0 {
            delta as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub sent: u64,
    pub received: u64,
    pub rate: f64,
    pub alive: usize,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sent {}, received {} notifications, {:.5} notifications/second. {} threads.",
            self.sent, self.received, self.rate, self.alive
        )
    }
}

impl StatusLine {
    pub fn write_to<W: Write>(&self, out: &mut W, mode: OutputMode) -> io::Result<()> {
        match mode {
            OutputMode::Human => write!(out, "\r\x1B[2K{self}")?,
            OutputMode::Metrics => writeln!(out, "[{}] {self}", Local::now().format("%X"))?,
        }
        out.flush()
    }
}

pub fn write_banner<W: Write>(out: &mut W, server_url: &str, threads: usize) -> io::Result<()> {
    writeln!(out, "Server: {server_url}")?;
    writeln!(
        out,
        "Started at {} in {} threads.",
        Local::now().format("%c"),
        threads
    )?;
    out.flush()
}

/// Why monitoring stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetOutcome {
    /// No runner was left alive
    Exhausted,
    /// The operator interrupted the run
    Interrupted,
}

/// Final numbers of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetSummary {
    pub outcome: FleetOutcome,
    pub elapsed: Duration,
    /// Send attempts, including failed ones
    pub sent: u64,
    pub received: u64,
}

impl FleetSummary {
    pub fn average_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.sent as f64 / secs
        } else {
            0.0
        }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        match self.outcome {
            FleetOutcome::Exhausted => writeln!(out, "\nNo worker threads left, exiting...")?,
            FleetOutcome::Interrupted => writeln!(out, "\nExiting...")?,
        }
        writeln!(
            out,
            "Total time: {} seconds, Average rate: {:.4} notifications per second.",
            self.elapsed.as_secs(),
            self.average_rate()
        )?;
        out.flush()
    }
}
