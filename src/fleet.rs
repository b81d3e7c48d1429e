#![forbid(unsafe_code)]

// Fleet orchestrator - launches runners, polls counters and liveness, reports

use crate::config::StressConfig;
use crate::error::ConfigError;
use crate::metrics::SharedCounters;
use crate::report::{
    write_banner, FleetOutcome, FleetSummary, OutputMode, StatusLine, ThroughputMeter,
};
use crate::runner::InstanceRunner;
use crate::transport::Transport;
use std::future::Future;
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Monitoring period.
pub const TICK: Duration = Duration::from_secs(1);

/// Checks the requested number of simulated devices.
pub fn validate_threads(raw: i64) -> Result<NonZeroUsize, ConfigError> {
    usize::try_from(raw)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or(ConfigError::InvalidThreads(raw))
}

#[derive(Debug, Clone)]
pub struct FleetOptions {
    pub threads: NonZeroUsize,
    pub output: OutputMode,
    pub tick: Duration,
}

impl FleetOptions {
    pub fn new(threads: NonZeroUsize) -> Self {
        Self {
            threads,
            output: OutputMode::default(),
            tick: TICK,
        }
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }
}

/// Handles of every launched runner, in launch order. Runners still alive
/// when the set is dropped are aborted.
pub struct RunnerSet {
    handles: Vec<JoinHandle<()>>,
}

impl RunnerSet {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Number of runners whose task has not finished.
    pub fn alive(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl FromIterator<JoinHandle<()>> for RunnerSet {
    fn from_iter<I: IntoIterator<Item = JoinHandle<()>>>(iter: I) -> Self {
        Self {
            handles: iter.into_iter().collect(),
        }
    }
}

impl Drop for RunnerSet {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

pub struct Fleet<T: Transport> {
    transport: Arc<T>,
    config: Arc<StressConfig>,
    counters: SharedCounters,
    options: FleetOptions,
}

impl<T: Transport> Fleet<T> {
    pub fn new(transport: T, config: StressConfig, options: FleetOptions) -> Self {
        Self {
            transport: Arc::new(transport),
            config: Arc::new(config),
            counters: SharedCounters::new(),
            options,
        }
    }

    pub fn counters(&self) -> &SharedCounters {
        &self.counters
    }

    /// Spawns one runner per requested device.
    pub fn launch(&self) -> RunnerSet {
        (0..self.options.threads.get())
            .map(|index| {
                InstanceRunner::new(
                    index,
                    self.transport.clone(),
                    self.config.clone(),
                    self.counters.clone(),
                )
                .spawn()
            })
            .collect()
    }

    /// Launches the fleet and reports once per tick until every runner has
    /// ended or `interrupt` resolves, then writes the final summary.
    /// Runners still alive at that point are aborted.
    pub async fn run<W, F>(self, out: &mut W, interrupt: F) -> io::Result<FleetSummary>
    where
        W: Write,
        F: Future<Output = ()>,
    {
        let threads = self.options.threads.get();
        write_banner(out, &self.config.server_url, threads)?;

        let runners = self.launch();
        info!("Launched {} runners against {}", runners.len(), self.config.server_url);

        let start = Instant::now();
        let mut meter = ThroughputMeter::new(self.counters.sent(), start);
        tokio::pin!(interrupt);

        let outcome = loop {
            tokio::select! {
                _ = &mut interrupt => break FleetOutcome::Interrupted,
                _ = tokio::time::sleep(self.options.tick) => {}
            }

            let snapshot = self.counters.snapshot();
            let rate = meter.observe(snapshot.sent, Instant::now());
            let alive = runners.alive();
            StatusLine {
                sent: snapshot.sent,
                received: snapshot.received,
                rate,
                alive,
            }
            .write_to(out, self.options.output)?;

            if alive == 0 {
                break FleetOutcome::Exhausted;
            }
        };
        debug!("Monitoring finished: {:?}", outcome);

        let snapshot = self.counters.snapshot();
        let summary = FleetSummary {
            outcome,
            elapsed: start.elapsed(),
            sent: snapshot.sent,
            received: snapshot.received,
        };
        summary.write_to(out)?;
        Ok(summary)
    }
}
