#![forbid(unsafe_code)]

// dh-stress library - concurrent device-notification load generator

pub mod cli;
pub mod config;
pub mod error;
pub mod fleet;
pub mod metrics;
pub mod notification;
pub mod protocol;
pub mod report;
pub mod runner;
pub mod session;
pub mod transport;

pub use config::StressConfig;
pub use error::{ConfigError, ConnectionError, TransportError};
pub use fleet::{Fleet, FleetOptions};
pub use metrics::SharedCounters;
pub use report::{FleetOutcome, FleetSummary, OutputMode};
