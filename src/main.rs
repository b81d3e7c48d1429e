#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use dh_stress::cli::Cli;
use dh_stress::fleet::{validate_threads, Fleet, FleetOptions};
use dh_stress::transport::{LoopbackBehavior, LoopbackTransport, WebSocketTransport};
use dh_stress::StressConfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so the status line on stdout stays intact
    let filter = match cli.log_filter() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let threads = validate_threads(cli.threads)?;
    let config = StressConfig::load(cli.config.as_deref())?;
    let options = FleetOptions::new(threads).with_output(cli.output_mode());

    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let mut stdout = std::io::stdout();
    let summary = if cli.loopback {
        let transport = LoopbackTransport::new(LoopbackBehavior::echo());
        Fleet::new(transport, config, options).run(&mut stdout, interrupt).await?
    } else {
        let transport = WebSocketTransport::new(config.request_timeout());
        Fleet::new(transport, config, options).run(&mut stdout, interrupt).await?
    };

    info!(
        "Finished ({:?}): {} sent, {} received",
        summary.outcome, summary.sent, summary.received
    );
    Ok(())
}
