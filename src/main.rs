//! Outflow soak runner: hammers single-flight delivery with concurrent producers.
//!
//! # Usage
//!
//! ```bash
//! outflow --connections 4 --producers 16 --messages 10000 --fail-every 500
//! ```
//!
//! Environment variables can also be used:
//! - `OUTFLOW_CONNECTIONS`: Number of connections
//! - `OUTFLOW_PRODUCERS`: Number of concurrent producers
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use outflow::config::Config;
use outflow::observability::metrics::init_metrics;
use outflow::observability::tracing::init_tracing;
use outflow::soak::run_soak;
use tokio::sync::watch;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
  Outflow v{} - single-flight delivery soak

  Configuration:
    Connections:    {}
    Producers:      {}
    Messages/prod:  {}
    Write latency:  {}us
    Fail every:     {}

  Press Ctrl+C to stop early.
"#,
        version,
        config.connections,
        config.producers,
        config.messages,
        config.write_latency_us,
        config.fail_every,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    init_tracing(&config.log_level, config.log_json);
    init_metrics();

    if !config.json {
        print_banner(&config);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            tracing::info!("Received SIGINT (Ctrl+C), stopping soak run...");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, stopping soak run...");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("Received Ctrl+C, stopping soak run...");
        }

        let _ = shutdown_tx.send(true);
    });

    let json = config.json;
    let report = run_soak(config, shutdown_rx).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    anyhow::ensure!(
        report.is_clean(),
        "delivery check failed: lost={} duplicated={} reordered={} overlapping={} timed_out={}",
        report.lost,
        report.duplicated,
        report.reordered,
        report.overlapping_writes,
        report.timed_out
    );

    tracing::info!("Outflow soak run passed");
    Ok(())
}
