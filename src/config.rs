//! Configuration parsing for the outflow soak binary.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for a quick run

use clap::Parser;
use std::time::Duration;

/// Outflow: soak-test single-flight delivery with many concurrent producers.
#[derive(Parser, Debug, Clone)]
#[command(name = "outflow")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Number of connections to open
    #[arg(short, long, env = "OUTFLOW_CONNECTIONS", default_value_t = 4)]
    pub connections: usize,

    /// Number of concurrent producers
    #[arg(short, long, env = "OUTFLOW_PRODUCERS", default_value_t = 8)]
    pub producers: usize,

    /// Messages enqueued by each producer
    #[arg(short, long, env = "OUTFLOW_MESSAGES", default_value_t = 1000)]
    pub messages: u64,

    /// Simulated transport write latency in microseconds
    #[arg(long, env = "OUTFLOW_WRITE_LATENCY_US", default_value_t = 0)]
    pub write_latency_us: u64,

    /// Inject a transport failure every N writes (0 disables)
    #[arg(long, env = "OUTFLOW_FAIL_EVERY", default_value_t = 0)]
    pub fail_every: u64,

    /// Seconds to wait for every message to be delivered
    #[arg(long, env = "OUTFLOW_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "OUTFLOW_LOG_JSON")]
    pub log_json: bool,

    /// Print the soak report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Simulated write latency.
    pub fn write_latency(&self) -> Duration {
        Duration::from_micros(self.write_latency_us)
    }

    /// Delivery deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Total messages the producers will enqueue.
    pub fn total_messages(&self) -> u64 {
        self.producers as u64 * self.messages
    }

    /// Create a small configuration for testing.
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            connections: 2,
            producers: 4,
            messages: 200,
            timeout_secs: 10,
            log_level: "debug".into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connections: 4,
            producers: 8,
            messages: 1000,
            write_latency_us: 0,
            fail_every: 0,
            timeout_secs: 30,
            log_level: "info".into(),
            log_json: false,
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.connections, 4);
        assert_eq!(config.total_messages(), 8000);
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_from_args() {
        let config = Config::try_parse_from([
            "outflow",
            "--connections",
            "3",
            "--producers",
            "2",
            "--messages",
            "10",
            "--fail-every",
            "5",
            "--json",
        ])
        .unwrap();

        assert_eq!(config.connections, 3);
        assert_eq!(config.total_messages(), 20);
        assert_eq!(config.fail_every, 5);
        assert!(config.json);
    }
}
