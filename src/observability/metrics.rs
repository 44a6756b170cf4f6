//! OpenTelemetry metrics for the delivery core.
//!
//! Key metrics:
//! - outflow_messages_delivered_total: Messages written by drains
//! - outflow_drain_cycles_total: Acquire, drain, release cycles
//! - outflow_recheck_reacquired_total: Recheck found late work and reacquired
//! - outflow_triggers_deferred_total: Triggers that found a drain in progress
//! - outflow_transport_failures_total: Drains ended by a failed write (the
//!   connection is closed)
//! - outflow_messages_discarded_total: Messages dropped when a connection closed
//! - outflow_ownership_violations_total: Token misuse by a non-owner

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Outflow metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of messages written to the transport.
    pub messages_delivered: Counter<u64>,
    /// Total number of acquire, drain, release cycles.
    pub drain_cycles: Counter<u64>,
    /// Rechecks that found late work and took the token back.
    pub recheck_reacquired: Counter<u64>,
    /// Triggers that returned because another thread was draining.
    pub triggers_deferred: Counter<u64>,
    /// Drains ended by a failed transport write.
    pub transport_failures: Counter<u64>,
    /// Messages dropped unwritten when their connection closed.
    pub messages_discarded: Counter<u64>,
    /// Token releases or drains attempted by a thread not holding the token.
    pub ownership_violations: Counter<u64>,
}

impl Metrics {
    /// Create a new metrics registry from a meter.
    fn new(meter: &Meter) -> Self {
        Self {
            messages_delivered: meter
                .u64_counter("outflow_messages_delivered_total")
                .with_description("Messages written to the transport by drains")
                .with_unit("1")
                .init(),
            drain_cycles: meter
                .u64_counter("outflow_drain_cycles_total")
                .with_description("Acquire, drain, release cycles")
                .with_unit("1")
                .init(),
            recheck_reacquired: meter
                .u64_counter("outflow_recheck_reacquired_total")
                .with_description("Rechecks that found late work and reacquired the token")
                .with_unit("1")
                .init(),
            triggers_deferred: meter
                .u64_counter("outflow_triggers_deferred_total")
                .with_description("Triggers that found a drain already in progress")
                .with_unit("1")
                .init(),
            transport_failures: meter
                .u64_counter("outflow_transport_failures_total")
                .with_description("Drains ended by a failed transport write")
                .with_unit("1")
                .init(),
            messages_discarded: meter
                .u64_counter("outflow_messages_discarded_total")
                .with_description("Queued messages discarded when a connection closed")
                .with_unit("1")
                .init(),
            ownership_violations: meter
                .u64_counter("outflow_ownership_violations_total")
                .with_description("Release or drain attempted without holding the token")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// Installs a meter provider backed by a manual reader: values are recorded
/// in-process and can be collected by an embedding application. Subsequent
/// calls are ignored.
pub fn init_metrics() {
    METRICS.get_or_init(|| {
        let reader = ManualReader::builder().build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        global::set_meter_provider(provider);

        let meter = global::meter("outflow");
        Metrics::new(&meter)
    });
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Record one completed drain cycle and the messages it wrote.
pub fn record_drain_cycle(written: u64) {
    if let Some(m) = METRICS.get() {
        m.drain_cycles.add(1, &[]);
        if written > 0 {
            m.messages_delivered.add(written, &[]);
        }
    }
}

/// Record a recheck that reacquired the token.
pub fn record_recheck_reacquired() {
    if let Some(m) = METRICS.get() {
        m.recheck_reacquired.add(1, &[]);
    }
}

/// Record a trigger that deferred to an in-progress drain.
pub fn record_trigger_deferred() {
    if let Some(m) = METRICS.get() {
        m.triggers_deferred.add(1, &[]);
    }
}

/// Record a drain ended by a transport failure.
pub fn record_transport_failure() {
    if let Some(m) = METRICS.get() {
        m.transport_failures.add(1, &[]);
    }
}

/// Record messages discarded by a close.
pub fn record_discarded(count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = METRICS.get() {
        m.messages_discarded.add(count, &[]);
    }
}

/// Record a token misuse.
pub fn record_ownership_violation() {
    if let Some(m) = METRICS.get() {
        m.ownership_violations.add(1, &[]);
    }
}
