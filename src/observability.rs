use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::ReservationError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: service operations executed. Labels: op, outcome.
pub const OPERATIONS_TOTAL: &str = "parkgate_operations_total";

/// Histogram: service operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "parkgate_operation_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: callers suspended on the reservation gate.
pub const GATE_WAITERS: &str = "parkgate_gate_waiters";

/// Histogram: time spent waiting for the reservation gate in seconds.
pub const GATE_WAIT_SECONDS: &str = "parkgate_gate_wait_seconds";

/// Gauge: reservations currently held in the store.
pub const RESERVATIONS_LIVE: &str = "parkgate_reservations_live";

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "parkgate_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "parkgate_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "parkgate_connections_rejected_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "parkgate_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "parkgate_journal_flush_batch_size";

/// Counter: notices dropped because the notifier queue was full or closed.
pub const NOTICES_DROPPED_TOTAL: &str = "parkgate_notices_dropped_total";

/// Counter: notices the mailer failed to deliver.
pub const NOTICES_FAILED_TOTAL: &str = "parkgate_notices_failed_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short outcome label for an operation result.
pub fn outcome_label<T>(result: &Result<T, ReservationError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    }
}

/// Count one operation and record its latency.
pub fn record_operation<T>(op: &'static str, result: &Result<T, ReservationError>, started: Instant) {
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "outcome" => outcome_label(result)).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
}
