use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: store operations executed. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "slotbook_operations_total";

/// Histogram: store operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "slotbook_operation_duration_seconds";

/// Counter: creates rejected because the range overlapped an existing booking.
pub const CONFLICTS_TOTAL: &str = "slotbook_conflicts_total";

/// Counter: failed logins and rejected tokens. Labels: reason.
pub const AUTH_FAILURES_TOTAL: &str = "slotbook_auth_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: reservations currently persisted.
pub const RESERVATIONS_ACTIVE: &str = "slotbook_reservations_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short status label for an operation outcome.
pub fn status_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(EngineError::Validation(_)) => "invalid",
        Err(EngineError::Conflict { .. }) => "conflict",
        Err(EngineError::NotFound(_)) => "not_found",
        Err(EngineError::AlreadyExists(_)) => "exists",
        Err(EngineError::LimitExceeded(_)) => "limit",
        Err(EngineError::StoreUnavailable(_)) => "unavailable",
    }
}

pub fn record_op<T>(op: &'static str, result: &Result<T, EngineError>, started: Instant) {
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status_label(result)).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
}
