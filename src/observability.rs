use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotd_connections_rejected_total";

/// Counter: startup/auth failures, including unparsable actors.
pub const AUTH_FAILURES_TOTAL: &str = "slotd_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotd_wal_flush_batch_size";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: events made durable. Labels: kind.
pub const EVENTS_COMMITTED_TOTAL: &str = "slotd_events_committed_total";

/// Counter: booking state transitions. Labels: action.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "slotd_booking_transitions_total";

/// Counter: PENDING bookings expired by the reaper.
pub const BOOKINGS_TIMED_OUT_TOTAL: &str = "slotd_bookings_timed_out_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::DeclareWindow { .. } => "declare_window",
        Command::PatchWindow { .. } => "patch_window",
        Command::RemoveWindow { .. } => "remove_window",
        Command::SelectWindows { .. } => "select_windows",
        Command::SelectAvailability { .. } => "select_availability",
        Command::RequestBooking { .. } => "request_booking",
        Command::BookingAction { .. } => "booking_action",
        Command::SelectBookings { .. } => "select_bookings",
    }
}
