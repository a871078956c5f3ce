use std::net::SocketAddr;

use crate::command::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: operations executed. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "deskbook_operations_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "deskbook_operation_duration_seconds";

/// Counter: requests refused for lack of capacity. Labels: space_type.
pub const CAPACITY_REJECTIONS_TOTAL: &str = "deskbook_capacity_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: bookings held in memory, any status.
pub const BOOKINGS_TRACKED: &str = "deskbook_bookings_tracked";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "deskbook_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "deskbook_journal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a request to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::CheckAvailability { .. } => "check_availability",
        Request::FindOpenSlots { .. } => "find_open_slots",
        Request::CalculatePrice { .. } => "calculate_price",
        Request::CreateBooking { .. } => "create_booking",
        Request::Approve { .. } => "approve",
        Request::Reject { .. } => "reject",
        Request::Cancel { .. } => "cancel",
        Request::Delete { .. } => "delete",
        Request::CheckIn { .. } => "check_in",
        Request::CheckOut { .. } => "check_out",
        Request::MarkNoShow { .. } => "mark_no_show",
        Request::UpdateBooking { .. } => "update_booking",
        Request::GetBooking { .. } => "get_booking",
        Request::ListBookings { .. } => "list_bookings",
        Request::QuoteRefund { .. } => "quote_refund",
    }
}
