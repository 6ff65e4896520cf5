use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "itemshare_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "itemshare_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: booking requests. Labels: outcome (`ok` or an error kind).
pub const BOOKINGS_CREATED_TOTAL: &str = "itemshare_bookings_created_total";

/// Counter: owner decisions. Labels: outcome (`APPROVED`, `REJECTED` or an error kind).
pub const BOOKING_DECISIONS_TOTAL: &str = "itemshare_booking_decisions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "itemshare_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "itemshare_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "itemshare_connections_rejected_total";

/// Counter: logins refused before the password check (bad identity).
pub const AUTH_FAILURES_TOTAL: &str = "itemshare_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "itemshare_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "itemshare_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "itemshare_wal_compactions_total";

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

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::UpdateUser { .. } => "update_user",
        Command::DeleteUser { .. } => "delete_user",
        Command::SelectUsers { .. } => "select_users",
        Command::InsertItem { .. } => "insert_item",
        Command::UpdateItem { .. } => "update_item",
        Command::DeleteItem { .. } => "delete_item",
        Command::SelectItem { .. } => "select_item",
        Command::SelectOwnerItems => "select_owner_items",
        Command::SearchItems { .. } => "search_items",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DecideBooking { .. } => "decide_booking",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectOwnerBookings { .. } => "select_owner_bookings",
        Command::InsertComment { .. } => "insert_comment",
        Command::SelectComments { .. } => "select_comments",
        Command::InsertRequest { .. } => "insert_request",
        Command::SelectRequests { id: Some(_) } => "select_request",
        Command::SelectRequests { id: None } => "select_own_requests",
        Command::SelectOtherRequests => "select_other_requests",
    }
}
