use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tabula_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tabula_query_duration_seconds";

/// Histogram: tables returned per availability query.
pub const AVAILABILITY_RESULT_SIZE: &str = "tabula_availability_result_size";

/// Counter: reservation writes refused because the table was already booked.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "tabula_reservation_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "tabula_connections_active";
pub const CONNECTIONS_TOTAL: &str = "tabula_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tabula_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tabula_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "tabula_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
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
        Command::InsertTable { .. } => "insert_table",
        Command::UpdateTable { .. } => "update_table",
        Command::DeleteTable { .. } => "delete_table",
        Command::SelectTables { .. } => "select_tables",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailableTables { json: false, .. } => "select_available_tables",
        Command::SelectAvailableTables { json: true, .. } => "select_available_tables_json",
    }
}
