use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservations committed (direct creates and first-fit bookings).
pub const RESERVATIONS_BOOKED_TOTAL: &str = "corral_reservations_booked_total";

/// Counter: booking attempts that lost the commit-time overlap check.
pub const BOOKING_CONFLICTS_TOTAL: &str = "corral_booking_conflicts_total";

/// Counter: reservations cancelled.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "corral_reservations_cancelled_total";

/// Counter: attribute updates rejected by the allow-list.
pub const ATTRIBUTE_UPDATES_REJECTED_TOTAL: &str = "corral_attribute_updates_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "corral_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "corral_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if
/// `port` is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
