use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, method, status.
pub const REQUESTS_TOTAL: &str = "staydesk_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const REQUEST_DURATION_SECONDS: &str = "staydesk_request_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: bookings created. Labels: source (partner, guest).
pub const BOOKINGS_CREATED_TOTAL: &str = "staydesk_bookings_created_total";

/// Counter: stays rejected because they overlap an active booking.
pub const CONFLICTS_TOTAL: &str = "staydesk_conflicts_total";

/// Counter: booking status transitions. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "staydesk_transitions_total";

/// Gauge: rooms currently loaded.
pub const ROOMS_ACTIVE: &str = "staydesk_rooms_active";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "staydesk_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "staydesk_journal_flush_batch_size";

// ── Client sync ─────────────────────────────────────────────────

/// Counter: fetched snapshots applied to a dashboard store.
pub const SYNC_SNAPSHOTS_APPLIED_TOTAL: &str = "staydesk_sync_snapshots_applied_total";

/// Counter: fetched snapshots dropped as stale.
pub const SYNC_SNAPSHOTS_DISCARDED_TOTAL: &str = "staydesk_sync_snapshots_discarded_total";

/// Counter: optimistic mutations rolled back after a backend failure.
pub const SYNC_ROLLBACKS_TOTAL: &str = "staydesk_sync_rollbacks_total";

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
