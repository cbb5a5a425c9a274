use std::net::SocketAddr;

use crate::api::ApiRequest;
use crate::webhook::ToolCall;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: operation, status.
pub const REQUESTS_TOTAL: &str = "vetslot_requests_total";

/// Histogram: request latency in seconds. Labels: operation.
pub const REQUEST_DURATION_SECONDS: &str = "vetslot_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "vetslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "vetslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "vetslot_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "vetslot_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "vetslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "vetslot_wal_flush_batch_size";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome (booked, conflict, invalid, dst_transition, error).
pub const BOOKINGS_TOTAL: &str = "vetslot_bookings_total";

/// Counter: slots produced by slot generation.
pub const SLOTS_GENERATED_TOTAL: &str = "vetslot_slots_generated_total";

/// Counter: AVAILABLE rows written over BLOCKED rows or the reverse.
pub const AVAILABILITY_ANOMALIES_TOTAL: &str = "vetslot_availability_anomalies_total";

/// Counter: status changes applied by the sweeper. Labels: status.
pub const AUTO_TRANSITIONS_TOTAL: &str = "vetslot_auto_transitions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None; an
/// install failure is logged and the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on {addr}: {e}"),
    }
}

/// Short label for a voice-agent tool call.
pub fn tool_label(call: &ToolCall) -> &'static str {
    match call {
        ToolCall::FirstAvailable(_) => "get_first_available_flexible",
        ToolCall::AvailableSlots(_) => "get_available_slots",
        ToolCall::Book(_) => "book_appointment",
        ToolCall::Cancel(_) => "cancel_appointment",
    }
}

/// Short label for a calendar API request.
pub fn api_label(req: &ApiRequest) -> &'static str {
    match req {
        ApiRequest::RegisterPractice { .. } => "register_practice",
        ApiRequest::UpdatePractice { .. } => "update_practice",
        ApiRequest::RegisterVet { .. } => "register_vet",
        ApiRequest::DeactivateVet { .. } => "deactivate_vet",
        ApiRequest::ListVets { .. } => "list_vets",
        ApiRequest::AddAvailability { .. } => "add_availability",
        ApiRequest::DeactivateAvailability { .. } => "deactivate_availability",
        ApiRequest::GetAvailability { .. } => "get_availability",
        ApiRequest::GetSlots { .. } => "get_slots",
        ApiRequest::BookAppointment { .. } => "book_appointment",
        ApiRequest::UpdateStatus { .. } => "update_status",
        ApiRequest::GetAppointment { .. } => "get_appointment",
        ApiRequest::ListAppointments { .. } => "list_appointments",
    }
}
