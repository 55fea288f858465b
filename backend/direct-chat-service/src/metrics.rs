use actix_web::{http::header, HttpResponse};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, TextEncoder};

pub static ACTIVE_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "direct_chat_active_connections",
        "Live WebSocket connections",
    )
    .expect("failed to create direct_chat_active_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register direct_chat_active_connections");
    gauge
});

pub static ONLINE_USERS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "direct_chat_online_users",
        "Users with at least one live connection",
    )
    .expect("failed to create direct_chat_online_users");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register direct_chat_online_users");
    gauge
});

pub static INBOUND_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "direct_chat_inbound_events_total",
            "Inbound WebSocket events by type",
        ),
        &["event"],
    )
    .expect("failed to create direct_chat_inbound_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register direct_chat_inbound_events_total");
    counter
});

pub static OUTBOUND_FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "direct_chat_outbound_frames_total",
            "Outbound frames delivered to live connections, by event type",
        ),
        &["event"],
    )
    .expect("failed to create direct_chat_outbound_frames_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register direct_chat_outbound_frames_total");
    counter
});

pub static ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "direct_chat_errors_total",
            "Errors reported to clients, by code",
        ),
        &["code"],
    )
    .expect("failed to create direct_chat_errors_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register direct_chat_errors_total");
    counter
});

pub fn record_inbound(event: &str) {
    INBOUND_EVENTS_TOTAL.with_label_values(&[event]).inc();
}

pub fn record_outbound(event: &str, frames: usize) {
    if frames > 0 {
        OUTBOUND_FRAMES_TOTAL
            .with_label_values(&[event])
            .inc_by(frames as u64);
    }
}

pub fn record_error(code: &str) {
    ERRORS_TOTAL.with_label_values(&[code]).inc();
}

pub fn set_connection_gauges(connections: usize, online_users: usize) {
    ACTIVE_CONNECTIONS.set(connections as i64);
    ONLINE_USERS.set(online_users as i64);
}

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, encoder.format_type()))
        .body(buffer)
}
