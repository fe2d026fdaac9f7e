use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};

static TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "civic_report_transitions_total",
            "Report lifecycle transitions by outcome",
        ),
        &["transition", "outcome"],
    )
    .expect("failed to create civic_report_transitions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register civic_report_transitions_total");
    counter
});

static GEOFENCE_REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "civic_report_geofence_rejections_total",
            "Resolve and verify attempts rejected for being too far from the issue",
        ),
        &["role"],
    )
    .expect("failed to create civic_report_geofence_rejections_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register civic_report_geofence_rejections_total");
    counter
});

static NOTIFICATION_DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "civic_report_notification_deliveries_total",
            "Outbox notifications handed to the dispatcher",
        ),
        &["outcome"],
    )
    .expect("failed to create civic_report_notification_deliveries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register civic_report_notification_deliveries_total");
    counter
});

/// `outcome` is "committed" or the error code that rejected the transition.
pub fn record_transition(transition: &str, outcome: &str) {
    TRANSITIONS_TOTAL
        .with_label_values(&[transition, outcome])
        .inc();
}

pub fn record_geofence_rejection(role: &str) {
    GEOFENCE_REJECTIONS_TOTAL.with_label_values(&[role]).inc();
}

pub fn record_delivery(outcome: &str) {
    NOTIFICATION_DELIVERIES_TOTAL
        .with_label_values(&[outcome])
        .inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
