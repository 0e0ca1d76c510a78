//! Metrics module for entitlement-service.
//! Provides Prometheus metrics for the gateway's authorization and
//! reconciliation paths.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "entitlement_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Launch tokens issued
pub static TOKENS_ISSUED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Token verification attempts by outcome
pub static TOKEN_VERIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Checkout sessions created (or refused) by outcome
pub static CHECKOUT_SESSIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Billing webhook events by type and outcome
pub static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    TOKENS_ISSUED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_tokens_issued_total",
                "Total launch tokens issued by module"
            ),
            &["module"]
        )
        .expect("Failed to register TOKENS_ISSUED_TOTAL")
    });

    TOKEN_VERIFICATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_token_verifications_total",
                "Total token verification attempts by module and outcome"
            ),
            &["module", "outcome"]
        )
        .expect("Failed to register TOKEN_VERIFICATIONS_TOTAL")
    });

    CHECKOUT_SESSIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_checkout_sessions_total",
                "Total checkout session requests by module and outcome"
            ),
            &["module", "outcome"]
        )
        .expect("Failed to register CHECKOUT_SESSIONS_TOTAL")
    });

    WEBHOOK_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_webhook_events_total",
                "Total billing webhook events by type and outcome"
            ),
            &["event_type", "outcome"]
        )
        .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("entitlement_errors_total", "Total errors by operation"),
            &["operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });
}

/// Render all registered metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_token_issued(module: &str) {
    if let Some(counter) = TOKENS_ISSUED_TOTAL.get() {
        counter.with_label_values(&[module]).inc();
    }
}

pub fn record_token_verification(module: &str, outcome: &str) {
    if let Some(counter) = TOKEN_VERIFICATIONS_TOTAL.get() {
        counter.with_label_values(&[module, outcome]).inc();
    }
}

pub fn record_checkout_session(module: &str, outcome: &str) {
    if let Some(counter) = CHECKOUT_SESSIONS_TOTAL.get() {
        counter.with_label_values(&[module, outcome]).inc();
    }
}

pub fn record_webhook_event(event_type: &str, outcome: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[event_type, outcome]).inc();
    }
}

pub fn record_error(operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}
