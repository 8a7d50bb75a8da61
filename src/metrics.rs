//! Prometheus metrics collection for parley.
//!
//! Exposed on the HTTP surface at `/metrics`. Recording helpers are no-ops
//! until [`init`] has run, so handler tests record nothing.
//!
//! - `parley_intent_total{intent}` - intents processed by type
//! - `parley_intent_duration_seconds{intent}` - intent latency histogram
//! - `parley_intent_errors_total{intent,error}` - failed intents
//! - `parley_messages_{sent,delivered,read}_total` - delivery lifecycle
//! - `parley_joins_rejected_total{reason}` - rejected joins
//! - `parley_pushes_dropped_total{reason}` - outbound events dropped
//! - `parley_connections` / `parley_online_identities` - gauges

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

/// Messages persisted by `send_message`.
pub static MESSAGES_SENT: OnceLock<IntCounter> = OnceLock::new();

/// Messages advanced to `delivered`, at send time or on reconciliation.
pub static MESSAGES_DELIVERED: OnceLock<IntCounter> = OnceLock::new();

/// Messages advanced to `read`.
pub static MESSAGES_READ: OnceLock<IntCounter> = OnceLock::new();

/// Intents processed by type.
pub static INTENT_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();

/// Intent processing latency by type.
pub static INTENT_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Intent errors by type and error code.
pub static INTENT_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Joins rejected, by reason code.
pub static JOINS_REJECTED: OnceLock<IntCounterVec> = OnceLock::new();

/// Outbound events dropped because the queue was full or gone.
pub static PUSHES_DROPPED: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges
// ========================================================================

/// Open WebSocket connections.
pub static CONNECTIONS: OnceLock<IntGauge> = OnceLock::new();

/// Identities currently bound to a connection.
pub static ONLINE_IDENTITIES: OnceLock<IntGauge> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(MESSAGES_SENT, IntCounter::new("parley_messages_sent_total", "Messages persisted"));
    register!(MESSAGES_DELIVERED, IntCounter::new("parley_messages_delivered_total", "Messages advanced to delivered"));
    register!(MESSAGES_READ, IntCounter::new("parley_messages_read_total", "Messages advanced to read"));

    register!(INTENT_COUNTER, IntCounterVec::new(Opts::new("parley_intent_total", "Client intents processed by type"), &["intent"]));
    register!(INTENT_LATENCY, HistogramVec::new(
        HistogramOpts::new("parley_intent_duration_seconds", "Client intent latency by type")
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["intent"]));
    register!(INTENT_ERRORS, IntCounterVec::new(Opts::new("parley_intent_errors_total", "Client intent errors by type"), &["intent", "error"]));
    register!(JOINS_REJECTED, IntCounterVec::new(Opts::new("parley_joins_rejected_total", "Rejected joins by reason"), &["reason"]));
    register!(PUSHES_DROPPED, IntCounterVec::new(Opts::new("parley_pushes_dropped_total", "Outbound events dropped"), &["reason"]));

    register!(CONNECTIONS, IntGauge::new("parley_connections", "Open WebSocket connections"));
    register!(ONLINE_IDENTITIES, IntGauge::new("parley_online_identities", "Identities bound to a connection"));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Recording helpers
// ============================================================================

#[inline]
fn inc(metric: &OnceLock<IntCounter>, by: u64) {
    if let Some(c) = metric.get() {
        c.inc_by(by);
    }
}

#[inline]
fn inc_labeled(metric: &OnceLock<IntCounterVec>, labels: &[&str]) {
    if let Some(c) = metric.get() {
        c.with_label_values(labels).inc();
    }
}

/// Record an intent execution with latency.
#[inline]
pub fn record_intent(intent: &str, duration_secs: f64) {
    inc_labeled(&INTENT_COUNTER, &[intent]);
    if let Some(h) = INTENT_LATENCY.get() {
        h.with_label_values(&[intent]).observe(duration_secs);
    }
}

/// Record a failed intent.
#[inline]
pub fn record_intent_error(intent: &str, error: &str) {
    inc_labeled(&INTENT_ERRORS, &[intent, error]);
}

#[inline]
pub fn record_join_rejected(reason: &str) {
    inc_labeled(&JOINS_REJECTED, &[reason]);
}

#[inline]
pub fn record_push_dropped(reason: &str) {
    inc_labeled(&PUSHES_DROPPED, &[reason]);
}

#[inline]
pub fn record_message_sent() {
    inc(&MESSAGES_SENT, 1);
}

#[inline]
pub fn record_messages_delivered(count: usize) {
    inc(&MESSAGES_DELIVERED, count as u64);
}

#[inline]
pub fn record_messages_read(count: usize) {
    inc(&MESSAGES_READ, count as u64);
}

/// Adjust the open connection gauge.
#[inline]
pub fn connection_opened() {
    if let Some(g) = CONNECTIONS.get() {
        g.inc();
    }
}

#[inline]
pub fn connection_closed() {
    if let Some(g) = CONNECTIONS.get() {
        g.dec();
    }
}

/// Set the online identity gauge.
#[inline]
pub fn set_online(count: usize) {
    if let Some(g) = ONLINE_IDENTITIES.get() {
        g.set(count as i64);
    }
}
