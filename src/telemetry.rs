//! Telemetry utilities for intent timing and tracing spans.
//!
//! Connection spans come from `#[instrument]` on `Connection::run`.

use std::time::Instant;

/// Guard for timing intent execution and recording metrics.
///
/// Records intent latency when dropped.
pub struct IntentTimer {
    intent: &'static str,
    start: Instant,
}

impl IntentTimer {
    /// Start timing an intent.
    pub fn new(intent: &'static str) -> Self {
        Self {
            intent,
            start: Instant::now(),
        }
    }
}

impl Drop for IntentTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_intent(self.intent, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for one intent. `identity` is the bound name, if any.
    pub fn intent(name: &str, conn: &str, identity: Option<&str>) -> Span {
        if let Some(identity) = identity {
            info_span!("intent", name = %name, conn = %conn, identity = %identity)
        } else {
            info_span!("intent", name = %name, conn = %conn)
        }
    }
}
