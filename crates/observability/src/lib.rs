//! Tracing and actualizer metrics (shared setup).

/// Initialize process-wide tracing.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Actualizer counters and gauges.
pub mod metrics;

pub use metrics::{ActualizerMetrics, InMemoryActualizerMetrics, MetricKey, MetricSample};
