//! Actualizer metrics.
//!
//! Keys are disjoint per actualizer, so concurrent actualizers only contend
//! when a key is first registered; updates go to a per-key atomic cell.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use strata_core::{AppName, PartitionId, QName};

/// Number of flushes an async actualizer performed.
pub const FLUSHES_TOTAL: &str = "actualizer_flushes_total";
/// Offset of the last event handed to the projector.
pub const CURRENT_OFFSET: &str = "actualizer_current_offset";
/// Offset of the last flushed event.
pub const STORED_OFFSET: &str = "actualizer_stored_offset";
/// Number of actualizers of an app that are currently failing.
pub const PROJECTORS_IN_ERROR: &str = "actualizer_projectors_in_error";

/// Labels of a metric value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MetricKey {
    pub app: AppName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<PartitionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projector: Option<QName>,
}

impl MetricKey {
    /// Key of one async actualizer.
    pub fn actualizer(app: AppName, partition: PartitionId, projector: QName) -> Self {
        Self {
            app,
            partition: Some(partition),
            projector: Some(projector),
        }
    }

    /// Application-wide key.
    pub fn app(app: AppName) -> Self {
        Self {
            app,
            partition: None,
            projector: None,
        }
    }
}

/// Sink for actualizer counters and gauges.
pub trait ActualizerMetrics: Send + Sync {
    fn increase(&self, metric: &'static str, key: &MetricKey, delta: i64);

    fn set(&self, metric: &'static str, key: &MetricKey, value: i64);
}

impl<M> ActualizerMetrics for Arc<M>
where
    M: ActualizerMetrics + ?Sized,
{
    fn increase(&self, metric: &'static str, key: &MetricKey, delta: i64) {
        (**self).increase(metric, key, delta)
    }

    fn set(&self, metric: &'static str, key: &MetricKey, value: i64) {
        (**self).set(metric, key, value)
    }
}

/// One exported value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSample {
    pub metric: &'static str,
    #[serde(flatten)]
    pub key: MetricKey,
    pub value: i64,
}

type Cells = HashMap<(&'static str, MetricKey), Arc<AtomicI64>>;

/// Process-local metric registry.
#[derive(Debug, Default)]
pub struct InMemoryActualizerMetrics {
    cells: RwLock<Cells>,
}

impl InMemoryActualizerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value; zero for keys never written.
    pub fn value(&self, metric: &'static str, key: &MetricKey) -> i64 {
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(metric, key.clone()))
            .map_or(0, |cell| cell.load(Ordering::Acquire))
    }

    /// All values, ordered by metric then key.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        let mut samples: Vec<MetricSample> = cells
            .iter()
            .map(|((metric, key), cell)| MetricSample {
                metric: *metric,
                key: key.clone(),
                value: cell.load(Ordering::Acquire),
            })
            .collect();
        samples.sort_by(|a, b| (a.metric, &a.key).cmp(&(b.metric, &b.key)));
        samples
    }

    fn cell(&self, metric: &'static str, key: &MetricKey) -> Arc<AtomicI64> {
        let lookup = (metric, key.clone());
        if let Some(cell) = self
            .cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&lookup)
        {
            return cell.clone();
        }
        self.cells
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(lookup)
            .or_default()
            .clone()
    }
}

impl ActualizerMetrics for InMemoryActualizerMetrics {
    fn increase(&self, metric: &'static str, key: &MetricKey, delta: i64) {
        self.cell(metric, key).fetch_add(delta, Ordering::AcqRel);
    }

    fn set(&self, metric: &'static str, key: &MetricKey, value: i64) {
        self.cell(metric, key).store(value, Ordering::Release);
    }
}
