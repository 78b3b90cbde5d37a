//! Write-only metrics for the merge engine.
//!
//! The engine only ever increments counters and sets gauges; exporting is
//! somebody else's job. Handles are cheap clones sharing one atomic cell,
//! so the hot path never takes a lock.
//!
//! [`MetricRegistry`] is an explicit, non-global [`MetricsSink`]: create one
//! per task (or per test), hand it to the factory, read values back, drop it.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Operator-level record counter.
pub const RECORDS_IN: &str = "records_in";
/// Records that crossed the network boundary.
pub const NETWORK_RECORDS_IN: &str = "network_records_in";

/// Per-input record counter name.
#[must_use]
pub fn input_records_in(input: usize) -> String {
    format!("input_{input}_records_in")
}

/// Per-input watermark gauge name.
#[must_use]
pub fn input_watermark(input: usize) -> String {
    format!("input_{input}_watermark")
}

/// A monotonically increasing counter.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    /// Creates a detached counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments by one.
    #[inline]
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last watermark seen by an input. Starts at `i64::MIN`.
#[derive(Debug, Clone)]
pub struct WatermarkGauge(Arc<AtomicI64>);

impl WatermarkGauge {
    /// Creates a detached gauge.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicI64::new(i64::MIN)))
    }

    /// Sets the current watermark.
    #[inline]
    pub fn set(&self, watermark: i64) {
        self.0.store(watermark, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for WatermarkGauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out named metric handles.
///
/// Asking twice for the same name must return handles to the same cell.
pub trait MetricsSink: Send + Sync {
    /// Returns the counter registered under `name`.
    fn counter(&self, name: &str) -> Counter;

    /// Returns the watermark gauge registered under `name`.
    fn gauge(&self, name: &str) -> WatermarkGauge;
}

/// In-memory [`MetricsSink`] with an explicit lifecycle.
#[derive(Default)]
pub struct MetricRegistry {
    counters: RwLock<FxHashMap<String, Counter>>,
    gauges: RwLock<FxHashMap<String, WatermarkGauge>>,
}

impl MetricRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of counter `name`, if registered.
    #[must_use]
    pub fn counter_value(&self, name: &str) -> Option<u64> {
        self.counters.read().get(name).map(Counter::get)
    }

    /// Value of gauge `name`, if registered.
    #[must_use]
    pub fn gauge_value(&self, name: &str) -> Option<i64> {
        self.gauges.read().get(name).map(WatermarkGauge::get)
    }

    /// Names of all registered counters, sorted.
    #[must_use]
    pub fn counter_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.counters.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl MetricsSink for MetricRegistry {
    fn counter(&self, name: &str) -> Counter {
        if let Some(counter) = self.counters.read().get(name) {
            return counter.clone();
        }
        self.counters
            .write()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn gauge(&self, name: &str) -> WatermarkGauge {
        if let Some(gauge) = self.gauges.read().get(name) {
            return gauge.clone();
        }
        self.gauges
            .write()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("counters", &self.counters.read().len())
            .field("gauges", &self.gauges.read().len())
            .finish()
    }
}
