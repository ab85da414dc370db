//! In-process metrics for the pipeline.
//!
//! With the `telemetry` feature every call lands in one global registry that
//! tests and embedders read through [`snapshot`]. Without it the recording
//! functions compile to nothing. Metric names live in [`tags`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod profile;
pub mod tags;
pub mod worker;

/// Summary of every sample recorded under one histogram name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub total: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

impl HistogramSnapshot {
    #[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
    fn observe(&mut self, value: u64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count = self.count.saturating_add(1);
        self.total = self.total.saturating_add(value);
        self.mean = self.total as f64 / self.count as f64;
    }
}

/// Copy of the registry at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

impl TelemetrySnapshot {
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges.get(name).copied()
    }

    pub fn histogram(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms.get(name).copied()
    }
}

#[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
enum Update {
    Count(u64),
    Sample(u64),
    Set(u64),
    Raise(u64),
    Lower(u64),
}

#[inline]
fn record(name: &'static str, update: Update) {
    #[cfg(feature = "telemetry")]
    registry::apply(name, update);

    #[cfg(not(feature = "telemetry"))]
    let _ = (name, update);
}

/// Adds `value` to a counter. Labels only document the call site.
#[inline]
pub fn increment_counter(name: &'static str, value: u64, _labels: &[(&str, &str)]) {
    record(name, Update::Count(value));
}

#[inline]
pub fn record_histogram(name: &'static str, value: u64, _labels: &[(&str, &str)]) {
    record(name, Update::Sample(value));
}

#[inline]
pub fn set_gauge(name: &'static str, value: u64, _labels: &[(&str, &str)]) {
    record(name, Update::Set(value));
}

#[inline]
pub fn add_gauge(name: &'static str, delta: u64, _labels: &[(&str, &str)]) {
    record(name, Update::Raise(delta));
}

/// Lowers a gauge, stopping at zero.
#[inline]
pub fn sub_gauge_saturating(name: &'static str, delta: u64, _labels: &[(&str, &str)]) {
    record(name, Update::Lower(delta));
}

/// Returns the registry contents, or an empty snapshot without the `telemetry` feature.
pub fn snapshot() -> TelemetrySnapshot {
    #[cfg(feature = "telemetry")]
    return registry::snapshot();

    #[cfg(not(feature = "telemetry"))]
    TelemetrySnapshot::default()
}

/// Drops every recorded metric.
pub fn reset() {
    #[cfg(feature = "telemetry")]
    registry::reset();
}

#[cfg(feature = "telemetry")]
mod registry {
    use std::collections::BTreeMap;
    use std::sync::{Mutex, MutexGuard};

    use super::{HistogramSnapshot, TelemetrySnapshot, Update};

    #[derive(Default)]
    struct Registry {
        counters: BTreeMap<&'static str, u64>,
        gauges: BTreeMap<&'static str, u64>,
        histograms: BTreeMap<&'static str, HistogramSnapshot>,
    }

    static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
        counters: BTreeMap::new(),
        gauges: BTreeMap::new(),
        histograms: BTreeMap::new(),
    });

    fn registry() -> MutexGuard<'static, Registry> {
        match REGISTRY.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(super) fn apply(name: &'static str, update: Update) {
        let mut registry = registry();
        match update {
            Update::Count(value) => {
                let counter = registry.counters.entry(name).or_default();
                *counter = counter.saturating_add(value);
            }
            Update::Sample(value) => registry.histograms.entry(name).or_default().observe(value),
            Update::Set(value) => {
                registry.gauges.insert(name, value);
            }
            Update::Raise(delta) => {
                let gauge = registry.gauges.entry(name).or_default();
                *gauge = gauge.saturating_add(delta);
            }
            Update::Lower(delta) => {
                let gauge = registry.gauges.entry(name).or_default();
                *gauge = gauge.saturating_sub(delta);
            }
        }
    }

    pub(super) fn snapshot() -> TelemetrySnapshot {
        fn owned<V: Copy>(map: &BTreeMap<&'static str, V>) -> BTreeMap<String, V> {
            map.iter().map(|(name, value)| ((*name).to_owned(), *value)).collect()
        }

        let registry = registry();
        TelemetrySnapshot {
            counters: owned(&registry.counters),
            gauges: owned(&registry.gauges),
            histograms: owned(&registry.histograms),
        }
    }

    pub(super) fn reset() {
        *registry() = Registry::default();
    }
}
