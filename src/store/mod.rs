//! In-memory metric storage
//!
//! `MetricStore` owns one lock per category (counters, gauges, histograms, text,
//! and each category's computed-on-demand functions). No operation holds more
//! than one category lock at a time, so there is no lock ordering to maintain.
//!
//! All mutation calls are synchronous, infallible, and create the metric on
//! first write.

pub mod histogram;
pub mod snapshot;

pub use histogram::Histogram;
pub use snapshot::{ResetSettings, Snapshot};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Function evaluated at snapshot time to produce a counter value
pub type CounterFn = Arc<dyn Fn() -> u64 + Send + Sync>;
/// Function evaluated at snapshot time to produce a gauge value
pub type GaugeFn = Arc<dyn Fn() -> Gauge + Send + Sync>;
/// Function evaluated at snapshot time to produce a text value
pub type TextFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Instantaneous gauge value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gauge {
    Int(i64),
    Float(f64),
}

impl Gauge {
    /// Trap wire type for this value
    pub fn wire_type(&self) -> char {
        match self {
            Gauge::Int(_) => 'l',
            Gauge::Float(_) => 'n',
        }
    }
}

impl From<i64> for Gauge {
    fn from(value: i64) -> Self {
        Gauge::Int(value)
    }
}

impl From<i32> for Gauge {
    fn from(value: i32) -> Self {
        Gauge::Int(value.into())
    }
}

impl From<u32> for Gauge {
    fn from(value: u32) -> Self {
        Gauge::Int(value.into())
    }
}

impl From<f64> for Gauge {
    fn from(value: f64) -> Self {
        Gauge::Float(value)
    }
}

impl From<f32> for Gauge {
    fn from(value: f32) -> Self {
        Gauge::Float(value.into())
    }
}

impl fmt::Display for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gauge::Int(v) => write!(f, "{}", v),
            Gauge::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Per-category reset-on-snapshot flags
#[derive(Debug)]
pub(crate) struct ResetFlags {
    counters: AtomicBool,
    gauges: AtomicBool,
    histograms: AtomicBool,
    text: AtomicBool,
}

impl ResetFlags {
    fn new(settings: ResetSettings) -> Self {
        Self {
            counters: AtomicBool::new(settings.counters),
            gauges: AtomicBool::new(settings.gauges),
            histograms: AtomicBool::new(settings.histograms),
            text: AtomicBool::new(settings.text),
        }
    }

    pub(crate) fn load(&self) -> ResetSettings {
        ResetSettings {
            counters: self.counters.load(Ordering::Acquire),
            gauges: self.gauges.load(Ordering::Acquire),
            histograms: self.histograms.load(Ordering::Acquire),
            text: self.text.load(Ordering::Acquire),
        }
    }

    /// Replace all flags, returning the previous settings
    pub(crate) fn swap(&self, settings: ResetSettings) -> ResetSettings {
        ResetSettings {
            counters: self.counters.swap(settings.counters, Ordering::AcqRel),
            gauges: self.gauges.swap(settings.gauges, Ordering::AcqRel),
            histograms: self.histograms.swap(settings.histograms, Ordering::AcqRel),
            text: self.text.swap(settings.text, Ordering::AcqRel),
        }
    }
}

/// Mutex-guarded metric maps owned by a single client instance
pub struct MetricStore {
    counters: Mutex<HashMap<String, u64>>,
    counter_funcs: Mutex<HashMap<String, CounterFn>>,
    gauges: Mutex<HashMap<String, Gauge>>,
    gauge_funcs: Mutex<HashMap<String, GaugeFn>>,
    histograms: Mutex<HashMap<String, Histogram>>,
    text: Mutex<HashMap<String, String>>,
    text_funcs: Mutex<HashMap<String, TextFn>>,
    resets: ResetFlags,
}

impl fmt::Debug for MetricStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricStore")
            .field("counters", &self.counters.lock().len())
            .field("gauges", &self.gauges.lock().len())
            .field("histograms", &self.histograms.lock().len())
            .field("text", &self.text.lock().len())
            .field("resets", &self.resets.load())
            .finish()
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(ResetSettings::default())
    }
}

impl MetricStore {
    pub fn new(resets: ResetSettings) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            counter_funcs: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            gauge_funcs: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
            text: Mutex::new(HashMap::new()),
            text_funcs: Mutex::new(HashMap::new()),
            resets: ResetFlags::new(resets),
        }
    }

    pub(crate) fn reset_flags(&self) -> &ResetFlags {
        &self.resets
    }

    /// Current reset-on-snapshot settings
    pub fn reset_settings(&self) -> ResetSettings {
        self.resets.load()
    }

    // ─── Counters ──────────────────────────────────────────────────────────

    /// Add `delta` to a counter, initializing absent counters to `delta`
    pub fn add_counter(&self, name: &str, delta: u64) {
        let mut counters = self.counters.lock();
        match counters.get_mut(name) {
            Some(value) => *value = value.saturating_add(delta),
            None => {
                counters.insert(name.to_string(), delta);
            }
        }
    }

    pub fn increment(&self, name: &str) {
        self.add_counter(name, 1);
    }

    /// Overwrite a counter value
    pub fn set_counter(&self, name: &str, value: u64) {
        self.counters.lock().insert(name.to_string(), value);
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.lock().get(name).copied()
    }

    pub fn remove_counter(&self, name: &str) {
        self.counters.lock().remove(name);
    }

    /// Register a function producing the counter value at each snapshot
    ///
    /// The function runs synchronously inside the snapshot and must be cheap;
    /// a slow function delays the whole snapshot.
    pub fn set_counter_func<F>(&self, name: &str, func: F)
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.counter_funcs
            .lock()
            .insert(name.to_string(), Arc::new(func));
    }

    pub fn remove_counter_func(&self, name: &str) {
        self.counter_funcs.lock().remove(name);
    }

    // ─── Gauges ────────────────────────────────────────────────────────────

    pub fn set_gauge(&self, name: &str, value: impl Into<Gauge>) {
        self.gauges.lock().insert(name.to_string(), value.into());
    }

    pub fn gauge(&self, name: &str) -> Option<Gauge> {
        self.gauges.lock().get(name).copied()
    }

    pub fn remove_gauge(&self, name: &str) {
        self.gauges.lock().remove(name);
    }

    /// Register a function producing the gauge value at each snapshot
    pub fn set_gauge_func<F>(&self, name: &str, func: F)
    where
        F: Fn() -> Gauge + Send + Sync + 'static,
    {
        self.gauge_funcs
            .lock()
            .insert(name.to_string(), Arc::new(func));
    }

    pub fn remove_gauge_func(&self, name: &str) {
        self.gauge_funcs.lock().remove(name);
    }

    // ─── Histograms ────────────────────────────────────────────────────────

    /// Record a sample into a histogram
    ///
    /// The sample is recorded while the category lock is held so a concurrent
    /// reset cannot drop it.
    pub fn record_histogram(&self, name: &str, value: f64) {
        self.record_count_for_value(name, value, 1);
    }

    /// Alias for `record_histogram`, for latency-style call sites
    pub fn timing(&self, name: &str, value: f64) {
        self.record_histogram(name, value);
    }

    pub fn record_count_for_value(&self, name: &str, value: f64, count: u64) {
        let mut histograms = self.histograms.lock();
        histograms
            .entry(name.to_string())
            .or_default()
            .record_n(value, count);
    }

    /// Non-destructive copy of a histogram
    pub fn histogram(&self, name: &str) -> Option<Histogram> {
        self.histograms.lock().get(name).map(Histogram::copy)
    }

    pub fn remove_histogram(&self, name: &str) {
        self.histograms.lock().remove(name);
    }

    // ─── Text ──────────────────────────────────────────────────────────────

    pub fn set_text(&self, name: &str, value: impl Into<String>) {
        self.text.lock().insert(name.to_string(), value.into());
    }

    pub fn text(&self, name: &str) -> Option<String> {
        self.text.lock().get(name).cloned()
    }

    pub fn remove_text(&self, name: &str) {
        self.text.lock().remove(name);
    }

    /// Register a function producing the text value at each snapshot
    pub fn set_text_func<F>(&self, name: &str, func: F)
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.text_funcs
            .lock()
            .insert(name.to_string(), Arc::new(func));
    }

    pub fn remove_text_func(&self, name: &str) {
        self.text_funcs.lock().remove(name);
    }
}
