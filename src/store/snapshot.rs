//! Point-in-time extraction of the metric store
//!
//! Each category is copied under its own lock, computed functions are evaluated
//! and merged on top, and the stored values are cleared afterwards when that
//! category's reset flag is set. The four categories are extracted on scoped
//! threads; the result is the same as extracting them one after another.

use super::{Gauge, Histogram, MetricStore};
use crate::config::FlushConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

/// Which categories are cleared after a snapshot copies them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetSettings {
    pub counters: bool,
    pub gauges: bool,
    pub histograms: bool,
    pub text: bool,
}

impl Default for ResetSettings {
    fn default() -> Self {
        Self::all(true)
    }
}

impl ResetSettings {
    pub fn all(reset: bool) -> Self {
        Self {
            counters: reset,
            gauges: reset,
            histograms: reset,
            text: reset,
        }
    }
}

impl From<&FlushConfig> for ResetSettings {
    fn from(config: &FlushConfig) -> Self {
        Self {
            counters: config.reset_counters,
            gauges: config.reset_gauges,
            histograms: config.reset_histograms,
            text: config.reset_text,
        }
    }
}

/// Copy of the store's contents
#[derive(Debug, Default)]
pub struct Snapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, Gauge>,
    pub histograms: HashMap<String, Histogram>,
    pub text: HashMap<String, String>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.counters.len() + self.gauges.len() + self.histograms.len() + self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricStore {
    /// Copy every category, honoring the current reset flags
    pub fn snapshot(&self) -> Snapshot {
        let resets = self.resets.load();

        thread::scope(|scope| {
            let counters = scope.spawn(|| self.snapshot_counters(resets.counters));
            let gauges = scope.spawn(|| self.snapshot_gauges(resets.gauges));
            let histograms = scope.spawn(|| self.snapshot_histograms(resets.histograms));
            let text = scope.spawn(|| self.snapshot_text(resets.text));

            Snapshot {
                counters: join_category(counters, "counters"),
                gauges: join_category(gauges, "gauges"),
                histograms: join_category(histograms, "histograms"),
                text: join_category(text, "text"),
            }
        })
    }

    fn snapshot_counters(&self, reset: bool) -> HashMap<String, u64> {
        let mut out = take_or_copy(&mut self.counters.lock(), reset);
        let funcs = self.counter_funcs.lock().clone();
        merge_funcs(&mut out, &funcs);
        out
    }

    fn snapshot_gauges(&self, reset: bool) -> HashMap<String, Gauge> {
        let mut out = take_or_copy(&mut self.gauges.lock(), reset);
        let funcs = self.gauge_funcs.lock().clone();
        merge_funcs(&mut out, &funcs);
        out
    }

    fn snapshot_histograms(&self, reset: bool) -> HashMap<String, Histogram> {
        let mut histograms = self.histograms.lock();
        if reset && !histograms.is_empty() {
            let out = histograms
                .iter()
                .map(|(name, hist)| (name.clone(), hist.copy_and_reset()))
                .collect();
            histograms.clear();
            out
        } else {
            histograms
                .iter()
                .map(|(name, hist)| (name.clone(), hist.copy()))
                .collect()
        }
    }

    fn snapshot_text(&self, reset: bool) -> HashMap<String, String> {
        let mut out = take_or_copy(&mut self.text.lock(), reset);
        let funcs = self.text_funcs.lock().clone();
        merge_funcs(&mut out, &funcs);
        out
    }
}

fn take_or_copy<V: Clone>(map: &mut HashMap<String, V>, reset: bool) -> HashMap<String, V> {
    if reset && !map.is_empty() {
        std::mem::take(map)
    } else {
        map.clone()
    }
}

/// Evaluate functions outside the function-map lock; results override stored values
fn merge_funcs<V>(
    out: &mut HashMap<String, V>,
    funcs: &HashMap<String, Arc<dyn Fn() -> V + Send + Sync>>,
) {
    for (name, func) in funcs {
        out.insert(name.clone(), func());
    }
}

fn join_category<T: Default>(handle: thread::ScopedJoinHandle<'_, T>, category: &str) -> T {
    match handle.join() {
        Ok(values) => values,
        Err(_) => {
            tracing::error!(category, "Snapshot extraction panicked; category skipped");
            T::default()
        }
    }
}
