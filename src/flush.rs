//! Single-flight flush orchestration
//!
//! A flush snapshots the store, makes sure the check is resolved, registers
//! metrics the check does not know yet, and submits the packaged result.
//! Overlapping flushes are dropped rather than queued.

use crate::check::CheckResolver;
use crate::error::ClientError;
use crate::metric::{MetricKind, MetricSet, MetricValue, NewMetric, now_millis};
use crate::stats::ClientStats;
use crate::store::{MetricStore, ResetFlags, ResetSettings, Snapshot};
use crate::submit::Submitter;
use parking_lot::Mutex;
use std::sync::Arc;

/// Result of one `flush()` call
#[derive(Debug)]
pub enum FlushOutcome {
    /// Another flush was already in flight
    Skipped,
    /// Nothing to submit
    Empty,
    /// Metrics were accepted by the trap
    Submitted { stats: u64, new_metrics: usize },
    /// Resolution or submission failed; the snapshot is not retained
    Failed(ClientError),
}

impl FlushOutcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, FlushOutcome::Submitted { .. })
    }
}

/// Clears the in-flight flag on drop
struct FlushGuard<'a> {
    flushing: &'a Mutex<bool>,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        *self.flushing.lock() = false;
    }
}

/// Turns every reset flag off until dropped, then restores the previous flags
struct ResetOverride<'a> {
    flags: &'a ResetFlags,
    previous: ResetSettings,
}

impl<'a> ResetOverride<'a> {
    fn disable(flags: &'a ResetFlags) -> Self {
        let previous = flags.swap(ResetSettings::all(false));
        Self { flags, previous }
    }
}

impl Drop for ResetOverride<'_> {
    fn drop(&mut self) {
        self.flags.swap(self.previous);
    }
}

/// Package the snapshot, keeping metrics `admit` accepts
fn package(
    snapshot: Snapshot,
    timestamp_ms: u64,
    mut admit: impl FnMut(&str, MetricKind) -> bool,
) -> MetricSet {
    let mut out = MetricSet::new();

    for (name, value) in snapshot.counters {
        if admit(&name, MetricKind::Numeric) {
            out.insert(name, MetricValue::counter(value, timestamp_ms));
        }
    }
    for (name, value) in snapshot.gauges {
        if admit(&name, MetricKind::Numeric) {
            out.insert(name, MetricValue::gauge(value, timestamp_ms));
        }
    }
    for (name, histogram) in snapshot.histograms {
        if admit(&name, MetricKind::Histogram) {
            out.insert(name, MetricValue::histogram(&histogram));
        }
    }
    for (name, value) in snapshot.text {
        if admit(&name, MetricKind::Text) {
            out.insert(name, MetricValue::text(value, timestamp_ms));
        }
    }

    out
}

/// Drives snapshot, registration, and submission for one store
pub struct FlushCoordinator {
    store: Arc<MetricStore>,
    resolver: Arc<CheckResolver>,
    submitter: Arc<dyn Submitter>,
    stats: ClientStats,
    flushing: Mutex<bool>,
}

impl FlushCoordinator {
    pub fn new(
        store: Arc<MetricStore>,
        resolver: Arc<CheckResolver>,
        submitter: Arc<dyn Submitter>,
        stats: ClientStats,
    ) -> Self {
        Self {
            store,
            resolver,
            submitter,
            stats,
            flushing: Mutex::new(false),
        }
    }

    /// Whether a flush is currently in flight
    pub fn is_flushing(&self) -> bool {
        *self.flushing.lock()
    }

    fn try_begin(&self) -> Option<FlushGuard<'_>> {
        let mut flushing = self.flushing.lock();
        if *flushing {
            self.stats.record_flush_skipped();
            tracing::debug!("Flush already in progress, skipping");
            return None;
        }
        *flushing = true;
        Some(FlushGuard {
            flushing: &self.flushing,
        })
    }

    /// Snapshot, register, and submit
    pub async fn flush(&self) -> FlushOutcome {
        let Some(_guard) = self.try_begin() else {
            return FlushOutcome::Skipped;
        };
        self.stats.record_flush();

        let snapshot = self.store.snapshot();
        if snapshot.is_empty() {
            return FlushOutcome::Empty;
        }

        let target = match self.resolver.resolve().await {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    dropped = snapshot.len(),
                    "Check not ready, dropping snapshot"
                );
                self.stats.record_submit_failure();
                return FlushOutcome::Failed(e);
            }
        };

        let mut new_metrics: Vec<NewMetric> = Vec::new();
        let mut output = package(snapshot, now_millis(), |name, kind| {
            // A name shared across categories is registered once
            if self.resolver.is_metric_active(name) || new_metrics.iter().any(|m| m.name == name) {
                true
            } else if self.resolver.activate_metric(name) {
                new_metrics.push(NewMetric::new(name, kind));
                true
            } else {
                false
            }
        });

        if output.is_empty() {
            return FlushOutcome::Empty;
        }

        if !new_metrics.is_empty() || self.resolver.needs_update() {
            if let Err(e) = self.resolver.register_metrics(&new_metrics).await {
                tracing::warn!(
                    error = %e,
                    new_metrics = new_metrics.len(),
                    "Failed to register new metrics, submitting known metrics only"
                );
                self.stats.record_registration_failure();
                for metric in &new_metrics {
                    output.remove(&metric.name);
                }
                new_metrics.clear();
                if output.is_empty() {
                    return FlushOutcome::Empty;
                }
            }
        }

        match self.submitter.submit(&target, &output).await {
            Ok(stats) => {
                self.stats.record_accepted(stats);
                tracing::debug!(
                    metrics = output.len(),
                    accepted = stats,
                    new_metrics = new_metrics.len(),
                    "Flush complete"
                );
                FlushOutcome::Submitted {
                    stats,
                    new_metrics: new_metrics.len(),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, metrics = output.len(), "Failed to submit metrics");
                self.stats.record_submit_failure();
                FlushOutcome::Failed(e)
            }
        }
    }

    /// Package every stored metric without resetting, registering, or submitting
    ///
    /// Returns `None` when a flush is already in flight.
    pub fn flush_metrics_no_reset(&self) -> Option<MetricSet> {
        let _guard = self.try_begin()?;

        let snapshot = {
            let _resets = ResetOverride::disable(self.store.reset_flags());
            self.store.snapshot()
        };

        Some(package(snapshot, now_millis(), |_, _| true))
    }
}
