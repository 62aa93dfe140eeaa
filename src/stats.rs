//! Self-observability counters for the client
//!
//! Counters live in a private Prometheus registry so an application can render
//! them alongside its own metrics, or read them directly.

use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Flush and registration counters
#[derive(Clone)]
pub struct ClientStats {
    pub registry: Arc<Registry>,
    flushes: IntCounter,
    flushes_skipped: IntCounter,
    submit_failures: IntCounter,
    registration_failures: IntCounter,
    stats_accepted: IntCounter,
}

impl std::fmt::Debug for ClientStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientStats")
            .field("flushes", &self.flushes())
            .field("flushes_skipped", &self.flushes_skipped())
            .field("submit_failures", &self.submit_failures())
            .field("registration_failures", &self.registration_failures())
            .field("stats_accepted", &self.stats_accepted())
            .finish()
    }
}

impl ClientStats {
    /// Create the counters and register them with a new registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let flushes = IntCounter::with_opts(Opts::new(
            "trapmetrics_flushes_total",
            "Flushes that took a snapshot",
        ))?;
        let flushes_skipped = IntCounter::with_opts(Opts::new(
            "trapmetrics_flushes_skipped_total",
            "Flushes dropped because another flush was in flight",
        ))?;
        let submit_failures = IntCounter::with_opts(Opts::new(
            "trapmetrics_submit_failures_total",
            "Submissions that failed or were not attempted because resolution failed",
        ))?;
        let registration_failures = IntCounter::with_opts(Opts::new(
            "trapmetrics_registration_failures_total",
            "Check bundle updates that failed while registering new metrics",
        ))?;
        let stats_accepted = IntCounter::with_opts(Opts::new(
            "trapmetrics_stats_accepted_total",
            "Metric values the trap reported as accepted",
        ))?;

        registry.register(Box::new(flushes.clone()))?;
        registry.register(Box::new(flushes_skipped.clone()))?;
        registry.register(Box::new(submit_failures.clone()))?;
        registry.register(Box::new(registration_failures.clone()))?;
        registry.register(Box::new(stats_accepted.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            flushes,
            flushes_skipped,
            submit_failures,
            registration_failures,
            stats_accepted,
        })
    }

    pub fn record_flush(&self) {
        self.flushes.inc();
    }

    pub fn record_flush_skipped(&self) {
        self.flushes_skipped.inc();
    }

    pub fn record_submit_failure(&self) {
        self.submit_failures.inc();
    }

    pub fn record_registration_failure(&self) {
        self.registration_failures.inc();
    }

    pub fn record_accepted(&self, stats: u64) {
        self.stats_accepted.inc_by(stats);
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.get()
    }

    pub fn flushes_skipped(&self) -> u64 {
        self.flushes_skipped.get()
    }

    pub fn submit_failures(&self) -> u64 {
        self.submit_failures.get()
    }

    pub fn registration_failures(&self) -> u64 {
        self.registration_failures.get()
    }

    pub fn stats_accepted(&self) -> u64 {
        self.stats_accepted.get()
    }

    /// Render all counters in Prometheus text exposition format
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or produces invalid UTF-8.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    metric_family_count = metric_families.len(),
                    "Prometheus text encoder failed"
                );
                e
            })?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!(
                "Failed to convert client stats to UTF-8 at byte {}: {}",
                e.utf8_error().valid_up_to(),
                e
            ))
        })
    }
}
