//! Application-facing metrics client
//!
//! `MetricsClient` owns one store, one check resolver, and one flush
//! coordinator. Metric mutations are synchronous; flushing and resolution are
//! async and run either on demand or from the periodic task started by
//! `start()`.

use crate::api::ResourceApi;
use crate::check::{BrokerProbe, CheckResolver, TcpProbe, TrapTarget};
use crate::config::Config;
use crate::error::{ClientError, ClientResult};
use crate::flush::{FlushCoordinator, FlushOutcome};
use crate::metric::MetricSet;
use crate::stats::ClientStats;
use crate::store::{Gauge, Histogram, MetricStore, ResetSettings};
use crate::submit::{Submitter, TrapSubmitter};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::AbortHandle;

/// Metrics client for one check
pub struct MetricsClient {
    config: Config,
    store: Arc<MetricStore>,
    resolver: Arc<CheckResolver>,
    coordinator: Arc<FlushCoordinator>,
    stats: ClientStats,
    flush_task: Mutex<Option<AbortHandle>>,
}

impl std::fmt::Debug for MetricsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsClient")
            .field("store", &self.store)
            .field("resolver", &self.resolver)
            .field("stats", &self.stats)
            .finish()
    }
}

impl MetricsClient {
    /// Create a client using the HTTP resource API, TCP broker probe, and trap submitter
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` for invalid configuration. No network
    /// calls are made until the first flush or `resolve()`.
    pub fn new(config: Config) -> ClientResult<Self> {
        config.validate()?;
        let resolver = CheckResolver::from_config(&config)?;
        let submitter = Arc::new(TrapSubmitter::new(config.api.request_timeout()));
        Self::assemble(config, resolver, submitter)
    }

    /// Create a client with explicit collaborators
    pub fn with_components(
        config: Config,
        api: Option<Arc<dyn ResourceApi>>,
        probe: Arc<dyn BrokerProbe>,
        submitter: Arc<dyn Submitter>,
    ) -> ClientResult<Self> {
        let resolver = CheckResolver::new(&config, api, probe)?;
        Self::assemble(config, resolver, submitter)
    }

    /// Client submitting straight to `url` with check management disabled
    pub fn for_submission_url(url: impl Into<String>) -> ClientResult<Self> {
        let config = Config::for_submission_url(url);
        let resolver = CheckResolver::new(&config, None, Arc::new(TcpProbe))?;
        let submitter = Arc::new(TrapSubmitter::new(config.api.request_timeout()));
        Self::assemble(config, resolver, submitter)
    }

    fn assemble(
        config: Config,
        resolver: CheckResolver,
        submitter: Arc<dyn Submitter>,
    ) -> ClientResult<Self> {
        let stats = ClientStats::new()
            .map_err(|e| ClientError::Internal(format!("failed to create client stats: {}", e)))?;
        let store = Arc::new(MetricStore::new(ResetSettings::from(&config.flush)));
        let resolver = Arc::new(resolver);
        let coordinator = Arc::new(FlushCoordinator::new(
            store.clone(),
            resolver.clone(),
            submitter,
            stats.clone(),
        ));

        Ok(Self {
            config,
            store,
            resolver,
            coordinator,
            stats,
            flush_task: Mutex::new(None),
        })
    }

    /// Get the client configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the underlying metric store
    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    /// Get the check resolver
    pub fn resolver(&self) -> &CheckResolver {
        &self.resolver
    }

    /// Get the client's self-observability counters
    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    // ─── Metric mutation ────────────────────────────────────────────────────

    pub fn add_counter(&self, name: &str, delta: u64) {
        self.store.add_counter(name, delta);
    }

    pub fn increment(&self, name: &str) {
        self.store.increment(name);
    }

    pub fn set_counter(&self, name: &str, value: u64) {
        self.store.set_counter(name, value);
    }

    pub fn remove_counter(&self, name: &str) {
        self.store.remove_counter(name);
    }

    pub fn set_counter_func<F>(&self, name: &str, func: F)
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.store.set_counter_func(name, func);
    }

    pub fn remove_counter_func(&self, name: &str) {
        self.store.remove_counter_func(name);
    }

    pub fn set_gauge(&self, name: &str, value: impl Into<Gauge>) {
        self.store.set_gauge(name, value);
    }

    pub fn remove_gauge(&self, name: &str) {
        self.store.remove_gauge(name);
    }

    pub fn set_gauge_func<F>(&self, name: &str, func: F)
    where
        F: Fn() -> Gauge + Send + Sync + 'static,
    {
        self.store.set_gauge_func(name, func);
    }

    pub fn remove_gauge_func(&self, name: &str) {
        self.store.remove_gauge_func(name);
    }

    pub fn record_histogram(&self, name: &str, value: f64) {
        self.store.record_histogram(name, value);
    }

    /// Record a duration sample (alias of `record_histogram`)
    pub fn timing(&self, name: &str, value: f64) {
        self.store.timing(name, value);
    }

    pub fn record_count_for_value(&self, name: &str, value: f64, count: u64) {
        self.store.record_count_for_value(name, value, count);
    }

    pub fn histogram(&self, name: &str) -> Option<Histogram> {
        self.store.histogram(name)
    }

    pub fn remove_histogram(&self, name: &str) {
        self.store.remove_histogram(name);
    }

    pub fn set_text(&self, name: &str, value: impl Into<String>) {
        self.store.set_text(name, value);
    }

    pub fn remove_text(&self, name: &str) {
        self.store.remove_text(name);
    }

    pub fn set_text_func<F>(&self, name: &str, func: F)
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.store.set_text_func(name, func);
    }

    pub fn remove_text_func(&self, name: &str) {
        self.store.remove_text_func(name);
    }

    // ─── Check inventory ────────────────────────────────────────────────────

    pub fn is_metric_active(&self, name: &str) -> bool {
        self.resolver.is_metric_active(name)
    }

    /// Replace a metric's tags; applied with the next registration update
    pub fn set_metric_tags(&self, name: &str, tags: &[String]) -> bool {
        self.resolver.set_metric_tags(name, tags)
    }

    /// Add tags to a metric; applied with the next registration update
    pub fn add_metric_tags(&self, name: &str, tags: &[String]) -> bool {
        self.resolver.add_metric_tags(name, tags)
    }

    /// Resolve the check now instead of on the first flush
    pub async fn resolve(&self) -> ClientResult<TrapTarget> {
        self.resolver.resolve().await
    }

    // ─── Flushing ───────────────────────────────────────────────────────────

    pub async fn flush(&self) -> FlushOutcome {
        self.coordinator.flush().await
    }

    pub fn flush_metrics_no_reset(&self) -> Option<MetricSet> {
        self.coordinator.flush_metrics_no_reset()
    }

    /// Whether the periodic flush task is running
    pub fn is_running(&self) -> bool {
        self.flush_task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start flushing every `flush.interval_seconds`
    ///
    /// Calling `start()` while the task is running has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.flush_task.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("Periodic flush already running");
            return;
        }

        let coordinator = self.coordinator.clone();
        let interval = self.config.flush.interval();

        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_seconds = interval.as_secs(),
                "Starting periodic flush"
            );

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                match coordinator.flush().await {
                    FlushOutcome::Failed(e) => {
                        tracing::warn!(error = %e, "Periodic flush failed");
                    }
                    outcome => tracing::trace!(outcome = ?outcome, "Periodic flush finished"),
                }
            }
        });
        *slot = Some(handle.abort_handle());
        drop(slot);

        // Monitor the flush task to detect failures
        tokio::spawn(async move {
            match handle.await {
                Ok(_) => {
                    tracing::error!(
                        "Periodic flush task terminated unexpectedly. \
                        Metrics will accumulate until flushed manually."
                    );
                }
                Err(e) if e.is_cancelled() => {
                    tracing::debug!("Periodic flush task stopped");
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Periodic flush task panicked. Metrics will accumulate \
                        until flushed manually."
                    );
                }
            }
        });
    }

    /// Stop the periodic task and run a final flush
    pub async fn shutdown(&self) -> FlushOutcome {
        if let Some(handle) = self.flush_task.lock().take() {
            handle.abort();
        }
        tracing::info!("Shutting down metrics client, flushing remaining metrics");
        self.coordinator.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSubmitter {
        submissions: Mutex<Vec<MetricSet>>,
    }

    #[async_trait]
    impl Submitter for CountingSubmitter {
        async fn submit(&self, _target: &TrapTarget, metrics: &MetricSet) -> ClientResult<u64> {
            self.submissions.lock().push(metrics.clone());
            Ok(metrics.len() as u64)
        }
    }

    fn client(interval_seconds: u64) -> (Arc<MetricsClient>, Arc<CountingSubmitter>) {
        let mut config = Config::for_submission_url("http://127.0.0.1:56104/write/test");
        config.flush.interval_seconds = interval_seconds;
        let submitter = Arc::new(CountingSubmitter::default());
        let client =
            MetricsClient::with_components(config, None, Arc::new(TcpProbe), submitter.clone())
                .unwrap();
        (Arc::new(client), submitter)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = MetricsClient::new(Config::default()).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_reset_settings_follow_config() {
        let mut config = Config::for_submission_url("http://127.0.0.1:56104/write/test");
        config.flush.reset_gauges = false;
        let client = MetricsClient::new(config).unwrap();
        let resets = client.store().reset_settings();
        assert!(resets.counters);
        assert!(!resets.gauges);
    }

    #[tokio::test]
    async fn test_flush_updates_stats() {
        let (client, submitter) = client(10);
        client.add_counter("requests", 2);
        client.set_gauge("temp", 21.5);

        let outcome = client.flush().await;
        assert!(matches!(outcome, FlushOutcome::Submitted { stats: 2, .. }));
        assert_eq!(client.stats().flushes(), 1);
        assert_eq!(client.stats().stats_accepted(), 2);
        assert!(client.is_metric_active("requests"));
        assert_eq!(submitter.submissions.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_runs_on_interval() {
        let (client, submitter) = client(5);
        client.increment("ticks");
        client.start();
        assert!(client.is_running());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(submitter.submissions.lock().len(), 1);

        client.increment("ticks");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(submitter.submissions.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_task_and_flushes() {
        let (client, submitter) = client(5);
        client.start();
        client.increment("ticks");

        let outcome = client.shutdown().await;
        assert!(outcome.is_submitted());
        tokio::task::yield_now().await;
        assert!(!client.is_running());

        client.increment("ticks");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(submitter.submissions.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_keeps_single_task() {
        let (client, submitter) = client(5);
        client.start();
        client.start();
        client.increment("ticks");

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(client.stats().flushes_skipped(), 0);
        assert_eq!(submitter.submissions.lock().len(), 1);
        client.shutdown().await;
    }
}
