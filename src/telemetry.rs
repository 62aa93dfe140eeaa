//! Telemetry and observability setup
//!
//! Configures structured logging with tracing and tracing-subscriber.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Build the log filter: `RUST_LOG` if set, otherwise `trapmetrics=<default_level>`
pub fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("trapmetrics={}", default_level)))
}

/// Initialize tracing subscriber for structured logging
///
/// Only the first call per process has any effect. If the host application
/// already installed a global subscriber, that subscriber is kept.
///
/// # Examples
///
/// ```no_run
/// trapmetrics::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let installed = tracing_subscriber::registry()
            .with(filter(default_level))
            .with(tracing_subscriber::fmt::layer())
            .try_init();

        if installed.is_err() {
            tracing::debug!("Global tracing subscriber already set, keeping it");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init("debug");
        init("info");
    }

    #[test]
    fn test_filter_accepts_configured_level() {
        let filter = filter("warn");
        assert!(!filter.to_string().is_empty());
    }
}
