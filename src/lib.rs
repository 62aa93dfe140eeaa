//! trapmetrics - Metric buffering client for HTTP trap checks
//!
//! Application code records counters, gauges, histograms, and text values into
//! an in-memory store. A periodic flush resolves (or provisions) the owning
//! check through the resource API, registers metrics the check does not know
//! yet, and submits the batch to the check's trap endpoint.

pub mod api;
pub mod check;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod flush;
pub mod metric;
pub mod stats;
pub mod store;
pub mod submit;
pub mod telemetry;

pub use check::{CheckResolver, TrapTarget};
pub use client::MetricsClient;
pub use config::Config;
pub use error::{ClientError, ClientResult};
pub use flush::FlushOutcome;
pub use metric::{MetricKind, MetricSet, MetricValue};
pub use store::{Gauge, MetricStore};
