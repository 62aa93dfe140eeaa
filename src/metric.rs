//! Packaged metric values in trap wire form
//!
//! A `MetricSet` serializes to the JSON object the trap endpoint accepts:
//!
//! ```json
//! {"requests": {"_type": "L", "_value": 42, "_ts": 1700000000000},
//!  "latency":  {"_type": "h", "_value": ["H[1.2e+01]=3"]}}
//! ```

use crate::store::{Gauge, Histogram};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Packaged output of one flush, keyed by metric name
pub type MetricSet = BTreeMap<String, MetricValue>;

/// Metric type as declared on the check bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Numeric,
    Histogram,
    Text,
}

impl MetricKind {
    /// Bundle metric `type` string
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Numeric => "numeric",
            MetricKind::Histogram => "histogram",
            MetricKind::Text => "text",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric observed locally that the check does not yet accept
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewMetric {
    pub name: String,
    pub kind: MetricKind,
}

impl NewMetric {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Wire payload value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Uint(u64),
    Int(i64),
    Float(f64),
    Text(String),
    Histogram(Vec<String>),
}

/// One entry of a `MetricSet`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValue {
    #[serde(rename = "_type")]
    pub wire_type: char,
    #[serde(rename = "_value")]
    pub value: Value,
    #[serde(rename = "_ts", skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
}

impl MetricValue {
    pub fn counter(value: u64, timestamp_ms: u64) -> Self {
        Self {
            wire_type: 'L',
            value: Value::Uint(value),
            timestamp_ms: Some(timestamp_ms),
        }
    }

    pub fn gauge(value: Gauge, timestamp_ms: u64) -> Self {
        let wire_type = value.wire_type();
        let value = match value {
            Gauge::Int(v) => Value::Int(v),
            Gauge::Float(v) => Value::Float(v),
        };
        Self {
            wire_type,
            value,
            timestamp_ms: Some(timestamp_ms),
        }
    }

    pub fn text(value: String, timestamp_ms: u64) -> Self {
        Self {
            wire_type: 's',
            value: Value::Text(value),
            timestamp_ms: Some(timestamp_ms),
        }
    }

    /// Histograms carry no timestamp; bucket accumulation already spans the interval
    pub fn histogram(histogram: &Histogram) -> Self {
        Self {
            wire_type: 'h',
            value: Value::Histogram(histogram.decimal_strings()),
            timestamp_ms: None,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self.value {
            Value::Histogram(_) => MetricKind::Histogram,
            Value::Text(_) => MetricKind::Text,
            _ => MetricKind::Numeric,
        }
    }
}

/// Milliseconds since the Unix epoch, 0 if the clock is before the epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "System clock is before the Unix epoch");
            0
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_serializes_with_timestamp() {
        let value = MetricValue::counter(42, 1_700_000_000_000);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"_type": "L", "_value": 42, "_ts": 1_700_000_000_000u64})
        );
    }

    #[test]
    fn test_gauge_types() {
        let int = serde_json::to_value(MetricValue::gauge(Gauge::Int(-3), 1)).unwrap();
        assert_eq!(int["_type"], "l");
        assert_eq!(int["_value"], -3);

        let float = serde_json::to_value(MetricValue::gauge(Gauge::Float(0.5), 1)).unwrap();
        assert_eq!(float["_type"], "n");
        assert_eq!(float["_value"], 0.5);
    }

    #[test]
    fn test_histogram_has_no_timestamp() {
        let h = Histogram::new();
        h.record(12.0);
        let json = serde_json::to_value(MetricValue::histogram(&h)).unwrap();
        assert_eq!(json["_type"], "h");
        assert_eq!(json["_value"], serde_json::json!(["H[1.2e+01]=1"]));
        assert!(json.get("_ts").is_none());
    }

    #[test]
    fn test_kind_from_value() {
        assert_eq!(MetricValue::counter(1, 0).kind(), MetricKind::Numeric);
        assert_eq!(MetricValue::text("x".into(), 0).kind(), MetricKind::Text);
        assert_eq!(
            MetricValue::histogram(&Histogram::new()).kind(),
            MetricKind::Histogram
        );
    }

    #[test]
    fn test_metric_kind_strings() {
        assert_eq!(MetricKind::Numeric.as_str(), "numeric");
        assert_eq!(MetricKind::Histogram.to_string(), "histogram");
        assert_eq!(MetricKind::Text.as_str(), "text");
    }
}
