//! Histogram backend
//!
//! Wraps an auto-resizing `hdrhistogram` behind its own lock. Samples are
//! fixed-point scaled by [`SCALE`] so fractional values (e.g. latencies in
//! seconds) keep three decimal places. Only finite, non-negative samples are
//! accepted.

use hdrhistogram::Histogram as HdrHistogram;
use parking_lot::Mutex;

/// Fixed-point multiplier applied to recorded samples
pub const SCALE: f64 = 1000.0;

const SIGNIFICANT_FIGURES: u8 = 3;

/// Accumulating distribution with copy and copy-and-reset extraction
#[derive(Debug)]
pub struct Histogram {
    inner: Mutex<HdrHistogram<u64>>,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Histogram {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl Histogram {
    pub fn new() -> Self {
        let inner = HdrHistogram::new(SIGNIFICANT_FIGURES)
            .expect("3 significant figures is within hdrhistogram's supported range");
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Record a single sample. Returns false if the sample was rejected.
    pub fn record(&self, value: f64) -> bool {
        self.record_n(value, 1)
    }

    /// Record `count` occurrences of `value`
    pub fn record_n(&self, value: f64, count: u64) -> bool {
        if !value.is_finite() || value < 0.0 {
            tracing::debug!(value, "Dropping histogram sample outside supported range");
            return false;
        }
        if count == 0 {
            return true;
        }

        let scaled = (value * SCALE).round() as u64;
        match self.inner.lock().record_n(scaled, count) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(value, error = ?e, "Histogram rejected sample");
                false
            }
        }
    }

    /// Non-destructive copy
    pub fn copy(&self) -> Self {
        let inner = self.inner.lock().clone();
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Copy the distribution and clear it under a single lock acquisition
    pub fn copy_and_reset(&self) -> Self {
        let mut guard = self.inner.lock();
        let copied = guard.clone();
        guard.reset();
        Self {
            inner: Mutex::new(copied),
        }
    }

    /// Total number of recorded samples
    pub fn count(&self) -> u64 {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Sample value at the given quantile (0.0..=1.0), in unscaled units
    pub fn value_at_quantile(&self, quantile: f64) -> f64 {
        self.inner.lock().value_at_quantile(quantile) as f64 / SCALE
    }

    /// Bucketed counts in `H[<mantissa>e<exponent>]=<count>` form, ascending by bucket
    ///
    /// Buckets keep two significant digits; hdrhistogram bins that round to the
    /// same display bucket are merged.
    pub fn decimal_strings(&self) -> Vec<String> {
        let guard = self.inner.lock();
        let mut buckets: Vec<(String, u64)> = Vec::new();

        for entry in guard.iter_recorded() {
            let bucket = format_bucket(entry.value_iterated_to() as f64 / SCALE);
            let count = entry.count_at_value();
            match buckets.last_mut() {
                Some((last, total)) if *last == bucket => *total += count,
                _ => buckets.push((bucket, count)),
            }
        }

        buckets
            .into_iter()
            .map(|(bucket, count)| format!("H[{}]={}", bucket, count))
            .collect()
    }
}

/// Format a bucket value with two significant digits, e.g. `1.2e+01`
fn format_bucket(value: f64) -> String {
    if value == 0.0 {
        return "0.0e+00".to_string();
    }

    let mut exponent = value.abs().log10().floor() as i32;
    let mut mantissa = (value / 10f64.powi(exponent) * 10.0).round() / 10.0;
    if mantissa.abs() >= 10.0 {
        mantissa /= 10.0;
        exponent += 1;
    }

    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{:.1}e{}{:02}", mantissa, sign, exponent.abs())
}
