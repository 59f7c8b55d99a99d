//! Wall-clock cost of whole query executions (submit, status polls, result
//! fetch), exposed on /stats/latency.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Executions longer than this are clamped into the top bucket.
const MAX_TRACKED_MS: u64 = 60 * 60 * 1000;

/// Execution latency quantiles in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Percentiles {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

pub struct LatencyStats {
    histogram: Mutex<Histogram<u64>>,
}

impl LatencyStats {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_max(MAX_TRACKED_MS, 3).expect("valid histogram bounds");
        Self {
            histogram: Mutex::new(histogram),
        }
    }

    /// Sub-millisecond executions count as 1ms.
    pub fn record(&self, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis())
            .unwrap_or(u64::MAX)
            .clamp(1, MAX_TRACKED_MS);
        if let Ok(mut h) = self.histogram.lock() {
            let _ = h.record(ms);
        }
    }

    pub fn percentiles(&self) -> Option<Percentiles> {
        let h = self.histogram.lock().ok()?;
        if h.len() == 0 {
            return None;
        }
        Some(Percentiles {
            p50_ms: h.value_at_quantile(0.50),
            p95_ms: h.value_at_quantile(0.95),
            p99_ms: h.value_at_quantile(0.99),
        })
    }

    pub fn len(&self) -> u64 {
        self.histogram.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
