//! Received-byte accounting and goodput samples.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Total bytes received across all connections.
#[derive(Debug, Default)]
pub struct ThroughputMeter {
    received: AtomicU64,
}

impl ThroughputMeter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, bytes: usize) {
        self.received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

/// Megabits per second for `bytes` received over `interval`.
pub fn mbps(bytes: u64, interval: Duration) -> f64 {
    let secs = interval.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / secs / 1_000_000.0
}

/// One `time,goodput` row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoodputSample {
    pub time_ms: i64,
    pub mbps: f64,
}

impl fmt::Display for GoodputSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.time_ms, self.mbps)
    }
}

/// Turns the running byte total into per-interval goodput.
///
/// Rates are computed against the nominal interval, not the measured gap
/// between samples.
#[derive(Debug)]
pub struct GoodputReporter {
    meter: Arc<ThroughputMeter>,
    interval: Duration,
    last_total: u64,
}

impl GoodputReporter {
    pub fn new(meter: Arc<ThroughputMeter>, interval: Duration) -> Self {
        Self {
            meter,
            interval,
            last_total: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn sample(&mut self, time_ms: i64) -> GoodputSample {
        let total = self.meter.total();
        let delta = total.saturating_sub(self.last_total);
        self.last_total = total;
        GoodputSample {
            time_ms,
            mbps: mbps(delta, self.interval),
        }
    }
}
