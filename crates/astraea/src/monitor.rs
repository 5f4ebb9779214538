//! Observation-only sampling for flows without a decision process.

use std::sync::Arc;
use std::time::Duration;

use crate::control::ControlError;
use crate::perf_log::{PerfRecord, PerfSink};
use crate::shutdown::Shutdown;
use crate::socket::FlowSocket;
use crate::state::InfoRequest;

/// Default sampling interval.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(30);

/// Polls kernel state and logs it with an assigned window of 0.
///
/// Never writes the congestion window.
pub struct Monitor<S> {
    socket: Arc<S>,
    sink: Arc<PerfSink>,
    shutdown: Arc<Shutdown>,
    interval: Duration,
}

impl<S: FlowSocket> Monitor<S> {
    pub fn new(socket: Arc<S>, sink: Arc<PerfSink>, shutdown: Arc<Shutdown>) -> Self {
        Self {
            socket,
            sink,
            shutdown,
            interval: DEFAULT_MONITOR_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sample until the stop flag is set. Returns the number of rows emitted.
    pub fn run(self) -> Result<u64, ControlError> {
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "Monitor started");
        let mut samples = 0u64;

        while !self.shutdown.is_stopped() {
            let state = self
                .socket
                .deepcc_info(InfoRequest::Action)
                .map_err(ControlError::Poll)?;
            self.sink.emit(&PerfRecord::now(state, 0));
            samples += 1;
            std::thread::sleep(self.interval);
        }

        tracing::debug!(samples, "Monitor stopped");
        Ok(samples)
    }
}
