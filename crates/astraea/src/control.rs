//! Control loop - periodic state → decision → cwnd cycle.
//!
//! Each cycle, strictly in order:
//! 1. Read action-oriented DeepCC state from the kernel
//! 2. Send it to the decision process as an ALIVE message
//! 3. Block for the framed reply and extract `cwnd`
//! 4. Apply the window to the kernel
//! 5. Emit a performance row
//!
//! Cycles start on a fixed cadence (see [`Ticker`]). A lost or misbehaving
//! decision process ends the loop without touching the window again; a kernel
//! failure is returned as an error.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bridge::protocol::{ControlMessage, Decision};
use crate::bridge::transport::{ChannelError, IpcChannel};
use crate::perf_log::{PerfRecord, PerfSink};
use crate::shutdown::Shutdown;
use crate::socket::FlowSocket;
use crate::state::InfoRequest;
use crate::ticker::Ticker;

/// Default control interval.
pub const DEFAULT_CONTROL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("failed to read kernel congestion state: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to apply cwnd {cwnd}: {source}")]
    Apply {
        cwnd: u32,
        #[source]
        source: io::Error,
    },

    #[error("decision channel failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("loop thread panicked")]
    Panicked,
}

/// How the loop ended when it did not fail.
#[derive(Debug)]
pub enum LoopExit {
    /// The stop flag was observed.
    Stopped,
    /// The decision process went away or sent garbage.
    PeerLost(ChannelError),
}

/// Result of one completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Applied(u32),
    /// Stop was requested while waiting for the decision; nothing was applied.
    Abandoned,
}

pub struct ControlLoop<S> {
    socket: Arc<S>,
    channel: IpcChannel,
    shutdown: Arc<Shutdown>,
    flow_id: Option<i64>,
    interval: Duration,
    perf_sink: Option<Arc<PerfSink>>,
}

impl<S: FlowSocket> ControlLoop<S> {
    pub fn new(socket: Arc<S>, channel: IpcChannel, shutdown: Arc<Shutdown>) -> Self {
        Self {
            socket,
            channel,
            shutdown,
            flow_id: None,
            interval: DEFAULT_CONTROL_INTERVAL,
            perf_sink: None,
        }
    }

    pub fn with_flow_id(mut self, flow_id: Option<i64>) -> Self {
        self.flow_id = flow_id;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_perf_sink(mut self, sink: Option<Arc<PerfSink>>) -> Self {
        self.perf_sink = sink;
        self
    }

    /// Run cycles until stopped, the peer is lost, or the kernel fails.
    pub fn run(mut self) -> Result<LoopExit, ControlError> {
        tracing::debug!(
            flow_id = self.flow_id,
            interval_ms = self.interval.as_millis() as u64,
            "Control loop started"
        );
        let mut ticker = Ticker::start(self.interval);

        while !self.shutdown.is_stopped() {
            match self.cycle() {
                Ok(CycleOutcome::Applied(_)) => {}
                Ok(CycleOutcome::Abandoned) => break,
                Err(ControlError::Channel(e)) => {
                    if self.shutdown.is_stopped() {
                        tracing::debug!(error = %e, "Channel closed during shutdown");
                        break;
                    }
                    tracing::warn!(flow_id = self.flow_id, error = %e, "Decision process lost, control loop stopping");
                    return Ok(LoopExit::PeerLost(e));
                }
                Err(e) => return Err(e),
            }
            ticker.wait();
        }

        tracing::debug!(flow_id = self.flow_id, cycles = ticker.ticks(), "Control loop stopped");
        Ok(LoopExit::Stopped)
    }

    /// One poll → send → receive → apply → log pass.
    pub fn cycle(&mut self) -> Result<CycleOutcome, ControlError> {
        let state = self
            .socket
            .deepcc_info(InfoRequest::Action)
            .map_err(ControlError::Poll)?;
        tracing::trace!(flow_id = self.flow_id, ?state, "Sending state");

        self.channel
            .send(ControlMessage::alive(self.flow_id, state))?;
        let sent_at = Instant::now();

        let Decision { cwnd } = self.channel.recv()?;
        if self.shutdown.is_stopped() {
            return Ok(CycleOutcome::Abandoned);
        }

        self.socket
            .set_cwnd(cwnd)
            .map_err(|source| ControlError::Apply { cwnd, source })?;
        tracing::debug!(
            flow_id = self.flow_id,
            cwnd,
            elapsed_us = sent_at.elapsed().as_micros() as u64,
            "Applied cwnd"
        );

        if let Some(sink) = &self.perf_sink {
            sink.emit(&PerfRecord::now(state, cwnd));
        }
        Ok(CycleOutcome::Applied(cwnd))
    }
}
