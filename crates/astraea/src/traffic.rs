//! Bulk data generation on the flow.
//!
//! The traffic path drives the lifetime of the whole client: when it stops
//! (duration elapsed, stop flag, or a fatal write error) it sets the stop flag
//! and prints the end sentinel, and the other loops wind down after it.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::perf_log::{END_SENTINEL, announce};
use crate::shutdown::Shutdown;
use crate::socket::FlowSocket;

/// Filler chunk size (stdio BUFSIZ).
pub const PAYLOAD_LEN: usize = 8192;
const FILLER: u8 = b'a';

/// Pause between writes once the peer has gone away.
pub const TRANSIENT_BACKOFF: Duration = Duration::from_millis(10);

/// Why the traffic path ended.
#[derive(Debug)]
pub enum TrafficEnd {
    DurationElapsed,
    Stopped,
    WriteFailed(io::Error),
}

impl TrafficEnd {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::WriteFailed(_))
    }
}

/// Summary of one traffic run.
#[derive(Debug)]
pub struct TrafficReport {
    pub end: TrafficEnd,
    pub bytes_sent: u64,
    pub elapsed: Duration,
}

pub struct TrafficGenerator<S> {
    socket: Arc<S>,
    duration: Option<Duration>,
    shutdown: Arc<Shutdown>,
}

impl<S: FlowSocket> TrafficGenerator<S> {
    pub fn new(socket: Arc<S>, shutdown: Arc<Shutdown>) -> Self {
        Self {
            socket,
            duration: None,
            shutdown,
        }
    }

    /// Stop after `duration`. `None` runs until the stop flag is set.
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    /// Run with the end sentinel going to stdout.
    pub fn run(self) -> TrafficReport {
        self.run_with_output(&mut io::stdout())
    }

    pub fn run_with_output(self, out: &mut impl Write) -> TrafficReport {
        let payload = vec![FILLER; PAYLOAD_LEN];
        let started = Instant::now();
        let deadline = self.duration.map(|d| started + d);
        let mut bytes_sent = 0u64;
        let mut broken_pipe = false;

        let end = loop {
            if self.shutdown.is_stopped() {
                break TrafficEnd::Stopped;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                tracing::info!(
                    duration_secs = self.duration.map(|d| d.as_secs_f64()),
                    "Duration elapsed, stopping traffic"
                );
                break TrafficEnd::DurationElapsed;
            }

            match self.socket.send_all(&payload) {
                Ok(()) => bytes_sent += payload.len() as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_peer_gone(&e) => {
                    if !broken_pipe {
                        tracing::warn!(error = %e, "Peer is gone, dropping writes");
                        broken_pipe = true;
                    }
                    std::thread::sleep(TRANSIENT_BACKOFF);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Data write failed");
                    break TrafficEnd::WriteFailed(e);
                }
            }
        };

        self.shutdown.request_stop();
        if let Err(e) = announce(out, END_SENTINEL) {
            tracing::warn!(error = %e, "Failed to print end sentinel");
        }

        let elapsed = started.elapsed();
        tracing::info!(bytes_sent, elapsed_ms = elapsed.as_millis() as u64, "Data thread exits");
        TrafficReport {
            end,
            bytes_sent,
            elapsed,
        }
    }
}

fn is_peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}
