//! Process-wide shutdown state.
//!
//! One [`Shutdown`] is shared (via `Arc`) by every loop. The stop flag only
//! ever goes from clear to set. Teardown releases everything attached here and
//! runs on a normal thread, never inside a signal handler.

use std::net::Shutdown as SocketShutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::perf_log::PerfSink;
use crate::supervisor::DecisionProcess;

#[derive(Default)]
pub struct Shutdown {
    stopped: AtomicBool,
    perf_sink: OnceLock<Arc<PerfSink>>,
    decision: Mutex<Option<DecisionProcess>>,
    ipc_stream: Mutex<Option<UnixStream>>,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the stop flag. Returns true for the call that actually set it.
    pub fn request_stop(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        if first {
            tracing::debug!("Stop requested");
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Register the performance log so teardown can close it.
    pub fn attach_perf_sink(&self, sink: Arc<PerfSink>) {
        if self.perf_sink.set(sink).is_err() {
            tracing::warn!("Performance log already attached");
        }
    }

    /// Register the decision process so teardown can kill it.
    ///
    /// A process attached after stop was requested is killed right away, since
    /// the teardown that would have reaped it may already have run.
    pub fn attach_decision_process(&self, process: DecisionProcess) {
        {
            let mut slot = self.decision.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(mut previous) = slot.replace(process) {
                tracing::warn!(pid = previous.id(), "Replacing decision process");
                previous.kill();
            }
        }
        if self.is_stopped() {
            tracing::debug!("Decision process attached after stop");
            self.kill_decision_process();
        }
    }

    /// Register a handle on the IPC stream. Teardown shuts it down so a
    /// control loop blocked on a reply wakes up even if the helper's socket
    /// outlives the helper.
    pub fn attach_ipc_stream(&self, stream: UnixStream) {
        let mut slot = self.ipc_stream.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(stream);
    }

    /// Close the performance log and the IPC channel, and kill the decision
    /// process.
    ///
    /// Idempotent. Does not touch the stop flag.
    pub fn teardown(&self) {
        if let Some(sink) = self.perf_sink.get() {
            sink.close();
        }

        let stream = self
            .ipc_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stream) = stream {
            if let Err(e) = stream.shutdown(SocketShutdown::Both) {
                tracing::debug!(error = %e, "IPC stream already closed");
            }
        }

        self.kill_decision_process();
    }

    fn kill_decision_process(&self) {
        let process = self
            .decision
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut process) = process {
            process.kill();
        }
    }
}
