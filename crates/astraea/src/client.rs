//! One client session: set up the flow, run the loops, collect the outcome.
//!
//! Setup order matters. The rendezvous socket is bound and the decision process
//! connected before the TCP flow opens, so the first control cycle never waits
//! on a helper that is still loading its model.

use std::io;
use std::sync::Arc;
use std::thread;

use anyhow::Context;

use crate::bridge::transport::{IpcChannel, RendezvousListener};
use crate::config::{ClientConfig, ControlMode};
use crate::control::{ControlError, ControlLoop, LoopExit};
use crate::monitor::Monitor;
use crate::perf_log::{CLIENT_CSV_HEADER, PerfSink, START_SENTINEL, announce};
use crate::shutdown::Shutdown;
use crate::socket::{DEEPCC_CONTROL_LEVEL, DeepCcSocket, FlowSocket};
use crate::supervisor::{DecisionProcess, HelperSpawner, LaunchSpec};
use crate::traffic::{TrafficGenerator, TrafficReport};

/// Outcome of the thread running beside the data path.
#[derive(Debug)]
pub enum SideLoop {
    Control(LoopExit),
    Monitor { samples: u64 },
}

#[derive(Debug)]
pub struct SessionReport {
    pub traffic: TrafficReport,
    /// `None` when neither a control loop nor a monitor was started.
    pub side: Option<Result<SideLoop, ControlError>>,
}

impl SessionReport {
    /// 0 when the data path ended normally and no loop failed.
    pub fn exit_code(&self) -> i32 {
        let side_failed = matches!(self.side, Some(Err(_)));
        if self.traffic.end.is_failure() || side_failed {
            1
        } else {
            0
        }
    }
}

/// Run a full session against the real kernel.
pub fn run_session(config: &ClientConfig, shutdown: Arc<Shutdown>) -> anyhow::Result<SessionReport> {
    let channel = match &config.mode {
        ControlMode::Learned(learned) => {
            let listener = RendezvousListener::bind(&config.ipc_dir)
                .with_context(|| format!("failed to bind rendezvous socket in {}", config.ipc_dir.display()))?;
            let spec = LaunchSpec::new(&learned.helper, listener.path(), &learned.model);
            shutdown.attach_decision_process(DecisionProcess::launch(&spec, &HelperSpawner)?);
            if shutdown.is_stopped() {
                anyhow::bail!("interrupted while starting the decision process");
            }

            let channel = listener
                .accept()
                .context("failed to accept decision process connection")?;
            tracing::info!(
                flow_id = config.flow_id,
                interval_ms = learned.interval.as_millis() as u64,
                "IPC with decision process established"
            );
            Some(channel)
        }
        ControlMode::Passive => {
            tracing::info!(congestion = %config.congestion, "No decision process, using kernel congestion control");
            None
        }
    };

    let socket = DeepCcSocket::connect(config.server)
        .with_context(|| format!("failed to connect to {}", config.server))?;
    socket
        .set_congestion_control(&config.congestion)
        .with_context(|| format!("failed to set congestion control to {}", config.congestion))?;
    socket.set_nodelay().context("failed to set TCP_NODELAY")?;
    socket
        .enable_deepcc(DEEPCC_CONTROL_LEVEL)
        .context("failed to enable DeepCC")?;
    tracing::debug!(
        flow_id = config.flow_id,
        congestion = %config.congestion,
        level = DEEPCC_CONTROL_LEVEL,
        "Flow configured"
    );

    let perf_sink = if config.wants_perf_sink() {
        let sink = PerfSink::create(config.perf_log.as_deref(), CLIENT_CSV_HEADER, config.terminal_out)
            .context("failed to open performance log")?;
        let sink = Arc::new(sink);
        shutdown.attach_perf_sink(Arc::clone(&sink));
        Some(sink)
    } else {
        None
    };

    announce(&mut io::stdout(), START_SENTINEL).context("failed to print start sentinel")?;

    let report = drive(Arc::new(socket), channel, perf_sink, config, shutdown)?;
    Ok(report)
}

/// Run the data path on this thread and the control loop or monitor beside it.
///
/// Returns once the data path has ended and the side loop has been joined.
pub fn drive<S: FlowSocket + 'static>(
    socket: Arc<S>,
    channel: Option<IpcChannel>,
    perf_sink: Option<Arc<PerfSink>>,
    config: &ClientConfig,
    shutdown: Arc<Shutdown>,
) -> io::Result<SessionReport> {
    let side = match (&config.mode, channel) {
        (ControlMode::Learned(learned), Some(channel)) => {
            shutdown.attach_ipc_stream(channel.try_clone_stream()?);
            let control = ControlLoop::new(Arc::clone(&socket), channel, Arc::clone(&shutdown))
                .with_flow_id(config.flow_id)
                .with_interval(learned.interval)
                .with_perf_sink(perf_sink);
            let handle = thread::Builder::new()
                .name("astraea-control".into())
                .spawn(move || control.run().map(SideLoop::Control))?;
            tracing::debug!(flow_id = config.flow_id, "Started control thread");
            Some(handle)
        }
        (ControlMode::Passive, _) if config.wants_monitor() => match perf_sink {
            Some(sink) => {
                let monitor = Monitor::new(Arc::clone(&socket), sink, Arc::clone(&shutdown))
                    .with_interval(config.monitor_interval);
                let handle = thread::Builder::new()
                    .name("astraea-monitor".into())
                    .spawn(move || monitor.run().map(|samples| SideLoop::Monitor { samples }))?;
                tracing::info!(congestion = %config.congestion, "Started monitor thread");
                Some(handle)
            }
            None => None,
        },
        _ => None,
    };

    tracing::info!(flow_id = config.flow_id, "Sending data");
    let traffic = TrafficGenerator::new(socket, Arc::clone(&shutdown))
        .with_duration(config.duration)
        .run();

    // Closing the IPC stream unblocks a control loop waiting on a reply.
    shutdown.teardown();

    let side = side.map(|handle| {
        handle
            .join()
            .unwrap_or(Err(ControlError::Panicked))
    });
    match &side {
        Some(Ok(SideLoop::Control(LoopExit::PeerLost(e)))) => {
            tracing::warn!(error = %e, "Flow finished without its decision process")
        }
        Some(Err(e)) => tracing::error!(error = %e, "Side loop failed"),
        _ => {}
    }

    Ok(SessionReport { traffic, side })
}
