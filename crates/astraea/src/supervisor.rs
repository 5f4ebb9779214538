//! Decision-process supervisor - owns the helper subprocess.
//!
//! The helper is launched as
//! `<helper> --ipc-path <rendezvous> --model-path <model>` and is never trusted
//! to exit on its own: teardown is a SIGKILL without waiting.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn decision process: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Everything the helper needs on its command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub helper: PathBuf,
    pub ipc_path: PathBuf,
    pub model: PathBuf,
}

impl LaunchSpec {
    pub fn new(helper: impl Into<PathBuf>, ipc_path: &Path, model: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
            ipc_path: ipc_path.to_path_buf(),
            model: model.into(),
        }
    }

    pub fn args(&self) -> [&OsStr; 4] {
        [
            OsStr::new("--ipc-path"),
            self.ipc_path.as_os_str(),
            OsStr::new("--model-path"),
            self.model.as_os_str(),
        ]
    }
}

/// Extension point for different helper spawn strategies.
pub trait DecisionSpawner: Send + Sync {
    fn spawn(&self, spec: &LaunchSpec) -> Result<Child, SpawnError>;
}

/// Runs the helper executable directly.
///
/// The helper's stdout is folded into our stderr: stdout carries sentinel
/// lines and performance rows that harnesses parse.
pub struct HelperSpawner;

impl DecisionSpawner for HelperSpawner {
    fn spawn(&self, spec: &LaunchSpec) -> Result<Child, SpawnError> {
        let child = Command::new(&spec.helper)
            .args(spec.args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(std::io::stderr()))
            .stderr(Stdio::inherit())
            .spawn()?;
        Ok(child)
    }
}

/// Handle to the running decision process.
#[derive(Debug)]
pub struct DecisionProcess {
    child: Child,
}

impl DecisionProcess {
    pub fn launch(spec: &LaunchSpec, spawner: &dyn DecisionSpawner) -> Result<Self, SpawnError> {
        let child = spawner.spawn(spec)?;
        tracing::info!(
            pid = child.id(),
            helper = %spec.helper.display(),
            model = %spec.model.display(),
            "Started decision process"
        );
        Ok(Self { child })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Best-effort SIGKILL. Reaps the child only if it is already gone.
    pub fn kill(&mut self) {
        let pid = Pid::from_raw(self.child.id() as i32);
        match kill(pid, Signal::SIGKILL) {
            Ok(()) => tracing::debug!(%pid, "Sent SIGKILL to decision process"),
            Err(Errno::ESRCH) => tracing::debug!(%pid, "Decision process already exited"),
            Err(e) => tracing::warn!(%pid, error = %e, "Failed to kill decision process"),
        }

        match self.child.try_wait() {
            Ok(Some(status)) => tracing::debug!(%pid, %status, "Decision process reaped"),
            Ok(None) => {}
            Err(e) => tracing::warn!(%pid, error = %e, "Failed to poll decision process"),
        }
    }

    /// Wait for the process to exit. Used by tests and diagnostics.
    pub fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait()
    }
}
