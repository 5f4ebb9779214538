//! Client command line and the validated configuration built from it.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::bridge::transport::DEFAULT_IPC_DIR;

/// Congestion-control name that selects learned control.
pub const LEARNED_ALGORITHM: &str = "astraea";
pub const DEFAULT_CONGESTION: &str = "cubic";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{what} not found: {}", path.display())]
    MissingPath { what: &'static str, path: PathBuf },

    #[error("invalid value for --{name}: {value} (must be positive)")]
    InvalidNumber { name: &'static str, value: u64 },

    #[error("performance log directory does not exist: {}", .0.display())]
    PerfLogDir(PathBuf),
}

/// Data-plane client for learned TCP congestion control.
#[derive(Debug, Clone, Parser)]
#[command(name = "astraea-client", version, about)]
pub struct ClientArgs {
    /// Server address
    #[arg(long)]
    pub ip: IpAddr,

    /// Server port
    #[arg(long)]
    pub port: u16,

    /// Congestion control algorithm
    #[arg(long, default_value = DEFAULT_CONGESTION)]
    pub cong: String,

    /// Control interval in milliseconds
    #[arg(long, default_value_t = 20)]
    pub interval: u64,

    /// Decision process executable
    #[arg(long)]
    pub pyhelper: Option<PathBuf>,

    /// Trained model passed to the decision process
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Flow id
    #[arg(long)]
    pub id: Option<i64>,

    /// CSV performance log
    #[arg(long)]
    pub perf_log: Option<PathBuf>,

    /// Echo performance rows on stdout
    #[arg(long)]
    pub terminal_out: bool,

    /// Run time in seconds, 0 for unbounded
    #[arg(long, default_value_t = 0)]
    pub duration: u64,

    /// Sampling interval in milliseconds when no decision process is attached
    #[arg(long, default_value_t = 30)]
    pub monitor_interval: u64,

    /// Directory for the rendezvous socket
    #[arg(long, default_value = DEFAULT_IPC_DIR)]
    pub ipc_dir: PathBuf,
}

/// Settings for a flow driven by a decision process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnedControl {
    pub helper: PathBuf,
    pub model: PathBuf,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMode {
    Learned(LearnedControl),
    /// Plain kernel congestion control; the client never sets the window.
    Passive,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: SocketAddr,
    pub congestion: String,
    pub flow_id: Option<i64>,
    pub mode: ControlMode,
    pub perf_log: Option<PathBuf>,
    pub terminal_out: bool,
    /// `None` runs until stopped.
    pub duration: Option<Duration>,
    pub monitor_interval: Duration,
    pub ipc_dir: PathBuf,
}

impl ClientConfig {
    pub fn is_learned(&self) -> bool {
        matches!(self.mode, ControlMode::Learned(_))
    }

    /// Whether performance rows go anywhere.
    pub fn wants_perf_sink(&self) -> bool {
        self.perf_log.is_some() || self.terminal_out
    }

    /// The monitor only runs for passive flows that log something.
    pub fn wants_monitor(&self) -> bool {
        !self.is_learned() && self.wants_perf_sink()
    }
}

impl ClientArgs {
    pub fn validate(self) -> Result<ClientConfig, ConfigError> {
        let interval = positive_millis("interval", self.interval)?;
        let monitor_interval = positive_millis("monitor-interval", self.monitor_interval)?;

        if let Some(path) = &self.perf_log
            && let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
            && !dir.is_dir()
        {
            return Err(ConfigError::PerfLogDir(dir.to_path_buf()));
        }

        let mode = match (self.cong.as_str(), self.pyhelper, self.model) {
            (LEARNED_ALGORITHM, Some(helper), Some(model)) => {
                require_exists("decision process", &helper)?;
                require_exists("model", &model)?;
                ControlMode::Learned(LearnedControl {
                    helper,
                    model,
                    interval,
                })
            }
            (LEARNED_ALGORITHM, _, _) => {
                tracing::warn!("--cong astraea without --pyhelper and --model, running without a decision process");
                ControlMode::Passive
            }
            _ => ControlMode::Passive,
        };

        Ok(ClientConfig {
            server: SocketAddr::new(self.ip, self.port),
            congestion: self.cong,
            flow_id: self.id,
            mode,
            perf_log: self.perf_log,
            terminal_out: self.terminal_out,
            duration: (self.duration > 0).then(|| Duration::from_secs(self.duration)),
            monitor_interval,
            ipc_dir: self.ipc_dir,
        })
    }
}

fn positive_millis(name: &'static str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNumber { name, value });
    }
    Ok(Duration::from_millis(value))
}

fn require_exists(what: &'static str, path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingPath {
            what,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> ClientArgs {
        let mut argv = vec!["astraea-client", "--ip", "10.0.0.2", "--port", "5201"];
        argv.extend_from_slice(extra);
        ClientArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_give_passive_unbounded_flow() {
        let config = parse(&[]).validate().unwrap();

        assert_eq!(config.server, "10.0.0.2:5201".parse().unwrap());
        assert_eq!(config.congestion, "cubic");
        assert_eq!(config.mode, ControlMode::Passive);
        assert_eq!(config.flow_id, None);
        assert_eq!(config.duration, None);
        assert_eq!(config.monitor_interval, Duration::from_millis(30));
        assert_eq!(config.ipc_dir, PathBuf::from("/tmp"));
        assert!(!config.wants_monitor());
    }

    #[test]
    fn learned_mode_needs_astraea_and_existing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let helper = dir.path().join("infer.py");
        let model = dir.path().join("model");
        std::fs::write(&helper, "").unwrap();
        std::fs::create_dir(&model).unwrap();

        let config = parse(&[
            "--cong",
            "astraea",
            "--pyhelper",
            helper.to_str().unwrap(),
            "--model",
            model.to_str().unwrap(),
            "--interval",
            "10",
            "--id",
            "3",
            "--duration",
            "5",
        ])
        .validate()
        .unwrap();

        assert_eq!(
            config.mode,
            ControlMode::Learned(LearnedControl {
                helper,
                model,
                interval: Duration::from_millis(10),
            })
        );
        assert_eq!(config.flow_id, Some(3));
        assert_eq!(config.duration, Some(Duration::from_secs(5)));
    }

    #[test]
    fn missing_model_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let helper = dir.path().join("infer.py");
        std::fs::write(&helper, "").unwrap();
        let model = dir.path().join("absent");

        let err = parse(&[
            "--cong",
            "astraea",
            "--pyhelper",
            helper.to_str().unwrap(),
            "--model",
            model.to_str().unwrap(),
        ])
        .validate()
        .unwrap_err();

        assert!(matches!(err, ConfigError::MissingPath { what: "model", .. }));
    }

    #[test]
    fn helper_without_astraea_stays_passive() {
        let config = parse(&["--pyhelper", "/nonexistent", "--model", "/nonexistent"])
            .validate()
            .unwrap();
        assert_eq!(config.mode, ControlMode::Passive);
    }

    #[test]
    fn astraea_without_helper_runs_passively() {
        let config = parse(&["--cong", "astraea", "--terminal-out"])
            .validate()
            .unwrap();
        assert_eq!(config.mode, ControlMode::Passive);
        assert!(config.wants_monitor());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = parse(&["--interval", "0"]).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for --interval: 0 (must be positive)"
        );
    }

    #[test]
    fn perf_log_in_missing_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("perf.csv");
        let err = parse(&["--perf-log", path.to_str().unwrap()])
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::PerfLogDir(_)));
    }

    #[test]
    fn perf_log_alone_enables_monitor() {
        let config = parse(&["--perf-log", "perf.csv"]).validate().unwrap();
        assert!(config.wants_monitor());
    }

    #[test]
    fn non_numeric_port_is_a_parse_error() {
        assert!(ClientArgs::try_parse_from(["astraea-client", "--ip", "1.2.3.4", "--port", "web"]).is_err());
    }
}
