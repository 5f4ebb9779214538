//! Server command line.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_PERF_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum ServerConfigError {
    #[error("invalid value for --perf-interval: {0} (must be positive)")]
    InvalidInterval(u64),
}

/// Receive-only TCP sink that reports goodput.
#[derive(Debug, Clone, Parser)]
#[command(name = "astraea-server", version, about)]
pub struct ServerArgs {
    /// Listen port
    #[arg(long)]
    pub port: u16,

    /// Listen address
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Congestion control algorithm for accepted connections
    #[arg(long, default_value = "cubic")]
    pub cong: String,

    /// CSV goodput log
    #[arg(long)]
    pub perf_log: Option<PathBuf>,

    /// Goodput reporting interval in milliseconds
    #[arg(long, default_value_t = 500)]
    pub perf_interval: u64,

    /// Report goodput on stdout even without a log file, between sentinels
    #[arg(long)]
    pub terminal_out: bool,

    /// Serve a single connection, then exit
    #[arg(long)]
    pub one_off: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub congestion: String,
    pub perf_log: Option<PathBuf>,
    pub perf_interval: Duration,
    pub terminal_out: bool,
    pub one_off: bool,
}

impl ServerConfig {
    /// Goodput is only reported when it goes somewhere.
    pub fn wants_reporter(&self) -> bool {
        self.perf_log.is_some() || self.terminal_out
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5201),
            congestion: "cubic".to_string(),
            perf_log: None,
            perf_interval: DEFAULT_PERF_INTERVAL,
            terminal_out: false,
            one_off: false,
        }
    }
}

impl ServerArgs {
    pub fn validate(self) -> Result<ServerConfig, ServerConfigError> {
        if self.perf_interval == 0 {
            return Err(ServerConfigError::InvalidInterval(0));
        }
        Ok(ServerConfig {
            listen: SocketAddr::new(self.host, self.port),
            congestion: self.cong,
            perf_log: self.perf_log,
            perf_interval: Duration::from_millis(self.perf_interval),
            terminal_out: self.terminal_out,
            one_off: self.one_off,
        })
    }
}
