//! astraea: data-plane client for learned TCP congestion control.
//!
//! A bulk TCP flow whose congestion window is set, every control interval, by
//! an external decision process reached over a local socket.

mod state;

pub mod bridge;
#[cfg(target_os = "linux")]
pub mod client;
pub mod config;
pub mod control;
pub mod logging;
pub mod monitor;
pub mod perf_log;
pub mod shutdown;
pub mod signals;
pub mod socket;
pub mod supervisor;
pub mod ticker;
pub mod traffic;

pub use state::{InfoRequest, StateSnapshot};

pub use config::{ClientArgs, ClientConfig, ConfigError, ControlMode, LearnedControl};
pub use control::{ControlError, ControlLoop, LoopExit};
pub use monitor::Monitor;
pub use perf_log::{PerfRecord, PerfSink};
pub use shutdown::Shutdown;
pub use socket::FlowSocket;
pub use supervisor::{DecisionProcess, SpawnError};
pub use traffic::{TrafficEnd, TrafficGenerator, TrafficReport};
