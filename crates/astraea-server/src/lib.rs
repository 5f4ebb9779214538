//! astraea-server: receive-only TCP sink that reports goodput.
//!
//! Counterpart of the astraea client in experiments: it sets the
//! congestion-control algorithm on each accepted connection, counts received
//! bytes, and logs Mb/s on a fixed interval.

pub mod config;
pub mod meter;
pub mod server;

pub use config::{ServerArgs, ServerConfig, ServerConfigError};
pub use meter::{GoodputReporter, GoodputSample, ThroughputMeter};
pub use server::Server;
