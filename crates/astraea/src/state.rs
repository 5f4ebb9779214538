//! Kernel congestion-control telemetry.

use serde::{Deserialize, Serialize};

/// What the kernel should fill in when we read DeepCC state.
///
/// `Action` asks for the full action-relevant state (per-interval averages are
/// reset by the kernel after the read); `Observe` is a lightweight dump that
/// leaves the accumulators alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InfoRequest {
    Observe = 0,
    Action = 1,
}

/// Point-in-time DeepCC state of one TCP connection.
///
/// Field names match the keys the decision process expects. `srtt_us` is in
/// kernel fixed-point units (microseconds << 3); `avg_thr` and `pacing_rate`
/// are bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub min_rtt: u32,
    pub avg_urtt: u32,
    pub cnt: u32,
    pub srtt_us: u32,
    pub avg_thr: u64,
    pub thr_cnt: u32,
    pub pacing_rate: u64,
    pub loss_bytes: u32,
    pub packets_out: u32,
    pub retrans_out: u32,
    pub max_packets_out: u32,
    pub cwnd: u32,
}

impl StateSnapshot {
    /// Smoothed RTT in microseconds.
    pub fn srtt_micros(&self) -> u32 {
        self.srtt_us >> 3
    }

    /// Average throughput in Mb/s, truncated.
    pub fn avg_thr_mbps(&self) -> u64 {
        bytes_per_sec_to_mbps(self.avg_thr)
    }

    /// Pacing rate in Mb/s, truncated.
    pub fn pacing_rate_mbps(&self) -> u64 {
        bytes_per_sec_to_mbps(self.pacing_rate)
    }
}

fn bytes_per_sec_to_mbps(bytes_per_sec: u64) -> u64 {
    (bytes_per_sec as f64 * 8.0 / 1e6) as u64
}
