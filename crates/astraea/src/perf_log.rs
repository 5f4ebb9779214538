//! Performance log rows, the CSV/terminal sink, and harness sentinels.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::state::StateSnapshot;

/// Printed on stdout when the transfer phase begins.
pub const START_SENTINEL: &str = "----START----";
/// Printed on stdout when the transfer phase ends.
pub const END_SENTINEL: &str = "----END----";

pub const CLIENT_CSV_HEADER: &str = "time,min_rtt,avg_urtt,cnt,srtt_us,avg_thr,thr_cnt,pacing_rate,\
loss_bytes,packets_out,retrans_out,max_packets_out,CWND in Kernel,CWND to Assign";

/// Write a sentinel line and flush so harnesses see it immediately.
pub fn announce(out: &mut impl Write, sentinel: &str) -> io::Result<()> {
    writeln!(out, "{sentinel}")?;
    out.flush()
}

/// Epoch milliseconds, wall clock.
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One row of the client performance log.
///
/// Rendered with `srtt_us` in microseconds and rates in Mb/s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfRecord {
    pub time_ms: i64,
    pub state: StateSnapshot,
    /// Window handed to the kernel this cycle; 0 when only observing.
    pub assigned_cwnd: u32,
}

impl PerfRecord {
    pub fn now(state: StateSnapshot, assigned_cwnd: u32) -> Self {
        Self::at(epoch_millis(), state, assigned_cwnd)
    }

    pub fn at(time_ms: i64, state: StateSnapshot, assigned_cwnd: u32) -> Self {
        Self {
            time_ms,
            state,
            assigned_cwnd,
        }
    }
}

impl fmt::Display for PerfRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.state;
        write!(
            f,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.time_ms,
            s.min_rtt,
            s.avg_urtt,
            s.cnt,
            s.srtt_micros(),
            s.avg_thr_mbps(),
            s.thr_cnt,
            s.pacing_rate_mbps(),
            s.loss_bytes,
            s.packets_out,
            s.retrans_out,
            s.max_packets_out,
            s.cwnd,
            self.assigned_cwnd,
        )
    }
}

/// Destination for performance rows: an optional CSV file plus an optional
/// echo on stdout.
///
/// Rows are flushed one by one. After [`PerfSink::close`] file writes are
/// dropped; the terminal echo keeps working.
pub struct PerfSink {
    file: Mutex<Option<BufWriter<File>>>,
    terminal: bool,
}

impl PerfSink {
    /// Open the sink, truncating `path` and writing `header` as its first line.
    pub fn create(path: Option<&Path>, header: &str, terminal: bool) -> io::Result<Self> {
        let file = match path {
            Some(path) => {
                let mut writer = BufWriter::new(File::create(path)?);
                writeln!(writer, "{header}")?;
                writer.flush()?;
                tracing::debug!(path = %path.display(), "Opened performance log");
                Some(writer)
            }
            None => None,
        };

        Ok(Self {
            file: Mutex::new(file),
            terminal,
        })
    }

    pub fn echoes_to_terminal(&self) -> bool {
        self.terminal
    }

    pub fn emit(&self, row: &impl fmt::Display) {
        {
            let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(writer) = file.as_mut()
                && let Err(e) = writeln!(writer, "{row}").and_then(|()| writer.flush())
            {
                tracing::warn!(error = %e, "Failed to write performance log row");
            }
        }

        if self.terminal {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{row}").and_then(|()| stdout.flush());
        }
    }

    /// Flush and close the file. Idempotent.
    pub fn close(&self) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut writer) = file.take() {
            if let Err(e) = writer.flush() {
                tracing::warn!(error = %e, "Failed to flush performance log");
            }
            tracing::debug!("Closed performance log");
        }
    }
}
