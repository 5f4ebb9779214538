//! Fixed-cadence scheduling.
//!
//! Tick `k` is due at `start + k * interval`, independent of how long each
//! cycle took. A cycle that overruns its slot makes the following waits return
//! immediately until the schedule is caught up; ticks are never skipped.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Ticker {
    start: Instant,
    interval: Duration,
    ticks: u32,
}

impl Ticker {
    /// Schedule anchored at now. The first wait returns at `now + interval`.
    pub fn start(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    pub fn starting_at(start: Instant, interval: Duration) -> Self {
        Self {
            start,
            interval,
            ticks: 0,
        }
    }

    /// Ticks elapsed so far.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// When the next wait returns.
    pub fn next_deadline(&self) -> Instant {
        self.start + self.interval * self.ticks.saturating_add(1)
    }

    /// Sleep until the next deadline and return it.
    pub fn wait(&mut self) -> Instant {
        let deadline = self.next_deadline();
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.ticks = self.ticks.saturating_add(1);
        deadline
    }
}
