// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The fixed-rate sampling clock.
//!
//! Each tick records when it started reading, does its work, and then sleeps until
//! the next deadline. Deadlines are derived from the previous deadline rather than
//! from when the tick happened to finish, so per-tick processing jitter does not
//! accumulate and the long-run rate matches the target.

use std::time::{Duration, Instant};

use tracing::trace;

/// A source of time the clock can read and sleep on.
pub trait Timer {
    /// Returns the current time.
    fn now(&mut self) -> Instant;

    /// Blocks for the given duration.
    fn sleep(&mut self, duration: Duration);
}

/// The wall clock. Sleeps with a spin tail for sub-millisecond accuracy.
#[derive(Default)]
pub struct SystemTimer;

impl Timer for SystemTimer {
    fn now(&mut self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        spin_sleep::sleep(duration);
    }
}

/// Running statistics about the ticks a clock has driven.
#[derive(Clone, Debug, Default)]
pub struct TickStats {
    /// Number of ticks started.
    pub ticks: u64,
    /// Ticks that finished after their successor's deadline and did not sleep.
    pub overruns: u64,
    /// Start time of the first tick.
    pub first: Option<Instant>,
    /// Start time of the most recent tick.
    pub last: Option<Instant>,
}

impl TickStats {
    /// The mean time between tick starts.
    pub fn average_interval(&self) -> Option<Duration> {
        match (self.first, self.last) {
            (Some(first), Some(last)) if self.ticks > 1 => {
                Some((last - first).div_f64((self.ticks - 1) as f64))
            }
            _ => None,
        }
    }

    /// The achieved sampling rate in Hz.
    pub fn average_rate(&self) -> Option<f64> {
        self.average_interval()
            .filter(|interval| !interval.is_zero())
            .map(|interval| 1.0 / interval.as_secs_f64())
    }
}

/// Drives a processing loop at a fixed period.
pub struct SamplingClock {
    period: Duration,
    next_deadline: Option<Instant>,
    stats: TickStats,
}

impl SamplingClock {
    /// Creates a clock that ticks once per period.
    pub fn new(period: Duration) -> SamplingClock {
        SamplingClock {
            period,
            next_deadline: None,
            stats: TickStats::default(),
        }
    }

    /// The target tick period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Statistics for the ticks driven so far.
    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Starts a tick and returns its read time.
    pub fn begin_tick(&mut self, timer: &mut dyn Timer) -> Instant {
        let read_time = timer.now();
        if self.next_deadline.is_none() {
            self.next_deadline = Some(read_time);
            self.stats.first = Some(read_time);
        }
        self.stats.ticks += 1;
        self.stats.last = Some(read_time);
        read_time
    }

    /// Finishes the tick that started at `read_time`, sleeping until the next deadline
    /// if it hasn't already passed. Returns how long the clock slept.
    pub fn end_tick(&mut self, read_time: Instant, timer: &mut dyn Timer) -> Duration {
        let expected = self.next_deadline.unwrap_or(read_time);

        // Drift is positive if this tick started early and negative if it started late.
        let next_deadline = if expected >= read_time {
            read_time + self.period + (expected - read_time)
        } else {
            let late = read_time - expected;
            (read_time + self.period)
                .checked_sub(late)
                .unwrap_or(read_time)
        };
        self.next_deadline = Some(next_deadline);

        let wait = next_deadline.saturating_duration_since(timer.now());
        if wait.is_zero() {
            self.stats.overruns += 1;
            trace!(tick = self.stats.ticks, "Tick overran its deadline");
        } else {
            timer.sleep(wait);
        }
        wait
    }
}

/// A timer that only moves when told to. Used to simulate long runs instantly.
#[cfg(test)]
pub struct SimulatedTimer {
    now: Instant,
    pub slept: Vec<Duration>,
}

#[cfg(test)]
impl SimulatedTimer {
    pub fn new() -> SimulatedTimer {
        SimulatedTimer {
            now: Instant::now(),
            slept: Vec::new(),
        }
    }

    /// Simulates time spent processing.
    pub fn advance(&mut self, duration: Duration) {
        self.now += duration;
    }
}

#[cfg(test)]
impl Timer for SimulatedTimer {
    fn now(&mut self) -> Instant {
        self.now
    }

    fn sleep(&mut self, duration: Duration) {
        self.slept.push(duration);
        self.now += duration;
    }
}
