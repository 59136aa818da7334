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
use std::{
    collections::{HashMap, VecDeque},
    fmt, io,
    sync::Arc,
};

use parking_lot::Mutex;
use rand::Rng;
use tracing::info;

use super::{BusError, Channel, MAX_SAMPLE};

/// Baseline and spread of the simulated noise floor for "mock-noise" buses.
const NOISE_BASELINE: u16 = 12;
const NOISE_SPREAD: u16 = 6;

#[derive(Default)]
struct State {
    /// Scripted values per channel, consumed one per read.
    scripted: HashMap<Channel, VecDeque<u16>>,
    /// The last value returned per channel. Held once the script runs out.
    last: HashMap<Channel, u16>,
    /// The number of upcoming reads that should fail.
    failures: u32,
    /// Total reads served.
    reads: u64,
    /// How many times the bus has been released.
    released: u32,
}

/// A mock bus. Serves scripted values, then holds the last value per channel (or
/// simulated noise if the bus name contains "noise").
pub struct Bus {
    name: String,
    noisy: bool,
    state: Arc<Mutex<State>>,
}

/// A handle for scripting and inspecting a mock bus after it has been handed off.
#[derive(Clone)]
pub struct Control {
    state: Arc<Mutex<State>>,
}

impl Bus {
    /// Gets the given mock bus.
    pub fn get(name: &str) -> Bus {
        info!(bus = name, "Opened mock bus");
        Bus {
            name: name.to_string(),
            noisy: name.contains("noise"),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Returns a control handle sharing this bus's state.
    pub fn control(&self) -> Control {
        Control {
            state: self.state.clone(),
        }
    }

    /// Queues values to be returned by subsequent reads of the channel.
    pub fn push_values(&mut self, channel: Channel, values: &[u16]) {
        self.control().push_values(channel, values);
    }

    /// Makes the next `count` reads fail.
    pub fn fail_next_reads(&mut self, count: u32) {
        self.control().fail_next_reads(count);
    }
}

impl Control {
    /// Queues values to be returned by subsequent reads of the channel.
    pub fn push_values(&self, channel: Channel, values: &[u16]) {
        self.state
            .lock()
            .scripted
            .entry(channel)
            .or_default()
            .extend(values.iter().copied());
    }

    /// Makes the next `count` reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().failures = count;
    }

    /// Returns the number of reads served so far.
    pub fn reads(&self) -> u64 {
        self.state.lock().reads
    }

    /// Returns how many times the bus has been released.
    pub fn released(&self) -> u32 {
        self.state.lock().released
    }
}

impl super::Bus for Bus {
    fn read(&mut self, channel: Channel) -> Result<u16, BusError> {
        let mut state = self.state.lock();
        state.reads += 1;

        if state.failures > 0 {
            state.failures -= 1;
            return Err(BusError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "mock transfer failure",
            )));
        }

        let scripted = state
            .scripted
            .get_mut(&channel)
            .and_then(|values| values.pop_front());
        let value = match scripted {
            Some(value) => value,
            None if self.noisy => {
                let offset = rand::thread_rng().gen_range(0..=NOISE_SPREAD * 2);
                (NOISE_BASELINE + offset).saturating_sub(NOISE_SPREAD).min(MAX_SAMPLE)
            }
            None => state.last.get(&channel).copied().unwrap_or(0),
        };

        state.last.insert(channel, value);
        Ok(value)
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.state.lock().released += 1;
        info!(bus = self.name, "Released mock bus");
    }
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
