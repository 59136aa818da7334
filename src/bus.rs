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

//! The shared sensor bus.
//!
//! Every trigger sensor sits behind one channel of a 10-bit ADC, and all channels
//! are read sequentially over a single bus. The bus is owned by the kit and handed
//! down explicitly to whatever needs to read from it.

use std::{fmt, io};

use tracing::{debug, warn};

pub mod mcp3008;
pub mod mock;

/// The number of channels on the ADC.
pub const CHANNEL_COUNT: u8 = 8;

/// The largest value a 10-bit ADC can report.
pub const MAX_SAMPLE: u16 = 1023;

/// Errors raised while talking to the bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("invalid channel {0}, must be in [0, {max}]", max = CHANNEL_COUNT - 1)]
    InvalidChannel(u8),

    #[error("reading channel {channel} failed after {attempts} attempt(s): {reason}")]
    ReadFailure {
        channel: Channel,
        attempts: u32,
        reason: String,
    },

    #[error("channel {channel} returned {value}, outside of [0, {max}]", max = MAX_SAMPLE)]
    OutOfRange { channel: Channel, value: u16 },

    #[error("bus {0} is not supported by this build")]
    Unsupported(String),

    #[error("bus I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A validated ADC channel index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(u8);

impl Channel {
    /// Creates a channel, rejecting anything the ADC doesn't have.
    pub fn new(index: u8) -> Result<Channel, BusError> {
        if index >= CHANNEL_COUNT {
            return Err(BusError::InvalidChannel(index));
        }
        Ok(Channel(index))
    }

    /// Returns the raw channel index.
    pub fn index(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Channel {
    type Error = BusError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match u8::try_from(value) {
            Ok(index) => Channel::new(index),
            Err(_) => Err(BusError::InvalidChannel(u8::MAX)),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bus that can read the current value of a single channel.
///
/// Implementations hold the underlying hardware handle and must release it when
/// dropped.
pub trait Bus: fmt::Display + Send {
    /// Reads the current value of the given channel.
    fn read(&mut self, channel: Channel) -> Result<u16, BusError>;
}

/// Opens the bus with the given name. Names starting with "mock" produce a mock bus,
/// anything else is treated as a spidev device path.
pub fn open(name: &str) -> Result<Box<dyn Bus>, BusError> {
    if name.starts_with("mock") {
        return Ok(Box::new(mock::Bus::get(name)));
    }

    open_spi(name)
}

#[cfg(feature = "spi")]
fn open_spi(name: &str) -> Result<Box<dyn Bus>, BusError> {
    Ok(Box::new(mcp3008::SpiBus::open(name)?))
}

#[cfg(not(feature = "spi"))]
fn open_spi(name: &str) -> Result<Box<dyn Bus>, BusError> {
    Err(BusError::Unsupported(format!(
        "{} (rebuild with the \"spi\" feature)",
        name
    )))
}

/// Reads a channel, retrying up to `retries` additional times on failure. A value
/// outside of the ADC range is treated the same as a failed read.
pub fn read_sample(bus: &mut dyn Bus, channel: Channel, retries: u32) -> Result<u16, BusError> {
    let attempts = retries.saturating_add(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match bus.read(channel) {
            Ok(value) if value <= MAX_SAMPLE => return Ok(value),
            Ok(value) => {
                last_error = BusError::OutOfRange { channel, value }.to_string();
            }
            Err(BusError::InvalidChannel(index)) => return Err(BusError::InvalidChannel(index)),
            Err(e) => last_error = e.to_string(),
        }

        if attempt < attempts {
            debug!(%channel, attempt, error = last_error, "Retrying bus read");
        }
    }

    warn!(%channel, attempts, error = last_error, "Bus read failed");
    Err(BusError::ReadFailure {
        channel,
        attempts,
        reason: last_error,
    })
}
