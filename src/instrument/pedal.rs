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
use tracing::debug;

use crate::{
    bus::{self, Bus, BusError, Channel},
    config::PedalConfig,
};

/// A hall-effect pedal with two positions.
///
/// Readings below `threshold` are noise and leave the position alone. At or above
/// it, the pedal is closed from `close_threshold` up and open otherwise. The open and
/// close boundary is the same in both directions of travel.
#[derive(Clone, Debug)]
pub struct Pedal {
    name: String,
    channel: Channel,
    threshold: f64,
    close_threshold: f64,
    closed: bool,
}

impl Pedal {
    /// Creates an open pedal.
    pub fn new(name: &str, config: &PedalConfig) -> Pedal {
        Pedal {
            name: name.to_string(),
            channel: config.channel(),
            threshold: config.threshold(),
            close_threshold: config.close_threshold(),
            closed: false,
        }
    }

    /// Reads the pedal's channel and updates its position.
    pub fn process_input(&mut self, bus: &mut dyn Bus, retries: u32) -> Result<(), BusError> {
        let value = bus::read_sample(bus, self.channel, retries)?;
        self.update(value);
        Ok(())
    }

    /// Updates the position from a reading. Returns the position afterwards.
    pub fn update(&mut self, value: u16) -> bool {
        let value = f64::from(value);
        if value < self.threshold {
            return self.closed;
        }

        let closed = value >= self.close_threshold;
        if closed != self.closed {
            debug!(
                pedal = self.name,
                closed,
                value,
                "Pedal changed position"
            );
            self.closed = closed;
        }
        self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }
}

#[cfg(test)]
mod test {
    use crate::bus::mock;

    use super::*;

    fn pedal() -> Pedal {
        Pedal::new(
            "hihat pedal",
            &PedalConfig::new(Channel::new(7).unwrap(), 30.0, 800.0),
        )
    }

    #[test]
    fn test_bands() {
        let mut pedal = pedal();
        assert!(!pedal.is_closed());

        assert!(pedal.update(800));
        assert!(pedal.update(1023));
        assert!(!pedal.update(799));
        assert!(!pedal.update(30));
        assert!(pedal.update(900));
    }

    #[test]
    fn test_deadband_holds_position() {
        let mut pedal = pedal();
        pedal.update(950);
        for value in [29, 0, 15, 5] {
            assert!(pedal.update(value));
        }

        pedal.update(400);
        for value in [29, 0, 15, 5] {
            assert!(!pedal.update(value));
        }
    }

    #[test]
    fn test_sweep_both_directions() {
        let mut pedal = pedal();
        let up: Vec<bool> = (0..=1023).step_by(11).map(|v| pedal.update(v)).collect();
        let down: Vec<bool> = (0..=1023)
            .rev()
            .step_by(11)
            .map(|v| pedal.update(v))
            .collect();

        for (value, closed) in (0..=1023u16).step_by(11).zip(up) {
            assert_eq!(value >= 800, closed, "rising through {}", value);
        }
        for (value, closed) in (0..=1023u16).rev().step_by(11).zip(down) {
            // Below the threshold the last position in range, which was open, holds.
            assert_eq!(value >= 800, closed, "falling through {}", value);
        }
    }

    #[test]
    fn test_process_input() {
        let mut bus = mock::Bus::get("mock-bus");
        let channel = Channel::new(7).unwrap();
        bus.push_values(channel, &[850, 10, 500]);

        let mut pedal = pedal();
        pedal.process_input(&mut bus, 0).unwrap();
        assert!(pedal.is_closed());
        pedal.process_input(&mut bus, 0).unwrap();
        assert!(pedal.is_closed());
        pedal.process_input(&mut bus, 0).unwrap();
        assert!(!pedal.is_closed());
    }
}
