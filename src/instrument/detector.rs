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

//! A three-sample peak detector.
//!
//! A strike is the local maximum of a sensor's waveform: a sharp rise followed by a
//! sharp fall, recognized on the first falling sample while still above threshold.
//! Only the previous value and the previous change are kept, so detection lags the
//! actual peak by exactly one tick.

/// Detects peaks in a stream of channel readings.
#[derive(Clone, Debug)]
pub struct PeakDetector {
    threshold: f64,
    rise_guard: f64,
    fall_guard: f64,
    last_value: i32,
    last_change: i32,
}

impl PeakDetector {
    pub fn new(threshold: f64, rise_guard: f64, fall_guard: f64) -> PeakDetector {
        PeakDetector {
            threshold,
            rise_guard,
            fall_guard,
            last_value: 0,
            last_change: 0,
        }
    }

    /// Feeds the next reading. Returns true if the reading confirms a strike.
    pub fn update(&mut self, value: u16) -> bool {
        let value = i32::from(value);
        let change = value - self.last_value;

        let strike = f64::from(value) > self.threshold
            && f64::from(self.last_change) > self.rise_guard
            && f64::from(change) < -self.fall_guard;

        self.last_change = change;
        self.last_value = value;
        strike
    }

    /// Takes a reading without looking for a strike. The next reading starts from a
    /// flat slope, so no strike can be confirmed on it.
    pub fn settle(&mut self, value: u16) {
        self.last_value = i32::from(value);
        self.last_change = 0;
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    pub fn last_value(&self) -> i32 {
        self.last_value
    }

    pub fn last_change(&self) -> i32 {
        self.last_change
    }
}
