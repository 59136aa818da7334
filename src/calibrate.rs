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

//! Noise calibration.
//!
//! While a session is active an instrument records every raw reading instead of
//! looking for strikes. Finishing the session turns the recording into a noise
//! profile whose threshold sits `z` standard deviations above the mean noise level.

use std::{
    fmt,
    time::{Duration, Instant},
};

/// The default z-score. Puts the threshold at the one-sided 99th percentile of
/// normally distributed noise.
pub const DEFAULT_Z: f64 = 2.33;

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("calibration of {0} is degenerate: {1}")]
    Degenerate(String, &'static str),

    #[error("{0} is already being calibrated")]
    AlreadyActive(String),

    #[error("{0} is not being calibrated")]
    NotActive(String),
}

/// The noise measured on one channel.
#[derive(Clone, Debug, PartialEq)]
pub struct NoiseProfile {
    pub samples: usize,
    pub mean: f64,
    pub stdev: f64,
    pub max: u16,
    pub threshold: f64,
}

impl NoiseProfile {
    /// Profiles a noise recording. Fails if it is empty or perfectly flat, since
    /// neither says anything about where noise ends.
    pub fn from_samples(name: &str, samples: &[u16], z: f64) -> Result<NoiseProfile, CalibrationError> {
        if samples.is_empty() {
            return Err(CalibrationError::Degenerate(name.to_string(), "no samples"));
        }

        let count = samples.len() as f64;
        let mean = samples.iter().map(|v| f64::from(*v)).sum::<f64>() / count;
        let variance = samples
            .iter()
            .map(|v| (f64::from(*v) - mean).powi(2))
            .sum::<f64>()
            / count;
        if variance == 0.0 {
            return Err(CalibrationError::Degenerate(
                name.to_string(),
                "zero variance",
            ));
        }
        let stdev = variance.sqrt();

        Ok(NoiseProfile {
            samples: samples.len(),
            mean,
            stdev,
            max: samples.iter().copied().max().unwrap_or(0),
            threshold: mean + z * stdev,
        })
    }
}

impl fmt::Display for NoiseProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mean={:.2} stdev={:.2} max={} threshold={:.2} ({} samples)",
            self.mean, self.stdev, self.max, self.threshold, self.samples
        )
    }
}

/// One instrument's noise recording.
#[derive(Debug)]
pub struct CalibrationSession {
    started: Instant,
    duration: Duration,
    samples: Vec<u16>,
}

impl CalibrationSession {
    /// Starts a session lasting `duration` from `now`.
    pub fn start(duration: Duration, now: Instant) -> CalibrationSession {
        CalibrationSession {
            started: now,
            duration,
            samples: Vec::new(),
        }
    }

    pub fn record(&mut self, value: u16) {
        self.samples.push(value);
    }

    /// Returns true once the window has elapsed.
    pub fn is_complete(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.duration
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// Ends the session, discarding the recording.
    pub fn finish(self, name: &str, z: f64) -> Result<NoiseProfile, CalibrationError> {
        NoiseProfile::from_samples(name, &self.samples, z)
    }
}
