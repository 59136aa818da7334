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

//! Instruments: one trigger sensor and the sounds it plays.
//!
//! Every instrument detects strikes the same way. What differs is which sound a
//! strike plays, so that is a voicing chosen when the kit is assembled rather than a
//! different kind of instrument.

use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::{
    audio::SoundHandle,
    bus::{self, Bus, BusError, Channel},
    calibrate::{CalibrationError, CalibrationSession, NoiseProfile},
    config::Piece,
    dispatch::{self, Debounce, Dispatch, Dispatcher},
};

pub mod detector;
pub mod pedal;

use detector::PeakDetector;
use pedal::Pedal;

/// How an instrument picks the sound for a strike.
#[derive(Clone, Debug, PartialEq)]
pub enum Voicing {
    /// Always the same sound. None makes a silent trigger.
    Single(Option<SoundHandle>),
    /// Chosen by the position of a pedal, given as an index into the kit's pedals.
    Pedal {
        open: Option<SoundHandle>,
        closed: Option<SoundHandle>,
        pedal: usize,
    },
}

impl Voicing {
    /// The sound to play given the kit's pedals.
    pub fn select(&self, pedals: &[Pedal]) -> Option<SoundHandle> {
        match self {
            Voicing::Single(sound) => *sound,
            Voicing::Pedal {
                open,
                closed,
                pedal,
            } => {
                if pedals.get(*pedal).is_some_and(Pedal::is_closed) {
                    *closed
                } else {
                    *open
                }
            }
        }
    }
}

/// Everything an instrument needs during one tick.
pub struct Inputs<'a> {
    pub bus: &'a mut dyn Bus,
    pub retries: u32,
    pub pedals: &'a [Pedal],
    pub dispatcher: &'a Dispatcher,
    pub now: Instant,
}

/// A trigger sensor and its sounds.
#[derive(Debug)]
pub struct Instrument {
    piece: Piece,
    channel: Channel,
    amplify: f64,
    detector: PeakDetector,
    debounce: Debounce,
    voicing: Voicing,
    calibration: Option<CalibrationSession>,
}

impl Instrument {
    pub fn new(
        piece: Piece,
        channel: Channel,
        amplify: f64,
        detector: PeakDetector,
        min_interval: Duration,
        voicing: Voicing,
    ) -> Instrument {
        Instrument {
            piece,
            channel,
            amplify,
            detector,
            debounce: Debounce::new(min_interval),
            voicing,
            calibration: None,
        }
    }

    /// Reads the channel and plays a sound if the reading confirms a strike. While
    /// calibrating, the reading is recorded instead and nothing plays.
    pub fn process_input(&mut self, inputs: &mut Inputs) -> Result<Option<Dispatch>, BusError> {
        let value = bus::read_sample(inputs.bus, self.channel, inputs.retries)?;

        if let Some(session) = self.calibration.as_mut() {
            session.record(value);
            self.detector.settle(value);
            return Ok(None);
        }

        if !self.detector.update(value) {
            return Ok(None);
        }

        let volume = dispatch::volume(self.amplify, value);
        trace!(instrument = self.name(), value, volume, "Strike");
        let sound = self.voicing.select(inputs.pedals);
        Ok(Some(inputs.dispatcher.play(
            self.name(),
            &mut self.debounce,
            sound,
            volume,
            inputs.now,
        )))
    }

    /// Starts recording noise for `duration`.
    pub fn start_calibration(&mut self, duration: Duration, now: Instant) -> Result<(), CalibrationError> {
        if self.calibration.is_some() {
            return Err(CalibrationError::AlreadyActive(self.name().to_string()));
        }
        self.calibration = Some(CalibrationSession::start(duration, now));
        Ok(())
    }

    /// Returns true if a calibration session is active and its window has elapsed.
    pub fn calibration_complete(&self, now: Instant) -> bool {
        self.calibration
            .as_ref()
            .is_some_and(|session| session.is_complete(now))
    }

    /// Drops any calibration session, keeping the current threshold.
    pub fn cancel_calibration(&mut self) {
        if self.calibration.take().is_some() {
            debug!(instrument = self.name(), "Calibration discarded");
        }
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    /// Ends the calibration session and adopts the calibrated threshold.
    pub fn finish_calibration(&mut self, z: f64) -> Result<NoiseProfile, CalibrationError> {
        let session = self
            .calibration
            .take()
            .ok_or_else(|| CalibrationError::NotActive(self.name().to_string()))?;
        let profile = session.finish(self.name(), z)?;

        info!(
            instrument = self.name(),
            old_threshold = self.detector.threshold(),
            threshold = profile.threshold,
            "Calibrated"
        );
        self.detector.set_threshold(profile.threshold);
        Ok(profile)
    }

    pub fn name(&self) -> &'static str {
        self.piece.name()
    }

    pub fn piece(&self) -> Piece {
        self.piece
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn threshold(&self) -> f64 {
        self.detector.threshold()
    }

    pub fn detector(&self) -> &PeakDetector {
        &self.detector
    }

    pub fn voicing(&self) -> &Voicing {
        &self.voicing
    }
}
