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

//! Debounced playback.
//!
//! Every strike goes through the dispatcher, which enforces the instrument's minimum
//! interval between playbacks and hands the sound to the audio engine. Nothing here
//! can fail: a suppressed or starved strike is simply not heard.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, trace};

use crate::{
    audio::{Engine, PlaybackToken, SoundHandle},
    bus::MAX_SAMPLE,
};

/// Converts a peak value to a playback volume in [0, 1].
pub fn volume(amplify: f64, value: u16) -> f32 {
    (amplify * f64::from(value) / f64::from(MAX_SAMPLE + 1)).clamp(0.0, 1.0) as f32
}

/// Suppresses retriggers within a minimum interval of the last playback.
#[derive(Clone, Debug)]
pub struct Debounce {
    min_interval: Duration,
    last_trigger: Option<Instant>,
}

impl Debounce {
    pub fn new(min_interval: Duration) -> Debounce {
        Debounce {
            min_interval,
            last_trigger: None,
        }
    }

    /// Returns true if a trigger at `now` would pass the gate.
    pub fn is_open(&self, now: Instant) -> bool {
        match self.last_trigger {
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
            None => true,
        }
    }

    /// Records a trigger at `now`.
    pub fn record(&mut self, now: Instant) {
        self.last_trigger = Some(now);
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_trigger(&self) -> Option<Instant> {
        self.last_trigger
    }
}

/// What happened to a strike.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Dispatch {
    /// The sound started playing.
    Played(PlaybackToken),
    /// The strike came too soon after the last playback.
    Debounced,
    /// Every playback channel was busy.
    Starved,
    /// The strike passed the gate but the instrument has no sound for it.
    Silent,
}

/// Hands debounced strikes to the audio engine.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<dyn Engine>,
}

impl Dispatcher {
    pub fn new(engine: Arc<dyn Engine>) -> Dispatcher {
        Dispatcher { engine }
    }

    /// Plays `sound` at `volume` unless the debounce gate is closed. The trigger time
    /// is only recorded when the strike gets through.
    pub fn play(
        &self,
        name: &str,
        debounce: &mut Debounce,
        sound: Option<SoundHandle>,
        volume: f32,
        now: Instant,
    ) -> Dispatch {
        if !debounce.is_open(now) {
            trace!(instrument = name, "Strike debounced");
            return Dispatch::Debounced;
        }

        let Some(sound) = sound else {
            debounce.record(now);
            trace!(instrument = name, volume, "Strike has no sound");
            return Dispatch::Silent;
        };

        match self.engine.play(sound) {
            Some(token) => {
                self.engine.set_volume(token, volume);
                debounce.record(now);
                debug!(
                    instrument = name,
                    volume,
                    channel = token.channel(),
                    "Playing"
                );
                Dispatch::Played(token)
            }
            None => {
                debug!(instrument = name, "No free playback channel, dropping strike");
                Dispatch::Starved
            }
        }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }
}
