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
use std::{fmt, path::Path, path::PathBuf, time::Duration};

use crate::bus::Channel;

use super::{ConfigError, Section};

/// The default strike threshold.
pub const DEFAULT_THRESHOLD: f64 = 30.0;

/// The default debounce window in seconds.
pub const DEFAULT_MIN_INTERVAL: f64 = 0.075;

/// The default volume scale.
pub const DEFAULT_AMPLIFY: f64 = 1.0;

/// The default pedal reading at or above which the hi-hat is closed.
pub const DEFAULT_PEDAL_CLOSE_THRESHOLD: f64 = 800.0;

/// The default pedal reading below which pedal readings are ignored.
pub const DEFAULT_PEDAL_THRESHOLD: f64 = 30.0;

/// The pieces a kit can have, in the order they are processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Piece {
    Crash,
    Tom1,
    Ride,
    Hihat,
    Snare,
    FloorTom,
    BaseDrum,
}

impl Piece {
    /// Every piece in processing order.
    pub const ALL: [Piece; 7] = [
        Piece::Crash,
        Piece::Tom1,
        Piece::Ride,
        Piece::Hihat,
        Piece::Snare,
        Piece::FloorTom,
        Piece::BaseDrum,
    ];

    /// The config section name of the piece.
    pub fn name(&self) -> &'static str {
        match self {
            Piece::Crash => "crash",
            Piece::Tom1 => "tom1",
            Piece::Ride => "ride",
            Piece::Hihat => "hihat",
            Piece::Snare => "snare",
            Piece::FloorTom => "floor_tom",
            Piece::BaseDrum => "base_drum",
        }
    }

    /// Looks up a piece by its section name.
    pub fn from_name(name: &str) -> Option<Piece> {
        Piece::ALL.into_iter().find(|piece| piece.name() == name)
    }

    /// The fields accepted in this piece's section.
    pub fn fields(&self) -> &'static [Field] {
        match self {
            Piece::Hihat => HIHAT_FIELDS,
            _ => DRUM_FIELDS,
        }
    }
}

impl fmt::Display for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A field of a config section.
#[derive(Debug, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub required: bool,
}

const fn required(name: &'static str) -> Field {
    Field {
        name,
        required: true,
    }
}

pub(super) const fn optional(name: &'static str) -> Field {
    Field {
        name,
        required: false,
    }
}

const CHANNEL: Field = required("channel");
const SOUND: Field = optional("sound");
const THRESHOLD: Field = optional("threshold");
const MIN_INTERVAL: Field = optional("min_interval");
const AMPLIFY: Field = optional("amplify");
const PEDAL_CHANNEL: Field = required("pedal_channel");
const OPEN_SOUND: Field = optional("open_sound");
const CLOSE_SOUND: Field = optional("close_sound");
const PEDAL_CLOSE_THRESHOLD: Field = optional("pedal_close_threshold");
const PEDAL_THRESHOLD: Field = optional("pedal_threshold");

const DRUM_FIELDS: &[Field] = &[CHANNEL, SOUND, THRESHOLD, MIN_INTERVAL, AMPLIFY];

const HIHAT_FIELDS: &[Field] = &[
    CHANNEL,
    THRESHOLD,
    MIN_INTERVAL,
    AMPLIFY,
    PEDAL_CHANNEL,
    OPEN_SOUND,
    CLOSE_SOUND,
    PEDAL_CLOSE_THRESHOLD,
    PEDAL_THRESHOLD,
];

/// The pedal that conditions a hi-hat.
#[derive(Clone, Debug, PartialEq)]
pub struct PedalConfig {
    channel: Channel,
    threshold: f64,
    close_threshold: f64,
}

impl PedalConfig {
    pub fn new(channel: Channel, threshold: f64, close_threshold: f64) -> PedalConfig {
        PedalConfig {
            channel,
            threshold,
            close_threshold,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn close_threshold(&self) -> f64 {
        self.close_threshold
    }
}

/// The sounds an instrument plays.
#[derive(Clone, Debug, PartialEq)]
pub enum Sounds {
    /// One sound, or none for a silent trigger.
    Single(Option<PathBuf>),
    /// A sound for each pedal position.
    Pedal {
        open: Option<PathBuf>,
        closed: Option<PathBuf>,
        pedal: PedalConfig,
    },
}

/// A validated instrument section.
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentConfig {
    piece: Piece,
    channel: Channel,
    threshold: f64,
    min_interval: Duration,
    amplify: f64,
    sounds: Sounds,
}

impl InstrumentConfig {
    /// Creates an instrument config. Values are expected to be valid already.
    pub fn new(
        piece: Piece,
        channel: Channel,
        threshold: f64,
        min_interval: Duration,
        amplify: f64,
        sounds: Sounds,
    ) -> InstrumentConfig {
        InstrumentConfig {
            piece,
            channel,
            threshold,
            min_interval,
            amplify,
            sounds,
        }
    }

    /// Reads and validates an instrument from its section.
    pub(crate) fn from_section(
        piece: Piece,
        section: &Section,
        base: &Path,
    ) -> Result<InstrumentConfig, ConfigError> {
        section.check_fields(piece.fields());

        let channel = section
            .channel(&CHANNEL)?
            .ok_or_else(|| missing(section, &CHANNEL))?;
        let threshold = section.non_negative(&THRESHOLD, DEFAULT_THRESHOLD)?;
        let min_interval = section.duration(
            &MIN_INTERVAL,
            section.non_negative(&MIN_INTERVAL, DEFAULT_MIN_INTERVAL)?,
        )?;
        let amplify = section.positive(&AMPLIFY, DEFAULT_AMPLIFY)?;

        let sounds = match piece {
            Piece::Hihat => {
                let pedal_channel = section
                    .channel(&PEDAL_CHANNEL)?
                    .ok_or_else(|| missing(section, &PEDAL_CHANNEL))?;
                let pedal_threshold =
                    section.non_negative(&PEDAL_THRESHOLD, DEFAULT_PEDAL_THRESHOLD)?;
                let close_threshold =
                    section.non_negative(&PEDAL_CLOSE_THRESHOLD, DEFAULT_PEDAL_CLOSE_THRESHOLD)?;
                if close_threshold < pedal_threshold {
                    return Err(ConfigError::InvalidField {
                        section: section.name().to_string(),
                        field: PEDAL_CLOSE_THRESHOLD.name.to_string(),
                        reason: format!(
                            "{} is below pedal_threshold {}",
                            close_threshold, pedal_threshold
                        ),
                    });
                }
                Sounds::Pedal {
                    open: section.path(&OPEN_SOUND, base)?,
                    closed: section.path(&CLOSE_SOUND, base)?,
                    pedal: PedalConfig::new(pedal_channel, pedal_threshold, close_threshold),
                }
            }
            _ => Sounds::Single(section.path(&SOUND, base)?),
        };

        Ok(InstrumentConfig {
            piece,
            channel,
            threshold,
            min_interval,
            amplify,
            sounds,
        })
    }

    pub fn piece(&self) -> Piece {
        self.piece
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// The strike threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The debounce window.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// The volume scale factor.
    pub fn amplify(&self) -> f64 {
        self.amplify
    }

    pub fn sounds(&self) -> &Sounds {
        &self.sounds
    }

    /// The sound files this instrument uses.
    pub fn sound_files(&self) -> Vec<&Path> {
        match &self.sounds {
            Sounds::Single(sound) => sound.iter().map(PathBuf::as_path).collect(),
            Sounds::Pedal { open, closed, .. } => open
                .iter()
                .chain(closed.iter())
                .map(PathBuf::as_path)
                .collect(),
        }
    }
}

fn missing(section: &Section, field: &Field) -> ConfigError {
    ConfigError::MissingField {
        section: section.name().to_string(),
        field: field.name,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_piece_order() {
        let names: Vec<&str> = Piece::ALL.iter().map(Piece::name).collect();
        assert_eq!(
            vec!["crash", "tom1", "ride", "hihat", "snare", "floor_tom", "base_drum"],
            names
        );
        assert_eq!(Some(Piece::FloorTom), Piece::from_name("floor_tom"));
        assert_eq!(None, Piece::from_name("cowbell"));
    }

    #[test]
    fn test_field_tables() {
        assert!(Piece::Snare.fields().contains(&SOUND));
        assert!(!Piece::Snare.fields().contains(&PEDAL_CHANNEL));
        assert!(Piece::Hihat.fields().contains(&PEDAL_CHANNEL));
        assert!(!Piece::Hihat.fields().contains(&SOUND));
        for piece in Piece::ALL {
            assert!(piece.fields().iter().any(|f| f.name == "channel" && f.required));
        }
    }
}
