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
use std::{collections::HashMap, path::Path, time::Duration};

use config::{Config, Map, Value};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{audio::DEFAULT_PLAYBACK_CHANNELS, bus::Channel};

use super::{
    instrument::{optional, Field, InstrumentConfig, Piece, Sounds},
    ConfigError, Section,
};

/// The name of the section holding kit-wide settings.
const KIT_SECTION: &str = "kit";

pub const DEFAULT_BUS: &str = "/dev/spidev0.0";
pub const DEFAULT_AUDIO_DEVICE: &str = "default";
pub const DEFAULT_SAMPLING_RATE: f64 = 250.0;
pub const DEFAULT_GUARD: f64 = 3.0;
pub const DEFAULT_BUS_RETRIES: i64 = 3;
pub const DEFAULT_CALIBRATION_Z: f64 = crate::calibrate::DEFAULT_Z;

const BUS: Field = optional("bus");
const AUDIO_DEVICE: Field = optional("audio_device");
const SAMPLING_RATE: Field = optional("sampling_rate");
const RISE_GUARD: Field = optional("rise_guard");
const FALL_GUARD: Field = optional("fall_guard");
const BUS_RETRIES: Field = optional("bus_retries");
const PLAYBACK_CHANNELS: Field = optional("playback_channels");
const CALIBRATION_Z: Field = optional("calibration_z");

const KIT_FIELDS: &[Field] = &[
    BUS,
    AUDIO_DEVICE,
    SAMPLING_RATE,
    RISE_GUARD,
    FALL_GUARD,
    BUS_RETRIES,
    PLAYBACK_CHANNELS,
    CALIBRATION_Z,
];

/// The file as read, before validation.
#[derive(Deserialize)]
struct RawFile {
    /// Kit-wide settings.
    #[serde(default)]
    kit: Map<String, Value>,

    /// Every other section. Only instrument sections are used.
    #[serde(flatten)]
    sections: Map<String, Value>,
}

/// A validated kit configuration.
#[derive(Clone, Debug)]
pub struct KitConfig {
    /// The bus device, or a name starting with "mock".
    bus: String,
    /// The audio output device.
    audio_device: String,
    /// The target sampling rate in Hz.
    sampling_rate: f64,
    /// The time between two ticks at the sampling rate.
    period: Duration,
    /// The rise a peak needs before its fall, in ADC units.
    rise_guard: f64,
    /// The fall that confirms a peak, in ADC units.
    fall_guard: f64,
    /// Extra attempts for a failing read within one tick.
    bus_retries: u32,
    /// How many sounds can play at once.
    playback_channels: usize,
    /// The z-score used to derive calibrated thresholds.
    calibration_z: f64,
    /// Instruments in processing order.
    instruments: Vec<InstrumentConfig>,
}

impl KitConfig {
    /// Validates a loaded config. Relative sound paths are resolved against `base`.
    pub fn from_config(config: Config, base: &Path) -> Result<KitConfig, ConfigError> {
        let raw = config.try_deserialize::<RawFile>()?;

        let mut sections: HashMap<Piece, Map<String, Value>> = HashMap::new();
        for (name, value) in raw.sections {
            let Some(piece) = Piece::from_name(&name) else {
                debug!(section = name, "Ignoring unknown section");
                continue;
            };
            let table = value.into_table().map_err(|e| ConfigError::InvalidField {
                section: name.clone(),
                field: name.clone(),
                reason: e.to_string(),
            })?;
            sections.insert(piece, table);
        }

        let kit = Section::new(KIT_SECTION, &raw.kit);
        kit.check_fields(KIT_FIELDS);

        let bus_retries = kit.int(&BUS_RETRIES)?.unwrap_or(DEFAULT_BUS_RETRIES);
        let bus_retries = u32::try_from(bus_retries).map_err(|_| ConfigError::InvalidField {
            section: KIT_SECTION.to_string(),
            field: BUS_RETRIES.name.to_string(),
            reason: format!("{} must not be negative", bus_retries),
        })?;
        let playback_channels = kit
            .int(&PLAYBACK_CHANNELS)?
            .unwrap_or(DEFAULT_PLAYBACK_CHANNELS as i64);
        let playback_channels = usize::try_from(playback_channels)
            .ok()
            .filter(|channels| *channels > 0)
            .ok_or_else(|| ConfigError::InvalidField {
                section: KIT_SECTION.to_string(),
                field: PLAYBACK_CHANNELS.name.to_string(),
                reason: format!("{} must be positive", playback_channels),
            })?;

        let sampling_rate = kit.positive(&SAMPLING_RATE, DEFAULT_SAMPLING_RATE)?;
        let period = kit.duration(&SAMPLING_RATE, 1.0 / sampling_rate)?;
        if period.is_zero() {
            return Err(ConfigError::InvalidField {
                section: KIT_SECTION.to_string(),
                field: SAMPLING_RATE.name.to_string(),
                reason: format!("{} Hz is faster than the clock can resolve", sampling_rate),
            });
        }

        let mut instruments = Vec::new();
        for piece in Piece::ALL {
            if let Some(values) = sections.get(&piece) {
                let section = Section::new(piece.name(), values);
                instruments.push(InstrumentConfig::from_section(piece, &section, base)?);
            }
        }
        if instruments.is_empty() {
            return Err(ConfigError::NoInstruments);
        }
        warn_shared_channels(&instruments);

        Ok(KitConfig {
            bus: kit.string(&BUS)?.unwrap_or_else(|| DEFAULT_BUS.to_string()),
            audio_device: kit
                .string(&AUDIO_DEVICE)?
                .unwrap_or_else(|| DEFAULT_AUDIO_DEVICE.to_string()),
            sampling_rate,
            period,
            rise_guard: kit.non_negative(&RISE_GUARD, DEFAULT_GUARD)?,
            fall_guard: kit.non_negative(&FALL_GUARD, DEFAULT_GUARD)?,
            bus_retries,
            playback_channels,
            calibration_z: kit.positive(&CALIBRATION_Z, DEFAULT_CALIBRATION_Z)?,
            instruments,
        })
    }

    /// Returns the bus device.
    pub fn bus(&self) -> &str {
        &self.bus
    }

    /// Returns the audio output device.
    pub fn audio_device(&self) -> &str {
        &self.audio_device
    }

    /// Returns the target sampling rate in Hz.
    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    /// Returns the sampling period.
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn rise_guard(&self) -> f64 {
        self.rise_guard
    }

    pub fn fall_guard(&self) -> f64 {
        self.fall_guard
    }

    pub fn bus_retries(&self) -> u32 {
        self.bus_retries
    }

    pub fn playback_channels(&self) -> usize {
        self.playback_channels
    }

    pub fn calibration_z(&self) -> f64 {
        self.calibration_z
    }

    /// Returns the instruments in processing order.
    pub fn instruments(&self) -> &[InstrumentConfig] {
        &self.instruments
    }

    /// Finds an instrument by its piece.
    pub fn instrument(&self, piece: Piece) -> Option<&InstrumentConfig> {
        self.instruments.iter().find(|i| i.piece() == piece)
    }
}

/// Two sensors on one channel is almost always a mistake, but it isn't fatal.
fn warn_shared_channels(instruments: &[InstrumentConfig]) {
    let mut owners: HashMap<Channel, String> = HashMap::new();
    for instrument in instruments {
        let mut claims = vec![(instrument.channel(), instrument.piece().to_string())];
        if let Sounds::Pedal { pedal, .. } = instrument.sounds() {
            claims.push((pedal.channel(), format!("{} pedal", instrument.piece())));
        }
        for (channel, owner) in claims {
            if let Some(existing) = owners.get(&channel) {
                warn!(
                    channel = channel.index(),
                    first = existing,
                    second = owner,
                    "Channel is used more than once"
                );
            } else {
                owners.insert(channel, owner);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, path::PathBuf, time::Duration};

    use config::{File, FileFormat};

    use super::*;

    fn parse(yaml: &str) -> Result<KitConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        KitConfig::from_config(config, Path::new("/kits/rock"))
    }

    #[test]
    fn test_defaults() -> Result<(), Box<dyn Error>> {
        let kit = parse(
            r#"
            snare:
              channel: 4
              sound: snare.ogg
            "#,
        )?;

        assert_eq!(DEFAULT_BUS, kit.bus());
        assert_eq!(DEFAULT_AUDIO_DEVICE, kit.audio_device());
        assert_eq!(250.0, kit.sampling_rate());
        assert_eq!(Duration::from_millis(4), kit.period());
        assert_eq!(3.0, kit.rise_guard());
        assert_eq!(3.0, kit.fall_guard());
        assert_eq!(3, kit.bus_retries());
        assert_eq!(8, kit.playback_channels());
        assert_eq!(2.33, kit.calibration_z());

        let snare = kit.instrument(Piece::Snare).ok_or("no snare")?;
        assert_eq!(4, snare.channel().index());
        assert_eq!(30.0, snare.threshold());
        assert_eq!(Duration::from_millis(75), snare.min_interval());
        assert_eq!(1.0, snare.amplify());
        assert_eq!(
            &Sounds::Single(Some(PathBuf::from("/kits/rock/snare.ogg"))),
            snare.sounds()
        );
        Ok(())
    }

    #[test]
    fn test_instrument_order_and_unknown_sections() -> Result<(), Box<dyn Error>> {
        let kit = parse(
            r#"
            base_drum:
              channel: 6
              sound: /samples/kick.wav
            cowbell:
              channel: 7
            crash:
              channel: 0
              sound: crash.wav
              threshold: 100
              min_interval: 0.2
              amplify: 2.5
            hihat:
              channel: 3
              pedal_channel: 7
              open_sound: open.wav
              close_sound: closed.wav
              pedal_close_threshold: 700
            kit:
              bus: mock-bus
              audio_device: mock-audio
              sampling_rate: 500
              rise_guard: 2
              playback_channels: 16
            "#,
        )?;

        let pieces: Vec<Piece> = kit.instruments().iter().map(|i| i.piece()).collect();
        assert_eq!(vec![Piece::Crash, Piece::Hihat, Piece::BaseDrum], pieces);
        assert_eq!("mock-bus", kit.bus());
        assert_eq!(500.0, kit.sampling_rate());
        assert_eq!(2.0, kit.rise_guard());
        assert_eq!(3.0, kit.fall_guard());
        assert_eq!(16, kit.playback_channels());

        let crash = kit.instrument(Piece::Crash).ok_or("no crash")?;
        assert_eq!(100.0, crash.threshold());
        assert_eq!(Duration::from_millis(200), crash.min_interval());
        assert_eq!(2.5, crash.amplify());

        let base_drum = kit.instrument(Piece::BaseDrum).ok_or("no base drum")?;
        assert_eq!(vec![Path::new("/samples/kick.wav")], base_drum.sound_files());

        let hihat = kit.instrument(Piece::Hihat).ok_or("no hihat")?;
        match hihat.sounds() {
            Sounds::Pedal {
                open,
                closed,
                pedal,
            } => {
                assert_eq!(&Some(PathBuf::from("/kits/rock/open.wav")), open);
                assert_eq!(&Some(PathBuf::from("/kits/rock/closed.wav")), closed);
                assert_eq!(7, pedal.channel().index());
                assert_eq!(30.0, pedal.threshold());
                assert_eq!(700.0, pedal.close_threshold());
            }
            other => return Err(format!("unexpected sounds {:?}", other).into()),
        }
        Ok(())
    }

    #[test]
    fn test_missing_fields() {
        assert!(matches!(
            parse("tom1:\n  sound: tom.wav\n"),
            Err(ConfigError::MissingField { field: "channel", .. })
        ));
        assert!(matches!(
            parse("hihat:\n  channel: 3\n"),
            Err(ConfigError::MissingField {
                field: "pedal_channel",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_fields() {
        let cases = [
            ("snare:\n  channel: 8\n", "channel"),
            ("snare:\n  channel: -1\n", "channel"),
            ("snare:\n  channel: two\n", "channel"),
            ("snare:\n  channel: 1\n  threshold: -1\n", "threshold"),
            ("snare:\n  channel: 1\n  min_interval: -0.5\n", "min_interval"),
            ("snare:\n  channel: 1\n  amplify: 0\n", "amplify"),
            ("snare:\n  channel: 1\n  min_interval: 1e20\n", "min_interval"),
            ("snare:\n  channel: 1\nkit:\n  sampling_rate: 0\n", "sampling_rate"),
            ("snare:\n  channel: 1\nkit:\n  sampling_rate: 1e-30\n", "sampling_rate"),
            ("snare:\n  channel: 1\nkit:\n  sampling_rate: 1e300\n", "sampling_rate"),
            ("snare:\n  channel: 1\nkit:\n  bus_retries: -1\n", "bus_retries"),
            (
                "hihat:\n  channel: 1\n  pedal_channel: 2\n  pedal_close_threshold: 10\n",
                "pedal_close_threshold",
            ),
        ];
        for (yaml, expected) in cases {
            match parse(yaml) {
                Err(ConfigError::InvalidField { field, .. }) => assert_eq!(expected, field),
                other => panic!("expected invalid {} for {:?}, got {:?}", expected, yaml, other),
            }
        }
    }

    #[test]
    fn test_no_instruments() {
        assert!(matches!(
            parse("kit:\n  bus: mock\n"),
            Err(ConfigError::NoInstruments)
        ));
    }
}
