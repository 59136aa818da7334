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

//! Kit configuration.
//!
//! A kit is described by one file with an optional `[kit]` section and one section
//! per instrument. Every section is checked against a fixed table of fields and all
//! values are validated before any hardware is touched.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, File, Map, Value};
use tracing::warn;

mod error;
mod instrument;
mod kit;

pub use error::ConfigError;
pub use instrument::{Field, InstrumentConfig, PedalConfig, Piece, Sounds};
pub use kit::KitConfig;

/// Loads and validates a kit configuration. The format is chosen by the file
/// extension (ini, yaml, toml, ...).
pub fn load(path: &Path) -> Result<KitConfig, ConfigError> {
    let config = Config::builder().add_source(File::from(path)).build()?;
    let base = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    KitConfig::from_config(config, &base)
}

/// A raw section of the config file, read through a table of known fields.
pub(crate) struct Section<'a> {
    name: &'a str,
    values: &'a Map<String, Value>,
}

impl<'a> Section<'a> {
    pub(crate) fn new(name: &'a str, values: &'a Map<String, Value>) -> Self {
        Section { name, values }
    }

    /// Warns about fields that aren't in the table. They are ignored.
    pub(crate) fn check_fields(&self, fields: &[Field]) {
        for key in self.values.keys() {
            if !fields.iter().any(|field| field.name == key) {
                warn!(section = self.name, field = key, "Ignoring unknown field");
            }
        }
    }

    fn invalid(&self, field: &str, reason: impl ToString) -> ConfigError {
        ConfigError::InvalidField {
            section: self.name.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    fn value(&self, field: &str) -> Option<Value> {
        self.values.get(field).cloned()
    }

    /// Returns the field, or a MissingField error if the field is required and absent.
    pub(crate) fn require<T>(&self, field: &Field, value: Option<T>) -> Result<Option<T>, ConfigError> {
        match value {
            None if field.required => Err(ConfigError::MissingField {
                section: self.name.to_string(),
                field: field.name,
            }),
            value => Ok(value),
        }
    }

    pub(crate) fn float(&self, field: &Field) -> Result<Option<f64>, ConfigError> {
        let value = match self.value(field.name) {
            Some(value) => {
                let value = value
                    .into_float()
                    .map_err(|e| self.invalid(field.name, e))?;
                if !value.is_finite() {
                    return Err(self.invalid(field.name, "must be a finite number"));
                }
                Some(value)
            }
            None => None,
        };
        self.require(field, value)
    }

    pub(crate) fn int(&self, field: &Field) -> Result<Option<i64>, ConfigError> {
        let value = match self.value(field.name) {
            Some(value) => Some(value.into_int().map_err(|e| self.invalid(field.name, e))?),
            None => None,
        };
        self.require(field, value)
    }

    pub(crate) fn string(&self, field: &Field) -> Result<Option<String>, ConfigError> {
        let value = match self.value(field.name) {
            Some(value) => {
                let value = value
                    .into_string()
                    .map_err(|e| self.invalid(field.name, e))?;
                if value.trim().is_empty() {
                    None
                } else {
                    Some(value.trim().to_string())
                }
            }
            None => None,
        };
        self.require(field, value)
    }

    /// Reads a path, resolving relative paths against `base`.
    pub(crate) fn path(&self, field: &Field, base: &Path) -> Result<Option<PathBuf>, ConfigError> {
        Ok(self.string(field)?.map(|value| {
            let path = PathBuf::from(value);
            if path.is_relative() {
                base.join(path)
            } else {
                path
            }
        }))
    }

    pub(crate) fn channel(&self, field: &Field) -> Result<Option<crate::bus::Channel>, ConfigError> {
        match self.int(field)? {
            Some(index) => crate::bus::Channel::try_from(index)
                .map(Some)
                .map_err(|_| {
                    self.invalid(
                        field.name,
                        format!(
                            "{} is outside of [0, {}]",
                            index,
                            crate::bus::CHANNEL_COUNT - 1
                        ),
                    )
                }),
            None => Ok(None),
        }
    }

    /// Reads a non-negative number, falling back to the default.
    pub(crate) fn non_negative(&self, field: &Field, default: f64) -> Result<f64, ConfigError> {
        let value = self.float(field)?.unwrap_or(default);
        if value < 0.0 {
            return Err(self.invalid(field.name, format!("{} must not be negative", value)));
        }
        Ok(value)
    }

    /// Reads a strictly positive number, falling back to the default.
    pub(crate) fn positive(&self, field: &Field, default: f64) -> Result<f64, ConfigError> {
        let value = self.float(field)?.unwrap_or(default);
        if value <= 0.0 {
            return Err(self.invalid(field.name, format!("{} must be positive", value)));
        }
        Ok(value)
    }

    /// Converts a number of seconds read from `field` into a duration.
    pub(crate) fn duration(&self, field: &Field, seconds: f64) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(seconds)
            .map_err(|e| self.invalid(field.name, format!("{} s: {}", seconds, e)))
    }

    pub(crate) fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs};

    use super::*;

    #[test]
    fn test_load_ini() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("drums.ini");
        fs::write(
            &path,
            "[kit]\n\
             bus = mock-bus\n\
             sampling_rate = 1000\n\
             \n\
             [snare]\n\
             channel = 4\n\
             sound = sounds/snare.ogg\n\
             threshold = 45.5\n\
             \n\
             [hihat]\n\
             channel = 3\n\
             pedal_channel = 7\n\
             close_sound = hh_closed.wav\n",
        )?;

        let kit = load(&path)?;
        assert_eq!("mock-bus", kit.bus());
        assert_eq!(1000.0, kit.sampling_rate());

        let snare = kit.instrument(Piece::Snare).ok_or("no snare")?;
        assert_eq!(45.5, snare.threshold());
        assert_eq!(
            vec![dir.path().join("sounds/snare.ogg")],
            snare.sound_files()
        );

        let hihat = kit.instrument(Piece::Hihat).ok_or("no hihat")?;
        assert_eq!(vec![dir.path().join("hh_closed.wav")], hihat.sound_files());
        Ok(())
    }

    #[test]
    fn test_load_toml() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("drums.toml");
        fs::write(&path, "[ride]\nchannel = 2\nsound = \"/abs/ride.wav\"\n")?;

        let kit = load(&path)?;
        let ride = kit.instrument(Piece::Ride).ok_or("no ride")?;
        assert_eq!(vec![Path::new("/abs/ride.wav")], ride.sound_files());
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load(Path::new("/nonexistent/drums.yaml")),
            Err(ConfigError::Load(_))
        ));
    }
}
