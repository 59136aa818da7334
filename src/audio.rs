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

//! Sound playback.
//!
//! The kit only needs three things from an audio engine: load a sound up front, start
//! playing it on a free playback channel, and set that channel's volume. Engines own
//! a fixed pool of playback channels and report starvation instead of stealing.

use std::{error::Error, fmt, path::Path, sync::Arc};

pub mod cpal;
pub mod loader;
pub mod mock;
pub mod voice;

/// The default number of sounds that can play at once.
pub const DEFAULT_PLAYBACK_CHANNELS: usize = 8;

/// Errors raised by audio engines.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("unable to load sound {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("audio decode error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("audio I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audio device error: {0}")]
    Device(String),
}

/// A sound that has been loaded into an engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SoundHandle(pub(crate) usize);

/// Identifies one playback of a sound on one playback channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackToken {
    pub(crate) channel: usize,
    pub(crate) generation: u64,
}

impl PlaybackToken {
    /// The playback channel the sound is playing on.
    pub fn channel(&self) -> usize {
        self.channel
    }
}

/// An audio engine that can play preloaded sounds.
pub trait Engine: fmt::Display + Send + Sync {
    /// Loads a sound so it can be played without touching the disk.
    fn load(&self, path: &Path) -> Result<SoundHandle, AudioError>;

    /// Starts playing a sound. Returns None if no playback channel is free.
    fn play(&self, sound: SoundHandle) -> Option<PlaybackToken>;

    /// Sets the volume, in [0, 1], of a playback that is still in progress.
    fn set_volume(&self, token: PlaybackToken, volume: f32);

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<mock::Engine>, Box<dyn Error>>;
}

/// Lists the output devices known to cpal.
pub fn list_devices() -> Result<Vec<String>, Box<dyn Error>> {
    cpal::list()
}

/// Gets the engine for the given device name. Names starting with "mock" produce
/// a mock engine.
pub fn get_engine(device: &str, playback_channels: usize) -> Result<Arc<dyn Engine>, AudioError> {
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Engine::get(device, playback_channels)));
    }

    Ok(Arc::new(cpal::Engine::get(device, playback_channels)?))
}
