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
use std::{
    error::Error,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{
    loader::LoadedSound,
    voice::{ChannelPool, Voice},
    AudioError, PlaybackToken, SoundHandle,
};

#[derive(Default)]
struct State {
    /// Loaded sound paths, indexed by handle.
    sounds: Vec<PathBuf>,
    /// Paths of sounds that started playing, in order.
    played: Vec<PathBuf>,
    /// Volumes set on playbacks, in order.
    volumes: Vec<f32>,
    /// Voices kept alive while holding, so their channels stay busy.
    held: Vec<Voice>,
    hold: bool,
}

/// A mock engine. Doesn't actually play anything, but records what it was asked to
/// do and manages its playback channels like a real engine.
#[derive(Clone)]
pub struct Engine {
    name: String,
    pool: Arc<Mutex<ChannelPool>>,
    state: Arc<Mutex<State>>,
}

impl Engine {
    /// Gets the given mock engine.
    pub fn get(name: &str, playback_channels: usize) -> Engine {
        Engine {
            name: name.to_string(),
            pool: Arc::new(Mutex::new(ChannelPool::new(playback_channels))),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// When holding, playbacks never finish until released, so channels can run out.
    #[cfg(test)]
    pub fn hold_voices(&self, hold: bool) {
        self.state.lock().hold = hold;
    }

    /// Finishes every held playback.
    #[cfg(test)]
    pub fn release_voices(&self) {
        self.state.lock().held.clear();
    }

    /// Paths of loaded sounds.
    #[cfg(test)]
    pub fn loaded(&self) -> Vec<PathBuf> {
        self.state.lock().sounds.clone()
    }

    /// Paths of sounds that have been played.
    #[cfg(test)]
    pub fn played(&self) -> Vec<PathBuf> {
        self.state.lock().played.clone()
    }

    /// Volumes that have been set.
    #[cfg(test)]
    pub fn volumes(&self) -> Vec<f32> {
        self.state.lock().volumes.clone()
    }

    /// The number of channels currently playing.
    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.pool.lock().active_count()
    }
}

impl super::Engine for Engine {
    fn load(&self, path: &Path) -> Result<SoundHandle, AudioError> {
        if !path.is_file() {
            return Err(AudioError::Load {
                path: path.display().to_string(),
                reason: "file not found".to_string(),
            });
        }

        let mut state = self.state.lock();
        if let Some(index) = state.sounds.iter().position(|p| p == path) {
            return Ok(SoundHandle(index));
        }
        info!(device = self.name, path = ?path, "Sound loaded");
        state.sounds.push(path.to_path_buf());
        Ok(SoundHandle(state.sounds.len() - 1))
    }

    fn play(&self, sound: SoundHandle) -> Option<PlaybackToken> {
        let mut state = self.state.lock();
        let path = state.sounds.get(sound.0)?.clone();

        let silence = Arc::new(LoadedSound::new(vec![0.0; 2], 1, 44100));
        let (token, voice) = self.pool.lock().start(silence)?;
        debug!(device = self.name, path = ?path, channel = token.channel(), "Playing sound");

        state.played.push(path);
        if state.hold {
            state.held.push(voice);
        }
        Some(token)
    }

    fn set_volume(&self, token: PlaybackToken, volume: f32) {
        self.pool.lock().set_volume(token, volume);
        self.state.lock().volumes.push(volume);
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<Engine>, Box<dyn Error>> {
        Ok(Arc::new(self.clone()))
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::audio::Engine as _;

    use super::*;

    #[test]
    fn test_mock_engine_starves() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("crash.wav");
        fs::write(&path, b"")?;

        let engine = Engine::get("mock-audio", 2);
        engine.hold_voices(true);
        let sound = engine.load(&path)?;
        assert_eq!(sound, engine.load(&path)?);

        assert!(engine.play(sound).is_some());
        assert!(engine.play(sound).is_some());
        assert!(engine.play(sound).is_none());
        assert_eq!(2, engine.played().len());

        engine.release_voices();
        assert_eq!(0, engine.active_count());
        assert!(engine.play(sound).is_some());
        Ok(())
    }

    #[test]
    fn test_mock_engine_missing_sound() {
        let engine = Engine::get("mock-audio", 2);
        assert!(matches!(
            engine.load(Path::new("/nonexistent/ride.wav")),
            Err(AudioError::Load { .. })
        ));
    }
}
