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

//! Sound loading and caching.
//!
//! Sounds are decoded entirely into memory at startup and converted to the output's
//! channel count and sample rate, so triggering one never touches the disk or does
//! any conversion work.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info};

use super::AudioError;

/// A decoded sound held in memory as interleaved f32 samples.
pub struct LoadedSound {
    data: Vec<f32>,
    channel_count: u16,
    sample_rate: u32,
}

impl LoadedSound {
    /// Creates a sound from interleaved samples.
    pub fn new(data: Vec<f32>, channel_count: u16, sample_rate: u32) -> Self {
        Self {
            data,
            channel_count,
            sample_rate,
        }
    }

    /// Decodes an audio file (WAV, OGG, FLAC, MP3, ...) into memory.
    pub fn decode(path: &Path) -> Result<LoadedSound, AudioError> {
        let load_error = |reason: String| AudioError::Load {
            path: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| load_error(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| load_error(e.to_string()))?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| load_error("no audio track found".to_string()))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| load_error("sample rate not specified".to_string()))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| load_error(e.to_string()))?;

        let mut data = Vec::new();
        let mut channel_count = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);

        loop {
            let packet = match format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!(path = ?path, error = e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            channel_count = spec.channels.count() as u16;
            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            data.extend_from_slice(buffer.samples());
        }

        if channel_count == 0 || data.is_empty() {
            return Err(load_error("no audio data".to_string()));
        }

        Ok(LoadedSound::new(data, channel_count, sample_rate))
    }

    /// The interleaved samples.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// The number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// The sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The number of frames.
    pub fn frames(&self) -> usize {
        if self.channel_count == 0 {
            return 0;
        }
        self.data.len() / self.channel_count as usize
    }

    /// The playing time of the sound.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// The memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Converts the sound to the given channel count and sample rate. Output channels
    /// cycle through the source channels, so mono is duplicated to every output.
    pub fn conform(&self, channel_count: u16, sample_rate: u32) -> LoadedSound {
        let remapped = if channel_count == self.channel_count {
            self.data.clone()
        } else {
            let source_channels = self.channel_count as usize;
            let mut remapped = Vec::with_capacity(self.frames() * channel_count as usize);
            for frame in self.data.chunks_exact(source_channels) {
                for channel in 0..channel_count as usize {
                    remapped.push(frame[channel % source_channels]);
                }
            }
            remapped
        };

        let data = if sample_rate == self.sample_rate {
            remapped
        } else {
            transcode(&remapped, channel_count, self.sample_rate, sample_rate)
        };

        LoadedSound::new(data, channel_count, sample_rate)
    }
}

/// Transcodes interleaved samples from one sample rate to another using linear
/// interpolation, which is plenty for one-shot drum hits.
fn transcode(samples: &[f32], channel_count: u16, source_rate: u32, target_rate: u32) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let channels = channel_count as usize;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);
    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let s0 = samples
                .get(source_frame * channels + channel)
                .copied()
                .unwrap_or(0.0);
            let s1 = samples
                .get((source_frame + 1) * channels + channel)
                .copied()
                .unwrap_or(s0);
            output.push(s0 + (s1 - s0) * frac);
        }
    }
    output
}

/// Loads sounds and caches them by path.
pub struct SoundLoader {
    cache: HashMap<PathBuf, Arc<LoadedSound>>,
    channel_count: u16,
    sample_rate: u32,
}

impl SoundLoader {
    /// Creates a loader producing sounds for the given output format.
    pub fn new(channel_count: u16, sample_rate: u32) -> Self {
        Self {
            cache: HashMap::new(),
            channel_count,
            sample_rate,
        }
    }

    /// Loads a sound, returning the cached copy if it was loaded before.
    pub fn load(&mut self, path: &Path) -> Result<Arc<LoadedSound>, AudioError> {
        if let Some(sound) = self.cache.get(path) {
            debug!(path = ?path, "Using cached sound");
            return Ok(sound.clone());
        }

        let decoded = LoadedSound::decode(path)?;
        if decoded.sample_rate() != self.sample_rate {
            info!(
                source_rate = decoded.sample_rate(),
                target_rate = self.sample_rate,
                "Transcoding sound"
            );
        }
        let sound = Arc::new(decoded.conform(self.channel_count, self.sample_rate));

        info!(
            path = ?path,
            channels = sound.channel_count(),
            sample_rate = sound.sample_rate(),
            duration_ms = sound.duration().as_millis(),
            memory_kb = sound.memory_size() / 1024,
            "Sound loaded"
        );

        self.cache.insert(path.to_path_buf(), sound.clone());
        Ok(sound)
    }

    /// Returns the total memory used by cached sounds.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.values().map(|s| s.memory_size()).sum()
    }
}

impl std::fmt::Debug for SoundLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundLoader")
            .field("cached_sounds", &self.cache.len())
            .field("sample_rate", &self.sample_rate)
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::write_wav;

    use super::*;

    fn ramp(frames: usize) -> Vec<i16> {
        (0..frames).map(|i| (i % 100) as i16 * 100).collect()
    }

    #[test]
    fn test_decode_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snare.wav");
        write_wav(&path, vec![ramp(441), ramp(441)], 44100).unwrap();

        let sound = LoadedSound::decode(&path).unwrap();
        assert_eq!(2, sound.channel_count());
        assert_eq!(44100, sound.sample_rate());
        assert_eq!(441, sound.frames());
        assert_eq!(Duration::from_millis(10), sound.duration());
    }

    #[test]
    fn test_decode_missing_file() {
        assert!(matches!(
            LoadedSound::decode(Path::new("/nonexistent/kick.wav")),
            Err(AudioError::Load { .. })
        ));
    }

    #[test]
    fn test_loader_caches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.wav");
        write_wav(&path, vec![ramp(480)], 48000).unwrap();

        let mut loader = SoundLoader::new(2, 48000);
        let first = loader.load(&path).unwrap();
        let second = loader.load(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(2, first.channel_count());
        assert_eq!(480, first.frames());
        assert_eq!(480 * 2 * 4, loader.total_memory_usage());
    }

    #[test]
    fn test_conform_mono_to_stereo() {
        let sound = LoadedSound::new(vec![0.1, 0.2, 0.3], 1, 44100);
        let stereo = sound.conform(2, 44100);
        assert_eq!(&[0.1, 0.1, 0.2, 0.2, 0.3, 0.3], stereo.data());
    }

    #[test]
    fn test_conform_transcodes() {
        let source: Vec<f32> = (0..4410)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
            .collect();
        let sound = LoadedSound::new(source, 1, 44100);

        let result = sound.conform(1, 48000);
        let expected_len = (4410.0_f64 * 48000.0 / 44100.0).ceil() as usize;
        assert_eq!(expected_len, result.frames());
        assert_eq!(48000, result.sample_rate());
    }
}
