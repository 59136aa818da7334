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

//! Playback channels and voice mixing.
//!
//! The pool is the control side: it decides whether a playback channel is free and
//! hands out tokens. Voices are the audio side: they carry a sound and a read
//! position and are mixed by the output callback, which marks the channel free again
//! when the sound runs out.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};

use tracing::debug;

use super::{loader::LoadedSound, PlaybackToken};

/// One playback channel's shared state.
struct Slot {
    /// Set while a voice is playing on this channel.
    busy: Arc<AtomicBool>,
    /// The volume of the current voice, stored as f32 bits.
    volume: Arc<AtomicU32>,
    /// Incremented on every playback so stale tokens are ignored.
    generation: u64,
}

/// A fixed set of playback channels.
pub struct ChannelPool {
    slots: Vec<Slot>,
}

impl ChannelPool {
    /// Creates a pool with the given number of playback channels.
    pub fn new(channels: usize) -> Self {
        Self {
            slots: (0..channels)
                .map(|_| Slot {
                    busy: Arc::new(AtomicBool::new(false)),
                    volume: Arc::new(AtomicU32::new(1.0f32.to_bits())),
                    generation: 0,
                })
                .collect(),
        }
    }

    /// Claims the first free channel for a new voice playing the given sound.
    /// Returns None if every channel is busy.
    pub fn start(&mut self, sound: Arc<LoadedSound>) -> Option<(PlaybackToken, Voice)> {
        let (channel, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.busy.load(Ordering::Acquire))?;

        slot.busy.store(true, Ordering::Release);
        slot.volume.store(1.0f32.to_bits(), Ordering::Relaxed);
        slot.generation += 1;

        let token = PlaybackToken {
            channel,
            generation: slot.generation,
        };
        let voice = Voice {
            sound,
            position: 0,
            volume: slot.volume.clone(),
            busy: slot.busy.clone(),
        };
        Some((token, voice))
    }

    /// Sets the volume of a playback if it is still the current one on its channel.
    pub fn set_volume(&self, token: PlaybackToken, volume: f32) {
        match self.slots.get(token.channel) {
            Some(slot) if slot.generation == token.generation => {
                slot.volume
                    .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
            }
            _ => debug!(channel = token.channel, "Ignoring volume for stale playback"),
        }
    }

    /// Returns the number of channels currently playing.
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.busy.load(Ordering::Acquire))
            .count()
    }

    /// Returns the total number of channels.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl std::fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("active", &self.active_count())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// A sound playing on a channel.
pub struct Voice {
    sound: Arc<LoadedSound>,
    /// The next frame to play.
    position: usize,
    volume: Arc<AtomicU32>,
    busy: Arc<AtomicBool>,
}

impl Voice {
    /// Returns true once every frame has been played.
    pub fn is_finished(&self) -> bool {
        self.position >= self.sound.frames()
    }
}

impl Drop for Voice {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Mixes the voices into an interleaved output buffer with `channels` channels,
/// dropping voices that finish. Sounds are expected to already match the output's
/// channel count and sample rate.
pub fn mix(voices: &mut Vec<Voice>, output: &mut [f32], channels: usize) {
    output.fill(0.0);
    if channels == 0 {
        return;
    }
    let frames = output.len() / channels;

    for voice in voices.iter_mut() {
        let volume = f32::from_bits(voice.volume.load(Ordering::Relaxed));
        let data = voice.sound.data();
        let remaining = voice.sound.frames().saturating_sub(voice.position);
        let count = remaining.min(frames);

        let start = (voice.position * channels).min(data.len());
        let end = (start + count * channels).min(data.len());
        for (out, sample) in output[..count * channels]
            .iter_mut()
            .zip(data[start..end].iter())
        {
            *out += sample * volume;
        }
        voice.position += count;
    }

    for sample in output.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }

    // Dropping a finished voice frees its channel.
    voices.retain(|voice| !voice.is_finished());
}
