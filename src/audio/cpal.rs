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
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, span, Level};

use super::{
    loader::{LoadedSound, SoundLoader},
    voice::{mix, ChannelPool, Voice},
    AudioError, PlaybackToken, SoundHandle,
};

/// An audio engine that mixes a fixed number of playback channels into a cpal
/// output stream.
pub struct Engine {
    /// The name of the device.
    name: String,
    /// The host the device belongs to.
    host_id: cpal::HostId,
    /// The number of output channels.
    channels: u16,
    /// The output sample rate.
    sample_rate: u32,
    /// Decides which playback channels are free.
    pool: Mutex<ChannelPool>,
    /// Sounds indexed by handle.
    sounds: RwLock<Vec<Arc<LoadedSound>>>,
    /// Decodes and caches sounds.
    loader: Mutex<SoundLoader>,
    /// Hands new voices to the output stream.
    voice_tx: crossbeam_channel::Sender<Voice>,
    /// Tells the output thread to stop.
    stop: Arc<AtomicBool>,
    /// Keeps the output stream alive.
    output_thread: Option<thread::JoinHandle<()>>,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}, {} Hz) ({})",
            self.name,
            self.channels,
            self.sample_rate,
            self.host_id.name()
        )
    }
}

/// Builds an output stream that mixes incoming voices and converts to the device's
/// sample type.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    voice_rx: crossbeam_channel::Receiver<Voice>,
    playback_channels: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut voices: Vec<Voice> = Vec::with_capacity(playback_channels);
    let mut scratch: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            while let Ok(voice) = voice_rx.try_recv() {
                voices.push(voice);
            }
            if scratch.len() != data.len() {
                scratch.resize(data.len(), 0.0);
            }
            mix(&mut voices, &mut scratch, channels);
            for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                *dst = T::from_sample(src);
            }
        },
        |err| error!("CPAL output stream error: {}", err),
        None,
    )
}

/// Finds the named output device on the default host.
fn find_device(host: &cpal::Host, name: &str) -> Result<cpal::Device, AudioError> {
    if name == "default" {
        return host
            .default_output_device()
            .ok_or_else(|| AudioError::Device("no default output device".to_string()));
    }

    host.output_devices()
        .map_err(|e| AudioError::Device(e.to_string()))?
        .find(|device| {
            device
                .name()
                .map(|device_name| device_name.trim() == name)
                .unwrap_or(false)
        })
        .ok_or_else(|| AudioError::Device(format!("no device found with name {}", name)))
}

impl Engine {
    /// Opens the given output device and starts its output stream.
    pub fn get(name: &str, playback_channels: usize) -> Result<Engine, AudioError> {
        let span = span!(Level::INFO, "audio engine (cpal)");
        let _enter = span.enter();

        let host = cpal::default_host();
        let device = find_device(&host, name)?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::Device(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.config();
        let channels = config.channels;
        let sample_rate = config.sample_rate.0;

        let (voice_tx, voice_rx) = crossbeam_channel::bounded::<Voice>(playback_channels.max(1));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let stop = Arc::new(AtomicBool::new(false));

        // cpal streams can't move between threads, so the stream lives on its own.
        let output_thread = {
            let stop = stop.clone();
            thread::spawn(move || {
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_stream::<f32>(&device, &config, voice_rx, playback_channels)
                    }
                    cpal::SampleFormat::I16 => {
                        build_stream::<i16>(&device, &config, voice_rx, playback_channels)
                    }
                    cpal::SampleFormat::U16 => {
                        build_stream::<u16>(&device, &config, voice_rx, playback_channels)
                    }
                    cpal::SampleFormat::I32 => {
                        build_stream::<i32>(&device, &config, voice_rx, playback_channels)
                    }
                    other => {
                        let _ = ready_tx.send(Err(format!("unsupported sample format {}", other)));
                        return;
                    }
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(100));
                }
                debug!("Output stream stopped");
            })
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(AudioError::Device(e)),
            Err(_) => {
                return Err(AudioError::Device(
                    "output thread exited before starting".to_string(),
                ))
            }
        }

        let name = device_name(&host, name);
        info!(
            device = name,
            channels,
            sample_rate,
            playback_channels,
            "Audio output started"
        );

        Ok(Engine {
            name,
            host_id: host.id(),
            channels,
            sample_rate,
            pool: Mutex::new(ChannelPool::new(playback_channels)),
            sounds: RwLock::new(Vec::new()),
            loader: Mutex::new(SoundLoader::new(channels, sample_rate)),
            voice_tx,
            stop,
            output_thread: Some(output_thread),
        })
    }
}

/// Resolves "default" to the default device's actual name for display.
fn device_name(host: &cpal::Host, name: &str) -> String {
    if name != "default" {
        return name.to_string();
    }
    host.default_output_device()
        .and_then(|device| device.name().ok())
        .unwrap_or_else(|| name.to_string())
}

impl super::Engine for Engine {
    fn load(&self, path: &Path) -> Result<SoundHandle, AudioError> {
        let sound = self.loader.lock().load(path)?;

        let mut sounds = self.sounds.write();
        if let Some(index) = sounds.iter().position(|s| Arc::ptr_eq(s, &sound)) {
            return Ok(SoundHandle(index));
        }
        sounds.push(sound);
        Ok(SoundHandle(sounds.len() - 1))
    }

    fn play(&self, sound: SoundHandle) -> Option<PlaybackToken> {
        let sound = match self.sounds.read().get(sound.0) {
            Some(sound) => sound.clone(),
            None => {
                error!(handle = sound.0, "Unknown sound handle");
                return None;
            }
        };

        let (token, voice) = self.pool.lock().start(sound)?;
        if self.voice_tx.try_send(voice).is_err() {
            // The returned voice is dropped here, which frees the channel again.
            error!("Output stream is not accepting voices");
            return None;
        }
        Some(token)
    }

    fn set_volume(&self, token: PlaybackToken, volume: f32) {
        self.pool.lock().set_volume(token, volume);
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<super::mock::Engine>, Box<dyn Error>> {
        Err("not a mock".into())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(output_thread) = self.output_thread.take() {
            if output_thread.join().is_err() {
                error!("Output thread panicked");
            }
        }
    }
}

/// Lists the output devices of every available host.
pub fn list() -> Result<Vec<String>, Box<dyn Error>> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    let mut devices: Vec<String> = Vec::new();
    for host_id in cpal::available_hosts() {
        let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
            Ok(host_devices) => host_devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in host_devices {
            let max_channels = match device.supported_output_configs() {
                Ok(configs) => configs.map(|c| c.channels()).max().unwrap_or(0),
                Err(_) => continue,
            };
            if max_channels == 0 {
                continue;
            }
            let name = match device.name() {
                Ok(name) => name,
                Err(_) => continue,
            };
            devices.push(format!(
                "{} (Channels={}) ({})",
                name.trim(),
                max_channels,
                host_id.name()
            ));
        }
    }

    devices.sort();
    Ok(devices)
}
