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
use std::{error::Error, fs::File, path::Path};

use hound::{SampleFormat, WavSpec, WavWriter};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Writes a 16 bit WAV file with one vector of samples per channel.
pub fn write_wav(path: &Path, samples: Vec<Vec<i16>>, sample_rate: u32) -> Result<(), Box<dyn Error>> {
    let num_channels = samples.len();
    assert!(num_channels <= u16::MAX.into(), "Too many channels!");
    let mut writer = WavWriter::new(
        File::create(path)?,
        WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )?;

    let frames = samples.iter().map(Vec::len).max().unwrap_or(0);
    for frame in 0..frames {
        for channel in &samples {
            writer.write_sample(channel.get(frame).copied().unwrap_or(0))?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// A piezo strike as the ADC sees it: a fast linear attack up to `peak`, then an
/// exponential decay back to zero.
pub fn strike(peak: u16, attack: usize, decay: usize) -> Vec<u16> {
    let mut values = vec![0];
    for i in 1..=attack {
        values.push((f64::from(peak) * i as f64 / attack as f64).round() as u16);
    }
    for i in 1..=decay {
        values.push((f64::from(peak) * (-5.0 * i as f64 / decay as f64).exp()).round() as u16);
    }
    values
}

/// Uniform noise in `[baseline - spread, baseline + spread]`, repeatable per seed.
pub fn noise(seed: u64, baseline: u16, spread: u16, count: usize) -> Vec<u16> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| rng.gen_range(baseline.saturating_sub(spread)..=baseline + spread))
        .collect()
}
