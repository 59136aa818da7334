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

//! Kit assembly and the sampling loop.
//!
//! The kit owns the bus for its whole life. Everything that reads a channel borrows
//! it from the kit for the duration of one tick, and dropping the kit releases the
//! bus whichever way the loop ended.

use std::{
    collections::HashMap,
    fmt, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{info, span, warn, Level};

use crate::{
    audio::{self, AudioError, Engine, SoundHandle},
    bus::{self, Bus, BusError, Channel},
    calibrate::{CalibrationError, NoiseProfile},
    clock::{SamplingClock, TickStats, Timer},
    config::{ConfigError, KitConfig, Piece, Sounds},
    dispatch::{Dispatch, Dispatcher},
    instrument::{detector::PeakDetector, pedal::Pedal, Inputs, Instrument, Voicing},
    playsync::CancelHandle,
};

#[derive(Debug, thiserror::Error)]
pub enum KitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

/// An assembled drum kit.
pub struct Kit {
    bus: Box<dyn Bus>,
    retries: u32,
    dispatcher: Dispatcher,
    /// Pedals, processed before instruments on every tick.
    pedals: Vec<Pedal>,
    /// Instruments in processing order.
    instruments: Vec<Instrument>,
    calibration_z: f64,
    period: Duration,
}

impl Kit {
    /// Opens the configured bus and audio device and builds the kit.
    pub fn assemble(config: &KitConfig) -> Result<Kit, KitError> {
        let bus = bus::open(config.bus())?;
        let engine = audio::get_engine(config.audio_device(), config.playback_channels())?;
        Kit::new(config, bus, engine)
    }

    /// Builds a kit on an already opened bus and engine, loading every sound up front.
    pub fn new(config: &KitConfig, bus: Box<dyn Bus>, engine: Arc<dyn Engine>) -> Result<Kit, KitError> {
        let span = span!(Level::INFO, "assemble kit");
        let _enter = span.enter();

        let mut sounds = SoundTable::new(engine.as_ref());
        let mut pedals = Vec::new();
        let mut instruments = Vec::new();

        for instrument in config.instruments() {
            let voicing = match instrument.sounds() {
                Sounds::Single(sound) => Voicing::Single(sounds.load(sound.as_deref())?),
                Sounds::Pedal {
                    open,
                    closed,
                    pedal,
                } => {
                    pedals.push(Pedal::new(instrument.piece().name(), pedal));
                    Voicing::Pedal {
                        open: sounds.load(open.as_deref())?,
                        closed: sounds.load(closed.as_deref())?,
                        pedal: pedals.len() - 1,
                    }
                }
            };
            if matches!(voicing, Voicing::Single(None))
                || matches!(voicing, Voicing::Pedal { open: None, closed: None, .. })
            {
                warn!(instrument = instrument.piece().name(), "Instrument has no sound");
            }

            instruments.push(Instrument::new(
                instrument.piece(),
                instrument.channel(),
                instrument.amplify(),
                PeakDetector::new(
                    instrument.threshold(),
                    config.rise_guard(),
                    config.fall_guard(),
                ),
                instrument.min_interval(),
                voicing,
            ));
        }

        let kit = Kit {
            bus,
            retries: config.bus_retries(),
            dispatcher: Dispatcher::new(engine),
            pedals,
            instruments,
            calibration_z: config.calibration_z(),
            period: config.period(),
        };
        info!(kit = %kit, "Kit assembled");
        Ok(kit)
    }

    /// The sampling period.
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn pedals(&self) -> &[Pedal] {
        &self.pedals
    }

    /// Processes one tick: every pedal, then every instrument. Returns the strikes
    /// that were dispatched.
    pub fn tick(&mut self, now: Instant) -> Result<Vec<(Piece, Dispatch)>, KitError> {
        let Kit {
            bus,
            retries,
            dispatcher,
            pedals,
            instruments,
            ..
        } = self;

        for pedal in pedals.iter_mut() {
            pedal.process_input(bus.as_mut(), *retries)?;
        }

        let mut inputs = Inputs {
            bus: bus.as_mut(),
            retries: *retries,
            pedals,
            dispatcher,
            now,
        };
        let mut strikes = Vec::new();
        for instrument in instruments.iter_mut() {
            if let Some(outcome) = instrument.process_input(&mut inputs)? {
                strikes.push((instrument.piece(), outcome));
            }
        }
        Ok(strikes)
    }

    /// Runs the kit until cancelled or until a tick fails.
    pub fn run(
        &mut self,
        clock: &mut SamplingClock,
        timer: &mut dyn Timer,
        cancel: &CancelHandle,
    ) -> Result<TickStats, KitError> {
        let span = span!(Level::INFO, "sampling loop");
        let _enter = span.enter();
        info!(period = ?clock.period(), "Starting");

        let result = self.drive(clock, timer, cancel, |_, _| false);
        log_stats(clock.stats());
        result.map(|_| clock.stats().clone())
    }

    /// Records noise on every instrument for `duration` and adopts the calibrated
    /// thresholds. Returns nothing if cancelled before the window closes.
    pub fn calibrate(
        &mut self,
        duration: Duration,
        clock: &mut SamplingClock,
        timer: &mut dyn Timer,
        cancel: &CancelHandle,
    ) -> Result<Vec<(Piece, NoiseProfile)>, KitError> {
        let span = span!(Level::INFO, "calibration");
        let _enter = span.enter();
        info!(duration = ?duration, "Calibrating, don't touch the kit");

        let start = timer.now();
        for instrument in self.instruments.iter_mut() {
            instrument.start_calibration(duration, start)?;
        }

        let result = self.drive(clock, timer, cancel, |kit, now| {
            kit.instruments
                .iter()
                .all(|instrument| instrument.calibration_complete(now))
        });
        if let Err(e) = result {
            self.abort_calibration();
            return Err(e);
        }
        if cancel.is_cancelled() {
            info!("Calibration cancelled");
            self.abort_calibration();
            return Ok(Vec::new());
        }

        let z = self.calibration_z;
        let profiles: Result<Vec<(Piece, NoiseProfile)>, KitError> = self
            .instruments
            .iter_mut()
            .map(|instrument| Ok((instrument.piece(), instrument.finish_calibration(z)?)))
            .collect();
        if profiles.is_err() {
            self.abort_calibration();
        }
        profiles
    }

    fn abort_calibration(&mut self) {
        for instrument in self.instruments.iter_mut() {
            instrument.cancel_calibration();
        }
    }

    /// Ticks until cancelled or until `done` returns true after a tick.
    fn drive(
        &mut self,
        clock: &mut SamplingClock,
        timer: &mut dyn Timer,
        cancel: &CancelHandle,
        done: impl Fn(&Kit, Instant) -> bool,
    ) -> Result<(), KitError> {
        while !cancel.is_cancelled() {
            let read_time = clock.begin_tick(timer);
            self.tick(read_time)?;
            clock.end_tick(read_time, timer);
            if done(self, timer.now()) {
                break;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Kit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.instruments.iter().map(Instrument::name).collect();
        write!(
            f,
            "[{}] on {} playing through {}",
            names.join(", "),
            self.bus,
            self.dispatcher.engine()
        )
    }
}

/// Loads each sound file once.
struct SoundTable<'a> {
    engine: &'a dyn Engine,
    handles: HashMap<PathBuf, SoundHandle>,
}

impl<'a> SoundTable<'a> {
    fn new(engine: &'a dyn Engine) -> Self {
        SoundTable {
            engine,
            handles: HashMap::new(),
        }
    }

    fn load(&mut self, path: Option<&Path>) -> Result<Option<SoundHandle>, AudioError> {
        let Some(path) = path else {
            return Ok(None);
        };
        if let Some(handle) = self.handles.get(path) {
            return Ok(Some(*handle));
        }
        let handle = self.engine.load(path)?;
        self.handles.insert(path.to_path_buf(), handle);
        Ok(Some(handle))
    }
}

fn log_stats(stats: &TickStats) {
    match stats.average_rate() {
        Some(rate) => info!(
            ticks = stats.ticks,
            overruns = stats.overruns,
            rate = format!("{:.1} Hz", rate),
            "Sampling finished"
        ),
        None => info!(ticks = stats.ticks, "Sampling finished"),
    }
}

/// Prints raw readings of one channel at the sampling rate, for tuning thresholds.
/// Runs until cancelled or until `duration` has passed.
#[allow(clippy::too_many_arguments)]
pub fn monitor(
    bus: &mut dyn Bus,
    channel: Channel,
    retries: u32,
    clock: &mut SamplingClock,
    timer: &mut dyn Timer,
    cancel: &CancelHandle,
    duration: Option<Duration>,
    mut on_sample: impl FnMut(Duration, u16),
) -> Result<TickStats, BusError> {
    let start = timer.now();
    while !cancel.is_cancelled() {
        let read_time = clock.begin_tick(timer);
        let elapsed = read_time.saturating_duration_since(start);
        if duration.is_some_and(|duration| elapsed >= duration) {
            break;
        }
        on_sample(elapsed, bus::read_sample(bus, channel, retries)?);
        clock.end_tick(read_time, timer);
    }
    log_stats(clock.stats());
    Ok(clock.stats().clone())
}

/// Readings captured by `monitor`, kept in memory until sampling ends.
#[derive(Debug, Default)]
pub struct Recording {
    samples: Vec<(Duration, u16)>,
}

impl Recording {
    pub fn new() -> Recording {
        Recording::default()
    }

    pub fn push(&mut self, elapsed: Duration, value: u16) {
        self.samples.push((elapsed, value));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Writes the readings as CSV with a `"time","intensity"` header.
    pub fn write_csv(&self, mut out: impl io::Write) -> io::Result<()> {
        writeln!(out, "\"time\",\"intensity\"")?;
        for (elapsed, value) in &self.samples {
            writeln!(out, "{:.6},{}", elapsed.as_secs_f64(), value)?;
        }
        out.flush()
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs};

    use config::{Config, File, FileFormat};

    use crate::{bus::mock, clock::SimulatedTimer, testutil::strike};

    use super::*;

    /// A simulated timer that cancels after a number of sleeps.
    struct CancellingTimer {
        inner: SimulatedTimer,
        cancel: CancelHandle,
        sleeps_left: u32,
    }

    impl Timer for CancellingTimer {
        fn now(&mut self) -> Instant {
            self.inner.now()
        }

        fn sleep(&mut self, duration: Duration) {
            self.inner.sleep(duration);
            self.sleeps_left = self.sleeps_left.saturating_sub(1);
            if self.sleeps_left == 0 {
                self.cancel.cancel();
            }
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: KitConfig,
    }

    fn fixture(yaml: &str, sounds: &[&str]) -> Result<Fixture, Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        for sound in sounds {
            fs::write(dir.path().join(sound), b"")?;
        }
        let config = KitConfig::from_config(
            Config::builder()
                .add_source(File::from_str(yaml, FileFormat::Yaml))
                .build()?,
            dir.path(),
        )?;
        Ok(Fixture { dir, config })
    }

    const KIT: &str = r#"
        kit:
          bus: mock-bus
          audio_device: mock-audio
          bus_retries: 1
        snare:
          channel: 4
          sound: snare.wav
        hihat:
          channel: 3
          pedal_channel: 7
          open_sound: hh_open.wav
          close_sound: hh_closed.wav
        crash:
          channel: 0
          sound: crash.wav
          min_interval: 0.5
    "#;

    fn channel(index: u8) -> Channel {
        Channel::new(index).unwrap()
    }

    fn kit(fixture: &Fixture) -> Result<(Kit, mock::Control, Arc<dyn Engine>), Box<dyn Error>> {
        let bus = mock::Bus::get("mock-bus");
        let control = bus.control();
        let engine = audio::get_engine("mock-audio", 8)?;
        let kit = Kit::new(&fixture.config, Box::new(bus), engine.clone())?;
        Ok((kit, control, engine))
    }

    #[test]
    fn test_assemble() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(KIT, &["snare.wav", "hh_open.wav", "hh_closed.wav", "crash.wav"])?;
        let kit = Kit::assemble(&fixture.config)?;

        let names: Vec<&str> = kit.instruments().iter().map(Instrument::name).collect();
        assert_eq!(vec!["crash", "hihat", "snare"], names);
        assert_eq!(1, kit.pedals().len());
        assert_eq!(Duration::from_millis(4), kit.period());
        assert!(matches!(kit.instruments()[1].voicing(), Voicing::Pedal { pedal: 0, .. }));
        Ok(())
    }

    #[test]
    fn test_missing_sound_releases_bus() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(KIT, &["snare.wav", "hh_open.wav", "hh_closed.wav"])?;
        let bus = mock::Bus::get("mock-bus");
        let control = bus.control();

        let result = Kit::new(
            &fixture.config,
            Box::new(bus),
            audio::get_engine("mock-audio", 8)?,
        );
        assert!(matches!(result, Err(KitError::Audio(AudioError::Load { .. }))));
        assert_eq!(1, control.released());
        assert_eq!(0, control.reads());
        Ok(())
    }

    #[test]
    fn test_sounds_are_shared() -> Result<(), Box<dyn Error>> {
        let yaml = r#"
            kit:
              bus: mock-bus
            tom1:
              channel: 1
              sound: tom.wav
            floor_tom:
              channel: 5
              sound: tom.wav
        "#;
        let fixture = fixture(yaml, &["tom.wav"])?;
        let (kit, _, engine) = kit(&fixture)?;
        assert_eq!(1, engine.to_mock()?.loaded().len());
        assert_eq!(kit.instruments()[0].voicing(), kit.instruments()[1].voicing());
        Ok(())
    }

    #[test]
    fn test_tick_processes_pedal_first() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(KIT, &["snare.wav", "hh_open.wav", "hh_closed.wav", "crash.wav"])?;
        let (mut kit, control, engine) = kit(&fixture)?;

        // The pedal closes on the same tick the hi-hat peak is confirmed.
        control.push_values(channel(7), &[100, 100, 950]);
        control.push_values(channel(3), &[0, 300, 200]);
        control.push_values(channel(4), &[0, 500, 250]);

        let start = Instant::now();
        let mut strikes = Vec::new();
        for i in 0..3 {
            strikes.extend(kit.tick(start + kit.period() * i)?);
        }

        let pieces: Vec<Piece> = strikes.iter().map(|(piece, _)| *piece).collect();
        assert_eq!(vec![Piece::Hihat, Piece::Snare], pieces);
        let played: Vec<PathBuf> = engine.to_mock()?.played();
        assert_eq!(
            vec![
                fixture.dir.path().join("hh_closed.wav"),
                fixture.dir.path().join("snare.wav")
            ],
            played
        );
        Ok(())
    }

    #[test]
    fn test_run_until_cancelled() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(KIT, &["snare.wav", "hh_open.wav", "hh_closed.wav", "crash.wav"])?;
        let (mut kit, control, engine) = kit(&fixture)?;

        // Crash strikes every 100ms but its interval is 500ms.
        let mut strike = strike(400, 2, 10);
        strike.resize(25, 0);
        for _ in 0..10 {
            control.push_values(channel(0), &strike);
        }

        let cancel = CancelHandle::new();
        let mut timer = CancellingTimer {
            inner: SimulatedTimer::new(),
            cancel: cancel.clone(),
            sleeps_left: 250,
        };
        let mut clock = SamplingClock::new(kit.period());
        let stats = kit.run(&mut clock, &mut timer, &cancel)?;

        assert_eq!(250, stats.ticks);
        assert_eq!(2, engine.to_mock()?.played().len());

        drop(kit);
        assert_eq!(1, control.released());
        Ok(())
    }

    #[test]
    fn test_bus_failure_stops_run() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(KIT, &["snare.wav", "hh_open.wav", "hh_closed.wav", "crash.wav"])?;
        let (mut kit, control, _) = kit(&fixture)?;

        // One retry is allowed, so two failures in a row are fatal.
        control.fail_next_reads(2);
        let cancel = CancelHandle::new();
        let mut clock = SamplingClock::new(kit.period());
        let result = kit.run(&mut clock, &mut SimulatedTimer::new(), &cancel);
        assert!(matches!(
            result,
            Err(KitError::Bus(BusError::ReadFailure { attempts: 2, .. }))
        ));

        drop(kit);
        assert_eq!(1, control.released());
        Ok(())
    }

    #[test]
    fn test_calibrate() -> Result<(), Box<dyn Error>> {
        let yaml = r#"
            kit:
              bus: mock-noise
              calibration_z: 3
            snare:
              channel: 4
              threshold: 500
        "#;
        let fixture = fixture(yaml, &[])?;
        let bus = mock::Bus::get("mock-noise");
        let mut kit = Kit::new(
            &fixture.config,
            Box::new(bus),
            audio::get_engine("mock-audio", 8)?,
        )?;

        let cancel = CancelHandle::new();
        let mut timer = SimulatedTimer::new();
        let mut clock = SamplingClock::new(kit.period());
        let profiles = kit.calibrate(Duration::from_secs(1), &mut clock, &mut timer, &cancel)?;

        assert_eq!(1, profiles.len());
        let (piece, profile) = &profiles[0];
        assert_eq!(Piece::Snare, *piece);
        assert_eq!(250, profile.samples);
        assert!(profile.max <= 18);
        assert!((profile.threshold - (profile.mean + 3.0 * profile.stdev)).abs() < 1e-9);
        assert_eq!(profile.threshold, kit.instruments()[0].threshold());
        assert!(!kit.instruments()[0].is_calibrating());
        Ok(())
    }

    #[test]
    fn test_calibrate_flat_signal_is_degenerate() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(KIT, &["snare.wav", "hh_open.wav", "hh_closed.wav", "crash.wav"])?;
        let (mut kit, _, _) = kit(&fixture)?;

        let cancel = CancelHandle::new();
        let mut clock = SamplingClock::new(kit.period());
        let result = kit.calibrate(
            Duration::from_millis(100),
            &mut clock,
            &mut SimulatedTimer::new(),
            &cancel,
        );
        assert!(matches!(
            result,
            Err(KitError::Calibration(CalibrationError::Degenerate(..)))
        ));
        Ok(())
    }

    #[test]
    fn test_calibrate_cancelled() -> Result<(), Box<dyn Error>> {
        let fixture = fixture(KIT, &["snare.wav", "hh_open.wav", "hh_closed.wav", "crash.wav"])?;
        let (mut kit, _, _) = kit(&fixture)?;

        let cancel = CancelHandle::new();
        let mut timer = CancellingTimer {
            inner: SimulatedTimer::new(),
            cancel: cancel.clone(),
            sleeps_left: 10,
        };
        let mut clock = SamplingClock::new(kit.period());
        let profiles = kit.calibrate(Duration::from_secs(5), &mut clock, &mut timer, &cancel)?;
        assert!(profiles.is_empty());
        assert!(kit.instruments().iter().all(|i| !i.is_calibrating()));
        assert_eq!(30.0, kit.instruments()[0].threshold());
        Ok(())
    }

    #[test]
    fn test_monitor() -> Result<(), Box<dyn Error>> {
        let mut bus = mock::Bus::get("mock-bus");
        bus.push_values(channel(2), &[1, 2, 3, 4, 5]);

        let cancel = CancelHandle::new();
        let mut clock = SamplingClock::new(Duration::from_millis(10));
        let mut samples = Vec::new();
        let stats = monitor(
            &mut bus,
            channel(2),
            0,
            &mut clock,
            &mut SimulatedTimer::new(),
            &cancel,
            Some(Duration::from_millis(50)),
            |elapsed, value| samples.push((elapsed, value)),
        )?;

        assert_eq!(
            vec![
                (Duration::ZERO, 1),
                (Duration::from_millis(10), 2),
                (Duration::from_millis(20), 3),
                (Duration::from_millis(30), 4),
                (Duration::from_millis(40), 5),
            ],
            samples
        );
        assert_eq!(Some(100.0), stats.average_rate().map(f64::round));
        Ok(())
    }

    #[test]
    fn test_recording_csv() -> Result<(), Box<dyn Error>> {
        let mut recording = Recording::new();
        assert!(recording.is_empty());
        recording.push(Duration::ZERO, 12);
        recording.push(Duration::from_millis(4), 1023);

        let mut out = Vec::new();
        recording.write_csv(&mut out)?;
        assert_eq!(2, recording.len());
        assert_eq!(
            "\"time\",\"intensity\"\n0.000000,12\n0.004000,1023\n",
            String::from_utf8(out)?
        );
        Ok(())
    }
}
