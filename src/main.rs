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
use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use trigkit::bus::{self, Channel};
use trigkit::clock::{SamplingClock, SystemTimer};
use trigkit::kit::{self, Kit, KitError, Recording};
use trigkit::playsync::CancelHandle;
use trigkit::{audio, config, thread_priority};

const DEFAULT_CALIBRATION_DURATION: Duration = Duration::from_secs(5);

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=drum trigger kit

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/trigkit
ExecStart=/usr/local/bin/trigkit start "$TRIGKIT_CONFIG"

[Install]
WantedBy=multi-user.target
Alias=trigkit.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "An electronic drum kit built from trigger sensors."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start will run the kit until interrupted.
    Start {
        /// The path to the kit config.
        config_path: String,
        /// Calibrate thresholds for this long before playing, e.g. 5s.
        #[arg[short, long]]
        calibrate: Option<String>,
    },
    /// Measures the noise on every instrument and prints the derived thresholds.
    Calibrate {
        /// The path to the kit config.
        config_path: String,
        /// How long to measure for (default 5s).
        #[arg[short, long]]
        duration: Option<String>,
    },
    /// Prints raw readings from one channel, for tuning thresholds.
    Monitor {
        /// The path to the kit config.
        config_path: String,
        /// The ADC channel to read (0-7).
        channel: u8,
        /// How long to read for. Runs until interrupted if unset.
        #[arg[short, long]]
        duration: Option<String>,
        /// Also writes the readings to this CSV file when sampling ends.
        #[arg[short, long]]
        output: Option<PathBuf>,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

fn parse_duration(duration: Option<String>) -> Result<Option<Duration>, Box<dyn Error>> {
    Ok(match duration {
        Some(duration) => Some(DurationString::from_string(duration)?.into()),
        None => None,
    })
}

/// Runs `f` on a blocking thread with raised priority. Ctrl-C cancels it at the next
/// tick boundary.
async fn run_sampling<T, F>(f: F) -> Result<T, Box<dyn Error>>
where
    F: FnOnce(CancelHandle) -> Result<T, KitError> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancelHandle::new();
    let signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping");
                cancel.cancel();
            }
        })
    };

    let result = tokio::task::spawn_blocking(move || {
        thread_priority::promote_sampling_thread();
        f(cancel)
    })
    .await;
    signal.abort();

    Ok(result??)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config_path,
            calibrate,
        } => {
            let config = config::load(&PathBuf::from(config_path))?;
            let calibrate = parse_duration(calibrate)?;

            run_sampling(move |cancel| {
                let mut kit = Kit::assemble(&config)?;
                let mut timer = SystemTimer;
                if let Some(duration) = calibrate {
                    let mut clock = SamplingClock::new(kit.period());
                    for (piece, profile) in kit.calibrate(duration, &mut clock, &mut timer, &cancel)? {
                        info!(instrument = piece.name(), profile = %profile, "Noise profile");
                    }
                }
                let mut clock = SamplingClock::new(kit.period());
                kit.run(&mut clock, &mut timer, &cancel)?;
                Ok(())
            })
            .await?;
        }
        Commands::Calibrate {
            config_path,
            duration,
        } => {
            let config = config::load(&PathBuf::from(config_path))?;
            let duration = parse_duration(duration)?.unwrap_or(DEFAULT_CALIBRATION_DURATION);

            let profiles = run_sampling(move |cancel| {
                let mut kit = Kit::assemble(&config)?;
                let mut clock = SamplingClock::new(kit.period());
                kit.calibrate(duration, &mut clock, &mut SystemTimer, &cancel)
            })
            .await?;

            if profiles.is_empty() {
                println!("Calibration cancelled.");
                return Ok(());
            }

            println!("Noise profiles:");
            for (piece, profile) in profiles {
                println!("- {}: {}", piece, profile);
            }
        }
        Commands::Monitor {
            config_path,
            channel,
            duration,
            output,
        } => {
            let config = config::load(&PathBuf::from(config_path))?;
            let channel = Channel::new(channel)?;
            let duration = parse_duration(duration)?;

            let (stats, recording) = run_sampling(move |cancel| {
                let mut bus = bus::open(config.bus())?;
                let mut clock = SamplingClock::new(config.period());
                let mut recording = Recording::new();
                let stats = kit::monitor(
                    bus.as_mut(),
                    channel,
                    config.bus_retries(),
                    &mut clock,
                    &mut SystemTimer,
                    &cancel,
                    duration,
                    |elapsed, value| {
                        println!("{:.4} {}", elapsed.as_secs_f64(), value);
                        recording.push(elapsed, value);
                    },
                )?;
                Ok((stats, recording))
            })
            .await?;

            if let Some(output) = output {
                recording.write_csv(BufWriter::new(File::create(&output)?))?;
                info!(file = %output.display(), samples = recording.len(), "Wrote readings");
            }

            if let Some(rate) = stats.average_rate() {
                println!("Sampling rate: {:.1} Hz", rate);
            }
        }
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}
